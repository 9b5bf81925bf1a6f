//! Drip sequence types: sequences, steps, enrollments and step executions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::campaign::Sender;
use crate::token::TrackToken;

// =============================================================================
// Sequence
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SequenceStatus {
    Active,
    Paused,
    Archived,
}

/// What enrolls contacts automatically. Matching happens outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    Manual,
    ContactCreated,
    ListAdded,
    TagAdded,
    EmailOpened,
    LinkClicked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub kind: TriggerType,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub id: Uuid,
    pub name: String,
    pub status: SequenceStatus,
    pub trigger: Trigger,
    pub from: Sender,
}

// =============================================================================
// Steps
// =============================================================================

/// When a step fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Schedule {
    /// Offset from the enrollment instant
    RelativeDelay {
        #[serde(default)]
        days: u32,
        #[serde(default)]
        hours: u32,
    },
    /// Fixed instant shared by every enrollee
    AbsoluteDate { at: DateTime<Utc> },
}

impl Schedule {
    /// Longest accepted relative delay.
    pub const MAX_DELAY_DAYS: u32 = 3650;

    /// Resolve to an absolute instant for an enrollment made at `enrolled_at`.
    /// `None` if the result falls outside the representable range.
    pub fn resolve(&self, enrolled_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Schedule::RelativeDelay { days, hours } => enrolled_at
                .checked_add_signed(Duration::days(i64::from(days)))?
                .checked_add_signed(Duration::hours(i64::from(hours))),
            Schedule::AbsoluteDate { at } => Some(at),
        }
    }

    pub fn within_limits(&self) -> bool {
        match *self {
            Schedule::RelativeDelay { days, hours } => {
                u64::from(days) * 24 + u64::from(hours) <= u64::from(Self::MAX_DELAY_DAYS) * 24
            }
            Schedule::AbsoluteDate { .. } => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub id: Uuid,
    pub sequence_id: Uuid,
    /// 0-based position within the sequence
    pub step_order: u32,
    pub name: String,
    pub subject: String,
    pub html_content: String,
    pub schedule: Schedule,
}

/// Step content as submitted, before ids and ordering are assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDraft {
    pub name: String,
    pub subject: String,
    pub html_content: String,
    pub schedule: Schedule,
}

impl StepDraft {
    /// Returns a description of the first missing field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.name.trim().is_empty() {
            Some("name")
        } else if self.subject.trim().is_empty() {
            Some("subject")
        } else if self.html_content.trim().is_empty() {
            Some("html_content")
        } else {
            None
        }
    }

    /// First validation problem with the draft, if any.
    pub fn problem(&self) -> Option<String> {
        if let Some(field) = self.missing_field() {
            return Some(format!("{field} is required"));
        }
        if !self.schedule.within_limits() {
            return Some(format!(
                "delay exceeds {} days",
                Schedule::MAX_DELAY_DAYS
            ));
        }
        None
    }

    pub fn into_step(self, sequence_id: Uuid, step_order: u32) -> SequenceStep {
        SequenceStep {
            id: Uuid::new_v4(),
            sequence_id,
            step_order,
            name: self.name,
            subject: self.subject,
            html_content: self.html_content,
            schedule: self.schedule,
        }
    }
}

// =============================================================================
// Enrollment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Active,
    Paused,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub contact_id: Uuid,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
    /// Set once every execution is terminal
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Step execution
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    /// Claimed by a scheduler tick
    InProgress,
    Sent,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    /// Terminal for enrollment completion. FAILED counts: nothing further
    /// will happen to it without an operator.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Skipped)
    }
}

/// One scheduled send of one step for one enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    pub step_id: Uuid,
    pub track_token: TrackToken,
    pub status: ExecutionStatus,
    /// Fixed when the enrollment is created
    pub scheduled_for: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StepExecution {
    /// `None` when the step's schedule cannot be resolved from the
    /// enrollment instant.
    pub fn schedule(enrollment: &Enrollment, step: &SequenceStep) -> Option<Self> {
        Some(Self {
            id: Uuid::new_v4(),
            enrollment_id: enrollment.id,
            step_id: step.id,
            track_token: TrackToken::generate(),
            status: ExecutionStatus::Pending,
            scheduled_for: step.schedule.resolve(enrollment.enrolled_at)?,
            sent_at: None,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_relative_delay_resolves_from_enrollment() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let schedule = Schedule::RelativeDelay { days: 2, hours: 3 };
        assert_eq!(schedule.resolve(t), Some(t + Duration::days(2) + Duration::hours(3)));
        assert_eq!(Schedule::RelativeDelay { days: 0, hours: 0 }.resolve(t), Some(t));
    }

    #[test]
    fn test_absolute_date_ignores_enrollment() {
        let at = Utc.with_ymd_and_hms(2024, 12, 24, 8, 0, 0).unwrap();
        let schedule = Schedule::AbsoluteDate { at };
        assert_eq!(schedule.resolve(Utc::now()), Some(at));
    }

    #[test]
    fn test_schedule_deserialization() {
        let relative: Schedule = serde_json::from_str(r#"{"type":"RELATIVE_DELAY","days":5}"#).unwrap();
        assert_eq!(relative, Schedule::RelativeDelay { days: 5, hours: 0 });

        let absolute: Schedule =
            serde_json::from_str(r#"{"type":"ABSOLUTE_DATE","at":"2024-12-24T08:00:00Z"}"#).unwrap();
        assert!(matches!(absolute, Schedule::AbsoluteDate { .. }));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::InProgress.is_terminal());
        assert!(ExecutionStatus::Sent.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_step_draft_missing_field() {
        let draft = StepDraft {
            name: "Welcome".to_string(),
            subject: " ".to_string(),
            html_content: "<p>hi</p>".to_string(),
            schedule: Schedule::RelativeDelay { days: 0, hours: 0 },
        };
        assert_eq!(draft.missing_field(), Some("subject"));
        assert_eq!(draft.problem().as_deref(), Some("subject is required"));
    }

    #[test]
    fn test_huge_delay_does_not_overflow() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let schedule = Schedule::RelativeDelay {
            days: u32::MAX,
            hours: u32::MAX,
        };
        assert_eq!(schedule.resolve(t), None);
        assert!(!schedule.within_limits());
    }

    #[test]
    fn test_delay_limit() {
        let at_limit = Schedule::RelativeDelay {
            days: Schedule::MAX_DELAY_DAYS,
            hours: 0,
        };
        assert!(at_limit.within_limits());
        let over = Schedule::RelativeDelay {
            days: Schedule::MAX_DELAY_DAYS,
            hours: 1,
        };
        assert!(!over.within_limits());

        let draft = StepDraft {
            name: "Later".to_string(),
            subject: "Later".to_string(),
            html_content: "<p>later</p>".to_string(),
            schedule: over,
        };
        assert_eq!(draft.problem().as_deref(), Some("delay exceeds 3650 days"));
    }
}
