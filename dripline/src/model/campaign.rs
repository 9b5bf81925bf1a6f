//! Campaign and recipient link types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::token::TrackToken;

// =============================================================================
// Sender
// =============================================================================

/// From-address used by campaigns and sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub email: String,
    pub name: String,
}

impl Sender {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }

    /// RFC 5322 mailbox form, `Name <email>`.
    pub fn mailbox(&self) -> String {
        if self.name.trim().is_empty() {
            self.email.clone()
        } else {
            format!("{} <{}>", self.name, self.email)
        }
    }
}

// =============================================================================
// Campaign
// =============================================================================

/// Campaign lifecycle.
///
/// `Draft | Scheduled -> Sending -> Completed | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    Failed,
}

impl CampaignStatus {
    /// States a send may start from.
    pub const SENDABLE: [CampaignStatus; 2] = [CampaignStatus::Draft, CampaignStatus::Scheduled];

    pub fn can_start_sending(self) -> bool {
        Self::SENDABLE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A one-time bulk email send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    /// HTML template with `{{placeholders}}`
    pub html_content: String,
    pub from: Sender,
    pub status: CampaignStatus,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Recipient link
// =============================================================================

/// Per-recipient delivery state of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    Pending,
    /// Claimed by an orchestrator run
    InProgress,
    Sent,
    Failed,
}

/// Join between a campaign and one contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientLink {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub contact_id: Uuid,
    pub track_token: TrackToken,
    pub status: LinkStatus,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RecipientLink {
    /// Fresh PENDING link with a newly generated token.
    pub fn new(campaign_id: Uuid, contact_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            contact_id,
            track_token: TrackToken::generate(),
            status: LinkStatus::Pending,
            sent_at: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sendable_states() {
        assert!(CampaignStatus::Draft.can_start_sending());
        assert!(CampaignStatus::Scheduled.can_start_sending());
        assert!(!CampaignStatus::Sending.can_start_sending());
        assert!(!CampaignStatus::Completed.can_start_sending());
        assert!(!CampaignStatus::Failed.can_start_sending());
    }

    #[test]
    fn test_sender_mailbox() {
        assert_eq!(
            Sender::new("news@example.com", "Example News").mailbox(),
            "Example News <news@example.com>"
        );
        assert_eq!(Sender::new("news@example.com", " ").mailbox(), "news@example.com");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&CampaignStatus::Sending).unwrap();
        assert_eq!(json, "\"SENDING\"");
        let parsed: LinkStatus = serde_json::from_str("\"IN_PROGRESS\"").unwrap();
        assert_eq!(parsed, LinkStatus::InProgress);
    }
}
