//! In-process store.
//!
//! All state lives behind one mutex, so every trait method is atomic with
//! respect to every other. That is what makes the claim operations safe to
//! race from several orchestrator runs or scheduler ticks.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::{CampaignStore, ContactStore, EventStore, SequenceStore};
use crate::error::StoreError;
use crate::model::{
    Attribution, Campaign, CampaignStatus, Contact, Enrollment, EnrollmentStatus, Event,
    EventType, ExecutionStatus, LinkStatus, RecipientLink, Sequence, SequenceStep, StepDraft,
    StepExecution,
};
use crate::token::TrackToken;

#[derive(Debug, Clone, Copy)]
enum TokenOwner {
    Link(Uuid),
    Execution(Uuid),
}

#[derive(Default)]
struct Inner {
    contacts: HashMap<Uuid, Contact>,
    contact_order: Vec<Uuid>,
    campaigns: HashMap<Uuid, Campaign>,
    links: HashMap<Uuid, RecipientLink>,
    link_order: Vec<Uuid>,
    sequences: HashMap<Uuid, Sequence>,
    /// Every step ever created, current or replaced
    steps: HashMap<Uuid, SequenceStep>,
    /// Current step ids per sequence, in step order
    current_steps: HashMap<Uuid, Vec<Uuid>>,
    enrollments: HashMap<Uuid, Enrollment>,
    executions: HashMap<Uuid, StepExecution>,
    tokens: HashMap<TrackToken, TokenOwner>,
    events: Vec<Event>,
}

impl Inner {
    fn sequence_of_execution(&self, execution: &StepExecution) -> Option<Uuid> {
        self.enrollments
            .get(&execution.enrollment_id)
            .map(|e| e.sequence_id)
    }

    fn open_execution_status(&self, sequence_id: Uuid) -> Option<ExecutionStatus> {
        let mut found = None;
        for execution in self.executions.values() {
            if execution.status.is_terminal()
                || self.sequence_of_execution(execution) != Some(sequence_id)
            {
                continue;
            }
            if execution.status == ExecutionStatus::InProgress {
                return Some(ExecutionStatus::InProgress);
            }
            found = Some(execution.status);
        }
        found
    }

    fn ensure_tokens_free<'a>(
        &self,
        tokens: impl IntoIterator<Item = &'a TrackToken>,
    ) -> Result<(), StoreError> {
        for token in tokens {
            if self.tokens.contains_key(token) {
                return Err(StoreError::Conflict("duplicate track token".to_string()));
            }
        }
        Ok(())
    }
}

/// Mutex-backed implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    #[cfg(test)]
    fail_appends: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Build a store from a seed snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, StoreError> {
        let store = Self::new();
        for contact in snapshot.contacts {
            store.insert_contact(contact)?;
        }
        for campaign in snapshot.campaigns {
            store.insert_campaign(campaign)?;
        }
        for seed in snapshot.sequences {
            let sequence_id = seed.sequence.id;
            let steps = seed
                .steps
                .into_iter()
                .enumerate()
                .map(|(order, draft)| draft.into_step(sequence_id, order as u32))
                .collect();
            store.insert_sequence(seed.sequence, steps)?;
        }
        Ok(store)
    }

    // -------------------------------------------------------------------------
    // Seeding
    // -------------------------------------------------------------------------

    pub fn insert_contact(&self, contact: Contact) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.contacts.insert(contact.id, contact.clone()).is_none() {
            inner.contact_order.push(contact.id);
        }
        Ok(())
    }

    pub fn insert_campaign(&self, campaign: Campaign) -> Result<(), StoreError> {
        self.lock()?.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    pub fn insert_sequence(
        &self,
        sequence: Sequence,
        mut steps: Vec<SequenceStep>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        steps.sort_by_key(|s| s.step_order);
        let ids = steps.iter().map(|s| s.id).collect();
        for step in steps {
            inner.steps.insert(step.id, step);
        }
        inner.current_steps.insert(sequence.id, ids);
        inner.sequences.insert(sequence.id, sequence);
        Ok(())
    }

    pub fn set_sequence_status(
        &self,
        id: Uuid,
        status: crate::model::SequenceStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let sequence = inner
            .sequences
            .get_mut(&id)
            .ok_or(StoreError::NotFound("sequence"))?;
        sequence.status = status;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn events(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self.lock()?.events.clone())
    }

    pub fn link(&self, id: Uuid) -> Result<Option<RecipientLink>, StoreError> {
        Ok(self.lock()?.links.get(&id).cloned())
    }

    pub fn links_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<RecipientLink>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .link_order
            .iter()
            .filter_map(|id| inner.links.get(id))
            .filter(|l| l.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    pub fn execution(&self, id: Uuid) -> Result<Option<StepExecution>, StoreError> {
        Ok(self.lock()?.executions.get(&id).cloned())
    }

    #[cfg(test)]
    pub(crate) fn fail_event_appends(&self) {
        self.fail_appends
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn contact(&self, id: Uuid) -> Result<Option<Contact>, StoreError> {
        Ok(self.lock()?.contacts.get(&id).cloned())
    }

    async fn all_contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .contact_order
            .iter()
            .filter_map(|id| inner.contacts.get(id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn campaign(&self, id: Uuid) -> Result<Option<Campaign>, StoreError> {
        Ok(self.lock()?.campaigns.get(&id).cloned())
    }

    async fn transition_campaign(
        &self,
        id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Campaign>, StoreError> {
        let mut inner = self.lock()?;
        let campaign = inner
            .campaigns
            .get_mut(&id)
            .ok_or(StoreError::NotFound("campaign"))?;
        if !from.contains(&campaign.status) {
            return Ok(None);
        }
        campaign.status = to;
        if to.is_terminal() {
            campaign.sent_at = Some(at);
        }
        Ok(Some(campaign.clone()))
    }

    async fn pending_links(&self, campaign_id: Uuid) -> Result<Vec<RecipientLink>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .link_order
            .iter()
            .filter_map(|id| inner.links.get(id))
            .filter(|l| l.campaign_id == campaign_id && l.status == LinkStatus::Pending)
            .cloned()
            .collect())
    }

    async fn insert_links(
        &self,
        links: Vec<RecipientLink>,
    ) -> Result<Vec<RecipientLink>, StoreError> {
        let mut inner = self.lock()?;
        inner.ensure_tokens_free(links.iter().map(|l| &l.track_token))?;

        let mut inserted = Vec::with_capacity(links.len());
        for link in links {
            let exists = inner
                .links
                .values()
                .any(|l| l.campaign_id == link.campaign_id && l.contact_id == link.contact_id);
            if exists {
                continue;
            }
            inner
                .tokens
                .insert(link.track_token.clone(), TokenOwner::Link(link.id));
            inner.link_order.push(link.id);
            inner.links.insert(link.id, link.clone());
            inserted.push(link);
        }
        Ok(inserted)
    }

    async fn claim_link(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let link = inner
            .links
            .get_mut(&id)
            .ok_or(StoreError::NotFound("recipient link"))?;
        if link.status != LinkStatus::Pending {
            return Ok(false);
        }
        link.status = LinkStatus::InProgress;
        Ok(true)
    }

    async fn finish_link(
        &self,
        id: Uuid,
        status: LinkStatus,
        at: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let link = inner
            .links
            .get_mut(&id)
            .ok_or(StoreError::NotFound("recipient link"))?;
        if link.status != LinkStatus::InProgress {
            return Err(StoreError::Conflict(format!(
                "link {id} is {:?}, not in progress",
                link.status
            )));
        }
        link.status = status;
        link.error = error;
        if status == LinkStatus::Sent {
            link.sent_at = Some(at);
        }
        Ok(())
    }

    async fn link_by_token(&self, token: &TrackToken) -> Result<Option<RecipientLink>, StoreError> {
        let inner = self.lock()?;
        Ok(match inner.tokens.get(token) {
            Some(TokenOwner::Link(id)) => inner.links.get(id).cloned(),
            _ => None,
        })
    }
}

#[async_trait]
impl SequenceStore for MemoryStore {
    async fn sequence(&self, id: Uuid) -> Result<Option<Sequence>, StoreError> {
        Ok(self.lock()?.sequences.get(&id).cloned())
    }

    async fn steps(&self, sequence_id: Uuid) -> Result<Vec<SequenceStep>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .current_steps
            .get(&sequence_id)
            .map(|ids| ids.iter().filter_map(|id| inner.steps.get(id)).cloned().collect())
            .unwrap_or_default())
    }

    async fn step(&self, id: Uuid) -> Result<Option<SequenceStep>, StoreError> {
        Ok(self.lock()?.steps.get(&id).cloned())
    }

    async fn replace_steps(
        &self,
        sequence_id: Uuid,
        mut steps: Vec<SequenceStep>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.sequences.contains_key(&sequence_id) {
            return Err(StoreError::NotFound("sequence"));
        }
        if let Some(status) = inner.open_execution_status(sequence_id) {
            return Err(StoreError::Conflict(format!(
                "sequence has {status:?} executions"
            )));
        }
        steps.sort_by_key(|s| s.step_order);
        let ids = steps.iter().map(|s| s.id).collect();
        for step in steps {
            inner.steps.insert(step.id, step);
        }
        inner.current_steps.insert(sequence_id, ids);
        Ok(())
    }

    async fn open_execution_status(
        &self,
        sequence_id: Uuid,
    ) -> Result<Option<ExecutionStatus>, StoreError> {
        Ok(self.lock()?.open_execution_status(sequence_id))
    }

    async fn enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, StoreError> {
        Ok(self.lock()?.enrollments.get(&id).cloned())
    }

    async fn find_enrollment(
        &self,
        sequence_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(self
            .lock()?
            .enrollments
            .values()
            .find(|e| e.sequence_id == sequence_id && e.contact_id == contact_id)
            .cloned())
    }

    async fn create_enrollment(
        &self,
        enrollment: Enrollment,
        executions: Vec<StepExecution>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let duplicate = inner.enrollments.values().any(|e| {
            e.sequence_id == enrollment.sequence_id && e.contact_id == enrollment.contact_id
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "contact {} already enrolled",
                enrollment.contact_id
            )));
        }
        inner.ensure_tokens_free(executions.iter().map(|e| &e.track_token))?;

        for execution in executions {
            inner
                .tokens
                .insert(execution.track_token.clone(), TokenOwner::Execution(execution.id));
            inner.executions.insert(execution.id, execution);
        }
        inner.enrollments.insert(enrollment.id, enrollment);
        Ok(())
    }

    async fn set_enrollment_status(
        &self,
        id: Uuid,
        status: EnrollmentStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let enrollment = inner
            .enrollments
            .get_mut(&id)
            .ok_or(StoreError::NotFound("enrollment"))?;
        enrollment.status = status;
        Ok(())
    }

    async fn complete_enrollment(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let enrollment = inner
            .enrollments
            .get_mut(&id)
            .ok_or(StoreError::NotFound("enrollment"))?;
        if enrollment.completed_at.is_some() {
            return Ok(false);
        }
        enrollment.completed_at = Some(at);
        Ok(true)
    }

    async fn due_executions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let inner = self.lock()?;
        let mut due: Vec<StepExecution> = inner
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Pending && e.scheduled_for <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for).then(a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }

    async fn executions_for_enrollment(
        &self,
        enrollment_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let inner = self.lock()?;
        let mut executions: Vec<StepExecution> = inner
            .executions
            .values()
            .filter(|e| e.enrollment_id == enrollment_id)
            .cloned()
            .collect();
        executions.sort_by_key(|e| e.scheduled_for);
        Ok(executions)
    }

    async fn claim_execution(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let execution = inner
            .executions
            .get_mut(&id)
            .ok_or(StoreError::NotFound("step execution"))?;
        if execution.status != ExecutionStatus::Pending {
            return Ok(false);
        }
        execution.status = ExecutionStatus::InProgress;
        Ok(true)
    }

    async fn finish_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        sent_at: Option<DateTime<Utc>>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let execution = inner
            .executions
            .get_mut(&id)
            .ok_or(StoreError::NotFound("step execution"))?;
        if execution.status != ExecutionStatus::InProgress {
            return Err(StoreError::Conflict(format!(
                "execution {id} is {:?}, not in progress",
                execution.status
            )));
        }
        execution.status = status;
        execution.sent_at = sent_at;
        execution.error = error;
        Ok(())
    }

    async fn execution_by_token(
        &self,
        token: &TrackToken,
    ) -> Result<Option<StepExecution>, StoreError> {
        let inner = self.lock()?;
        Ok(match inner.tokens.get(token) {
            Some(TokenOwner::Execution(id)) => inner.executions.get(id).cloned(),
            _ => None,
        })
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append_event(&self, event: Event) -> Result<(), StoreError> {
        #[cfg(test)]
        if self.fail_appends.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Unavailable("event log offline".to_string()));
        }
        self.lock()?.events.push(event);
        Ok(())
    }

    async fn has_event(
        &self,
        kind: EventType,
        attribution: &Attribution,
        contact_id: Uuid,
    ) -> Result<bool, StoreError> {
        Ok(self.lock()?.events.iter().any(|e| {
            e.kind == kind && e.contact_id == contact_id && e.same_source(attribution)
        }))
    }

    async fn find_sent_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<Event>, StoreError> {
        Ok(self
            .lock()?
            .events
            .iter()
            .find(|e| {
                e.kind == EventType::EmailSent
                    && e.metadata.get("message_id").and_then(|v| v.as_str()) == Some(message_id)
            })
            .cloned())
    }
}

// =============================================================================
// Seed snapshot
// =============================================================================

/// JSON seed loaded at startup.
#[derive(Debug, Default, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
    #[serde(default)]
    pub sequences: Vec<SequenceSeed>,
}

/// A sequence with its step list, ordered as given.
#[derive(Debug, Deserialize)]
pub struct SequenceSeed {
    #[serde(flatten)]
    pub sequence: Sequence,
    #[serde(default)]
    pub steps: Vec<StepDraft>,
}
