//! Persistence ports.
//!
//! The engine owns no storage of its own; it talks to these traits. Every
//! status change that guards against double delivery (`claim_link`,
//! `claim_execution`, `transition_campaign`, `create_enrollment`) must be
//! implemented as an atomic compare-and-swap by the adapter.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    Attribution, Campaign, CampaignStatus, Contact, Enrollment, EnrollmentStatus, Event,
    EventType, ExecutionStatus, LinkStatus, RecipientLink, Sequence, SequenceStep, StepExecution,
};
use crate::token::TrackToken;

pub use memory::{MemoryStore, SequenceSeed, Snapshot};

/// Read-only access to contacts.
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn contact(&self, id: Uuid) -> Result<Option<Contact>, StoreError>;
    async fn all_contacts(&self) -> Result<Vec<Contact>, StoreError>;
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn campaign(&self, id: Uuid) -> Result<Option<Campaign>, StoreError>;

    /// Move a campaign to `to` if its status is one of `from`. Returns the
    /// updated campaign, or `None` if the status did not match. Terminal
    /// targets stamp `sent_at`.
    async fn transition_campaign(
        &self,
        id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Campaign>, StoreError>;

    async fn pending_links(&self, campaign_id: Uuid) -> Result<Vec<RecipientLink>, StoreError>;

    /// Insert links, skipping (campaign, contact) pairs that already have one.
    /// Returns the links actually inserted.
    async fn insert_links(
        &self,
        links: Vec<RecipientLink>,
    ) -> Result<Vec<RecipientLink>, StoreError>;

    /// PENDING -> IN_PROGRESS. `false` if someone else got there first.
    async fn claim_link(&self, id: Uuid) -> Result<bool, StoreError>;

    /// IN_PROGRESS -> SENT | FAILED.
    async fn finish_link(
        &self,
        id: Uuid,
        status: LinkStatus,
        at: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    async fn link_by_token(&self, token: &TrackToken) -> Result<Option<RecipientLink>, StoreError>;
}

#[async_trait]
pub trait SequenceStore: Send + Sync {
    async fn sequence(&self, id: Uuid) -> Result<Option<Sequence>, StoreError>;

    /// Current steps ordered by `step_order`.
    async fn steps(&self, sequence_id: Uuid) -> Result<Vec<SequenceStep>, StoreError>;

    /// Any step ever created, including replaced ones.
    async fn step(&self, id: Uuid) -> Result<Option<SequenceStep>, StoreError>;

    /// Swap the current step list. Fails with `Conflict` while any execution
    /// of the sequence is PENDING or IN_PROGRESS.
    async fn replace_steps(
        &self,
        sequence_id: Uuid,
        steps: Vec<SequenceStep>,
    ) -> Result<(), StoreError>;

    /// Status of some not-yet-terminal execution of the sequence, if any.
    async fn open_execution_status(
        &self,
        sequence_id: Uuid,
    ) -> Result<Option<ExecutionStatus>, StoreError>;

    async fn enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, StoreError>;

    async fn find_enrollment(
        &self,
        sequence_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<Enrollment>, StoreError>;

    /// Insert an enrollment with its executions. Fails with `Conflict` if the
    /// contact is already enrolled in the sequence.
    async fn create_enrollment(
        &self,
        enrollment: Enrollment,
        executions: Vec<StepExecution>,
    ) -> Result<(), StoreError>;

    async fn set_enrollment_status(
        &self,
        id: Uuid,
        status: EnrollmentStatus,
    ) -> Result<(), StoreError>;

    /// Stamp `completed_at` unless already set. Returns whether it was set now.
    async fn complete_enrollment(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// PENDING executions with `scheduled_for <= now`, earliest first.
    async fn due_executions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StepExecution>, StoreError>;

    async fn executions_for_enrollment(
        &self,
        enrollment_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError>;

    /// PENDING -> IN_PROGRESS. `false` if someone else got there first.
    async fn claim_execution(&self, id: Uuid) -> Result<bool, StoreError>;

    /// IN_PROGRESS -> SENT | FAILED | SKIPPED.
    async fn finish_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        sent_at: Option<DateTime<Utc>>,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    async fn execution_by_token(
        &self,
        token: &TrackToken,
    ) -> Result<Option<StepExecution>, StoreError>;
}

/// Append-only event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append_event(&self, event: Event) -> Result<(), StoreError>;

    /// Whether an event of `kind` exists for the contact within the same
    /// campaign or sequence.
    async fn has_event(
        &self,
        kind: EventType,
        attribution: &Attribution,
        contact_id: Uuid,
    ) -> Result<bool, StoreError>;

    /// The EMAIL_SENT event carrying the transport's message id.
    async fn find_sent_by_message_id(&self, message_id: &str)
        -> Result<Option<Event>, StoreError>;
}

/// Everything the engine needs from persistence.
pub trait Store: ContactStore + CampaignStore + SequenceStore + EventStore {}

impl<T> Store for T where T: ContactStore + CampaignStore + SequenceStore + EventStore + ?Sized {}
