//! Domain types for campaigns, sequences, contacts and events.
//!
//! These are the records the engine reads and mutates through the
//! [`store`](crate::store) traits. Status enums serialize as
//! `SCREAMING_SNAKE_CASE` to match the persisted layout.

pub mod campaign;
pub mod contact;
pub mod event;
pub mod sequence;

pub use campaign::{Campaign, CampaignStatus, LinkStatus, RecipientLink, Sender};
pub use contact::{Contact, Variables};
pub use event::{Attribution, Event, EventType, RequestContext};
pub use sequence::{
    Enrollment, EnrollmentStatus, ExecutionStatus, Schedule, Sequence, SequenceStatus,
    SequenceStep, StepDraft, StepExecution, Trigger, TriggerType,
};
