//! Drip sequences: enrollment management and the step scheduler.

pub mod enroll;
pub mod worker;

pub use enroll::{EnrollSummary, SequenceService};
pub use worker::{SchedulerHandle, SchedulerSettings, SequenceWorker, TickReport};
