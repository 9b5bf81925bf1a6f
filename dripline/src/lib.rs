//! Dripline - campaign delivery, drip sequences and engagement tracking.
//!
//! One process hosts both halves of the engine:
//! - the HTTP server: tracking pixel, click redirect, admin send and
//!   enrollment triggers, provider delivery webhook
//! - the sequence scheduler: a periodic tick that delivers due step
//!   executions
//!
//! ## Architecture
//!
//! ```text
//! send trigger → CampaignSender → BulkSender ─┐
//!                                             ├→ DeliveryClient → EmailTransport
//! scheduler tick → SequenceWorker ────────────┘         │
//!                                                       ↓
//! pixel / click / webhook → TrackingService ──────→ event log (Store)
//! ```

pub mod campaign;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod error;
pub mod html;
pub mod model;
pub mod sequence;
pub mod store;
pub mod token;
pub mod tracking;
pub mod util;
pub mod web;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use campaign::{BulkSendSettings, BulkSender, CampaignSender, SendAck, SendHandle};
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use delivery::{DeliveryClient, DeliveryOutcome, EmailTransport, OutboundEmail, ResendTransport};
pub use error::{EngineError, StoreError};
pub use sequence::{SchedulerHandle, SchedulerSettings, SequenceService, SequenceWorker};
pub use store::{MemoryStore, Snapshot, Store};
pub use tracking::TrackingService;
pub use web::{build_router, AppState};
