//! Delivery client: one message through the transport, one event in the log.

pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::model::{Attribution, Event, EventType};
use crate::store::{EventStore, Store};

pub use transport::{EmailTransport, OutboundEmail, ResendTransport, TransportError};

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { message_id: String },
    Failed { error: String },
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// Stateless wrapper around the transport, shared by campaigns and sequences.
#[derive(Clone)]
pub struct DeliveryClient {
    transport: Arc<dyn EmailTransport>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl DeliveryClient {
    pub fn new(
        transport: Arc<dyn EmailTransport>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            clock,
            timeout,
        }
    }

    /// Send one message and append EMAIL_SENT or EMAIL_FAILED.
    ///
    /// Transport errors never escape: they become a `Failed` outcome. Only a
    /// failure to record the event is returned as an error.
    pub async fn send_one(
        &self,
        attribution: Attribution,
        contact_id: Uuid,
        email: OutboundEmail,
    ) -> Result<DeliveryOutcome, StoreError> {
        let result = match tokio::time::timeout(self.timeout, self.transport.send(&email)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        };

        let now = self.clock.now();
        match result {
            Ok(message_id) => {
                info!(
                    contact_id = %contact_id,
                    message_id = %message_id,
                    "email_sent"
                );
                let event = Event::new(EventType::EmailSent, attribution, contact_id, now)
                    .with_metadata(json!({ "message_id": message_id }));
                self.store.append_event(event).await?;
                Ok(DeliveryOutcome::Sent { message_id })
            }
            Err(e) => {
                let error = e.to_string();
                warn!(
                    contact_id = %contact_id,
                    to = %email.to,
                    error = %error,
                    "email_send_failed"
                );
                let event = Event::new(EventType::EmailFailed, attribution, contact_id, now)
                    .with_metadata(json!({ "error": error, "to": email.to }));
                self.store.append_event(event).await?;
                Ok(DeliveryOutcome::Failed { error })
            }
        }
    }
}
