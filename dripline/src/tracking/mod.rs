//! Engagement ingestion: opens, clicks and provider bounce reports.
//!
//! A tracking token is resolved to either a campaign recipient link or a
//! sequence step execution. Unknown or malformed tokens are not an error;
//! they simply record nothing.

pub mod geo;

use std::net::IpAddr;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::model::{Attribution, Event, EventType, RequestContext};
use crate::store::{CampaignStore, EventStore, SequenceStore, Store};
use crate::token::TrackToken;
use crate::util::user_agent;

pub use geo::{GeoLocation, GeoLookup, NoGeoLookup, TableGeoLookup};

/// Request facts the HTTP layer hands over.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Who a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedRecipient {
    pub attribution: Attribution,
    pub contact_id: Uuid,
}

pub struct TrackingService {
    store: Arc<dyn Store>,
    geo: Arc<dyn GeoLookup>,
    clock: Arc<dyn Clock>,
}

impl TrackingService {
    pub fn new(store: Arc<dyn Store>, geo: Arc<dyn GeoLookup>, clock: Arc<dyn Clock>) -> Self {
        Self { store, geo, clock }
    }

    pub async fn resolve(&self, raw_token: &str) -> Result<Option<TrackedRecipient>, StoreError> {
        let Some(token) = TrackToken::parse(raw_token) else {
            return Ok(None);
        };

        if let Some(link) = self.store.link_by_token(&token).await? {
            return Ok(Some(TrackedRecipient {
                attribution: Attribution::Campaign {
                    campaign_id: link.campaign_id,
                },
                contact_id: link.contact_id,
            }));
        }

        let Some(execution) = self.store.execution_by_token(&token).await? else {
            return Ok(None);
        };
        let Some(enrollment) = self.store.enrollment(execution.enrollment_id).await? else {
            return Ok(None);
        };
        Ok(Some(TrackedRecipient {
            attribution: Attribution::Sequence {
                sequence_id: enrollment.sequence_id,
                execution_id: execution.id,
            },
            contact_id: enrollment.contact_id,
        }))
    }

    /// Record an open. Every hit is recorded; `firstOpen` marks the first one
    /// per campaign or sequence and contact. Returns whether an event was
    /// appended.
    pub async fn record_open(&self, raw_token: &str, meta: &RequestMeta) -> Result<bool, StoreError> {
        let Some(recipient) = self.resolve(raw_token).await? else {
            debug!("open_token_unknown");
            return Ok(false);
        };

        let seen_before = self
            .store
            .has_event(
                EventType::EmailOpened,
                &recipient.attribution,
                recipient.contact_id,
            )
            .await?;
        let (context, mut metadata) = self.context(meta);
        metadata["firstOpen"] = json!(!seen_before);

        let event = Event::new(
            EventType::EmailOpened,
            recipient.attribution,
            recipient.contact_id,
            self.clock.now(),
        )
        .with_context(context)
        .with_metadata(metadata);
        self.store.append_event(event).await?;

        info!(
            contact_id = %recipient.contact_id,
            first_open = !seen_before,
            "email_opened"
        );
        Ok(true)
    }

    /// Record a click on `url`. Returns whether an event was appended.
    pub async fn record_click(
        &self,
        raw_token: &str,
        url: &str,
        meta: &RequestMeta,
    ) -> Result<bool, StoreError> {
        let Some(recipient) = self.resolve(raw_token).await? else {
            debug!("click_token_unknown");
            return Ok(false);
        };

        let (context, mut metadata) = self.context(meta);
        metadata["url"] = json!(url);

        let event = Event::new(
            EventType::EmailClicked,
            recipient.attribution,
            recipient.contact_id,
            self.clock.now(),
        )
        .with_context(context)
        .with_metadata(metadata);
        self.store.append_event(event).await?;

        info!(contact_id = %recipient.contact_id, url = url, "email_clicked");
        Ok(true)
    }

    /// Attribute a provider bounce report through the EMAIL_SENT event that
    /// carries the same message id. Unknown ids are ignored.
    pub async fn record_bounce(&self, message_id: &str, detail: Value) -> Result<bool, StoreError> {
        let Some(sent) = self.store.find_sent_by_message_id(message_id).await? else {
            debug!(message_id = message_id, "bounce_message_unknown");
            return Ok(false);
        };
        let Some(attribution) = sent.attribution() else {
            return Ok(false);
        };

        let event = Event::new(
            EventType::EmailBounced,
            attribution,
            sent.contact_id,
            self.clock.now(),
        )
        .with_metadata(json!({ "message_id": message_id, "bounce": detail }));
        self.store.append_event(event).await?;

        info!(
            contact_id = %sent.contact_id,
            message_id = message_id,
            "email_bounced"
        );
        Ok(true)
    }

    fn context(&self, meta: &RequestMeta) -> (RequestContext, Value) {
        let location = meta
            .ip
            .as_deref()
            .and_then(|ip| ip.parse::<IpAddr>().ok())
            .and_then(|ip| self.geo.lookup(ip))
            .unwrap_or_default();
        let agent = user_agent::parse(meta.user_agent.as_deref().unwrap_or_default());

        let context = RequestContext {
            ip: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
            country: location.country,
            city: location.city,
            device: Some(agent.device_type.to_string()),
        };
        let metadata = json!({
            "browser": agent.browser,
            "os": agent.os,
        });
        (context, metadata)
    }
}
