//! Append-only delivery and engagement events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    EmailSent,
    EmailOpened,
    #[serde(alias = "LINK_CLICKED")]
    EmailClicked,
    EmailBounced,
    EmailFailed,
}

/// What an event is about: a campaign recipient or a sequence execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    Campaign {
        campaign_id: Uuid,
    },
    Sequence {
        sequence_id: Uuid,
        execution_id: Uuid,
    },
}

/// Request-derived context of an engagement hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default)]
    pub campaign_id: Option<Uuid>,
    #[serde(default)]
    pub sequence_id: Option<Uuid>,
    #[serde(default)]
    pub execution_id: Option<Uuid>,
    pub contact_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub context: RequestContext,
    /// Type-specific payload (message id, error, url, firstOpen, ...)
    #[serde(default)]
    pub metadata: Value,
}

impl Event {
    pub fn new(
        kind: EventType,
        attribution: Attribution,
        contact_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let (campaign_id, sequence_id, execution_id) = match attribution {
            Attribution::Campaign { campaign_id } => (Some(campaign_id), None, None),
            Attribution::Sequence {
                sequence_id,
                execution_id,
            } => (None, Some(sequence_id), Some(execution_id)),
        };

        Self {
            id: Uuid::new_v4(),
            kind,
            campaign_id,
            sequence_id,
            execution_id,
            contact_id,
            occurred_at,
            context: RequestContext::default(),
            metadata: Value::Null,
        }
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn attribution(&self) -> Option<Attribution> {
        match (self.campaign_id, self.sequence_id, self.execution_id) {
            (Some(campaign_id), _, _) => Some(Attribution::Campaign { campaign_id }),
            (None, Some(sequence_id), Some(execution_id)) => Some(Attribution::Sequence {
                sequence_id,
                execution_id,
            }),
            _ => None,
        }
    }

    /// Whether this event belongs to the same campaign or sequence as `other`.
    /// Execution-level identity is deliberately ignored.
    pub fn same_source(&self, other: &Attribution) -> bool {
        match *other {
            Attribution::Campaign { campaign_id } => self.campaign_id == Some(campaign_id),
            Attribution::Sequence { sequence_id, .. } => self.sequence_id == Some(sequence_id),
        }
    }
}
