//! Error types shared across the engine.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::model::{CampaignStatus, ExecutionStatus};

/// Failures raised by a persistence adapter.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Engine-level error variants surfaced to callers of the send, enrollment
/// and tracking operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("campaign not found")]
    CampaignNotFound,
    #[error("sequence not found")]
    SequenceNotFound,
    #[error("contact {0} not found")]
    ContactNotFound(Uuid),
    #[error("enrollment not found")]
    EnrollmentNotFound,
    #[error("campaign is {0:?} and cannot be sent")]
    InvalidState(CampaignStatus),
    #[error("no recipients available for this campaign")]
    NoRecipients,
    #[error("contact is already enrolled in this sequence")]
    AlreadyEnrolled,
    #[error("cannot enroll contacts in an inactive sequence")]
    SequenceInactive,
    #[error("sequence steps cannot change while executions are {0:?}")]
    StepsLocked(ExecutionStatus),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error")]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CampaignNotFound => "CAMPAIGN_NOT_FOUND",
            Self::SequenceNotFound => "SEQUENCE_NOT_FOUND",
            Self::ContactNotFound(_) => "CONTACT_NOT_FOUND",
            Self::EnrollmentNotFound => "ENROLLMENT_NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::NoRecipients => "NO_RECIPIENTS",
            Self::AlreadyEnrolled => "ALREADY_ENROLLED",
            Self::SequenceInactive => "SEQUENCE_INACTIVE",
            Self::StepsLocked(_) => "STEPS_LOCKED",
            Self::Validation(_) => "VALIDATION",
            Self::Store(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::CampaignNotFound
            | Self::SequenceNotFound
            | Self::ContactNotFound(_)
            | Self::EnrollmentNotFound => StatusCode::NOT_FOUND,
            Self::InvalidState(_) | Self::AlreadyEnrolled | Self::StepsLocked(_) => {
                StatusCode::CONFLICT
            }
            Self::NoRecipients | Self::SequenceInactive | Self::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if let Self::Store(ref e) = self {
            tracing::error!(error = %e, kind = "INTERNAL", "internal error");
        }
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}
