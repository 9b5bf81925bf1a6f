//! HTTP surface: tracking endpoints, admin triggers and the delivery webhook.

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{AppState, HealthResponse, WebhookResponse, TRACKING_PIXEL};
pub use signature::{sign_payload, verify_webhook_signature};

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/track/open/:token", get(handlers::track_open))
        .route("/track/click/:token", get(handlers::track_click))
        .route("/campaigns/:id/send", post(handlers::send_campaign))
        .route("/sequences/:id/enrollments", post(handlers::enroll_contacts))
        .route("/webhooks/delivery", post(handlers::delivery_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
