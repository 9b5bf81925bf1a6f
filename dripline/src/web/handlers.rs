//! HTTP endpoint handlers.
//!
//! Tracking endpoints never fail from the recipient's point of view: the
//! open pixel is always served and a click always redirects, whatever happens
//! while recording the event.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::campaign::CampaignSender;
use crate::error::EngineError;
use crate::sequence::{EnrollSummary, SequenceService};
use crate::tracking::{RequestMeta, TrackingService};
use crate::web::signature::{
    constant_time_compare, is_configured, verify_webhook_signature, ID_HEADER, SIGNATURE_HEADER,
    TIMESTAMP_HEADER,
};
use crate::Config;

/// 1x1 transparent PNG.
pub const TRACKING_PIXEL: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0x64, 0xf8, 0xcf, 0x50,
    0x0f, 0x00, 0x03, 0x86, 0x01, 0x80, 0x5a, 0x34, 0x7d, 0x6b, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45,
    0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

const NO_STORE: &str = "no-store, no-cache, must-revalidate, private";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub campaigns: Arc<CampaignSender>,
    pub sequences: Arc<SequenceService>,
    pub tracking: Arc<TrackingService>,
}

impl AppState {
    pub fn new(
        config: Config,
        campaigns: CampaignSender,
        sequences: SequenceService,
        tracking: TrackingService,
    ) -> Self {
        Self {
            config: Arc::new(config),
            campaigns: Arc::new(campaigns),
            sequences: Arc::new(sequences),
            tracking: Arc::new(tracking),
        }
    }
}

fn error_body(status: StatusCode, kind: &str, message: &str) -> Response {
    (status, Json(json!({ "kind": kind, "message": message }))).into_response()
}

/// Originating client address: first `X-Forwarded-For` hop, else the peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|p| p.ip().to_string()))
}

fn request_meta(headers: &HeaderMap, peer: Option<ConnectInfo<SocketAddr>>) -> RequestMeta {
    RequestMeta {
        ip: client_ip(headers, peer.map(|ConnectInfo(addr)| addr)),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

/// Bearer check for the admin endpoints. Unconfigured means open.
fn authorize(config: &Config, headers: &HeaderMap) -> Result<(), Response> {
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match (provided, config.admin_token.as_deref()) {
        (Some(provided), Some(expected)) if constant_time_compare(provided, expected) => Ok(()),
        (None, Some(_)) => {
            warn!("admin_auth_missing");
            Err(error_body(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "missing bearer token"))
        }
        (Some(_), Some(_)) => {
            warn!("admin_auth_invalid");
            Err(error_body(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "invalid bearer token"))
        }
        (_, None) => {
            // No token configured, allow through
            warn!("admin_auth_not_configured");
            Ok(())
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Tracking
// =============================================================================

fn pixel_response() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, NO_STORE),
        ],
        TRACKING_PIXEL,
    )
        .into_response()
}

/// Open pixel. Always 200 with the PNG.
pub async fn track_open(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let meta = request_meta(&headers, peer);
    if let Err(e) = state.tracking.record_open(&token, &meta).await {
        error!(error = %e, "track_open_failed");
    }
    pixel_response()
}

#[derive(Debug, Deserialize)]
pub struct ClickQuery {
    pub url: Option<String>,
}

/// Percent-encode every byte outside visible ASCII.
fn escape_location(target: &str) -> String {
    let mut escaped = String::with_capacity(target.len());
    for byte in target.bytes() {
        if byte.is_ascii_graphic() {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    escaped
}

fn redirect_to(target: &str) -> Response {
    let location = if target.bytes().all(|b| b.is_ascii_graphic()) {
        target.to_string()
    } else {
        // Absolute URLs get the parser's normalisation
        Url::parse(target)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| escape_location(target))
    };

    match HeaderValue::from_str(&location) {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        Err(_) => error_body(StatusCode::BAD_REQUEST, "VALIDATION", "URL cannot be redirected to"),
    }
}

/// Click redirect. 400 without `url`, otherwise always 302 to it.
pub async fn track_click(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<ClickQuery>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let Some(url) = query.url.filter(|u| !u.is_empty()) else {
        return error_body(StatusCode::BAD_REQUEST, "VALIDATION", "URL parameter is required");
    };

    let meta = request_meta(&headers, peer);
    if let Err(e) = state.tracking.record_click(&token, &url, &meta).await {
        error!(error = %e, "track_click_failed");
    }
    redirect_to(&url)
}

// =============================================================================
// Campaigns and sequences
// =============================================================================

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub message: &'static str,
    pub total_contacts: usize,
}

/// Start a campaign send. Returns 202 once delivery is under way.
pub async fn send_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
) -> Response {
    if let Err(rejection) = authorize(&state.config, &headers) {
        return rejection;
    }

    match state.campaigns.start_send(campaign_id).await {
        Ok(handle) => (
            StatusCode::ACCEPTED,
            Json(SendResponse {
                message: "Campaign sending started",
                total_contacts: handle.ack.total_recipients,
            }),
        )
            .into_response(),
        Err(e) => {
            warn!(campaign_id = %campaign_id, kind = e.kind(), "campaign_send_rejected");
            e.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub contact_ids: Vec<Uuid>,
}

pub async fn enroll_contacts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(sequence_id): Path<Uuid>,
    Json(request): Json<EnrollRequest>,
) -> Response {
    if let Err(rejection) = authorize(&state.config, &headers) {
        return rejection;
    }
    if request.contact_ids.is_empty() {
        return EngineError::Validation("contact_ids must not be empty".to_string())
            .into_response();
    }

    match state
        .sequences
        .enroll_many(sequence_id, &request.contact_ids)
        .await
    {
        Ok(summary) => (StatusCode::OK, Json::<EnrollSummary>(summary)).into_response(),
        Err(e) => e.into_response(),
    }
}

// =============================================================================
// Delivery webhook
// =============================================================================

/// Provider event envelope. Only bounces are acted on.
#[derive(Debug, Deserialize)]
pub struct DeliveryWebhook {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

pub async fn delivery_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if is_configured(&state.config.webhook_signing_secret) {
        let secret = state.config.webhook_signing_secret.as_deref().unwrap_or_default();
        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        if !verify_webhook_signature(
            secret,
            &header_str(ID_HEADER),
            &header_str(TIMESTAMP_HEADER),
            &body,
            &header_str(SIGNATURE_HEADER),
            state.config.webhook_signature_max_age,
        ) {
            warn!("delivery_webhook_signature_invalid");
            return (
                StatusCode::UNAUTHORIZED,
                Json(WebhookResponse {
                    status: "unauthorized",
                }),
            )
                .into_response();
        }
    } else {
        warn!("delivery_webhook_signing_not_configured");
    }

    let webhook: DeliveryWebhook = match serde_json::from_slice(&body) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "delivery_webhook_malformed");
            return error_body(StatusCode::BAD_REQUEST, "VALIDATION", "malformed webhook body");
        }
    };

    info!(kind = %webhook.kind, "delivery_webhook_received");
    if webhook.kind != "email.bounced" {
        return (StatusCode::OK, Json(WebhookResponse { status: "ignored" })).into_response();
    }

    let Some(message_id) = webhook.data.get("email_id").and_then(Value::as_str) else {
        return error_body(StatusCode::BAD_REQUEST, "VALIDATION", "email_id is required");
    };
    let detail = webhook
        .data
        .get("bounce")
        .cloned()
        .unwrap_or(Value::Null);

    match state.tracking.record_bounce(message_id, detail).await {
        Ok(true) => (StatusCode::OK, Json(WebhookResponse { status: "recorded" })).into_response(),
        Ok(false) => (StatusCode::OK, Json(WebhookResponse { status: "unknown" })).into_response(),
        Err(e) => EngineError::from(e).into_response(),
    }
}
