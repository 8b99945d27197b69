//! HTTP routes for the relay.

use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::Utc;
use hook_relay::{
    InMemoryDeliveryLog, InboundRateLimiter, RelayError, SubscriptionVerifier, VerificationOutcome,
    VerificationRequest, WebhookRelay,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest inbound webhook body accepted.
pub const MAX_WEBHOOK_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The relay pipeline.
    pub relay: Arc<WebhookRelay>,
    /// Handshake verifier holding the relay-wide token.
    pub verifier: SubscriptionVerifier,
    /// Limiter for `/webhook/*`.
    pub rate_limiter: Arc<InboundRateLimiter>,
    /// Delivery records kept for inspection.
    pub delivery_log: Arc<InMemoryDeliveryLog>,
    /// Reverse proxies trusted to append to `X-Forwarded-For`.
    pub trusted_proxy_hops: usize,
    /// Deployment environment name.
    pub environment: String,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    let webhook = Router::new()
        .route("/facebook", get(verify_webhook).post(receive_webhook))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES));

    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/api/test/webhook/{object_id}", post(test_delivery))
        .route("/api/test/status/{object_id}", get(tenant_status))
        .route("/api/deliveries/{request_id}", get(delivery_history))
        .nest("/webhook", webhook)
        .fallback(not_found)
        .with_state(state)
}

async fn service_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "hook-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.environment,
        "endpoints": {
            "health": "GET /health",
            "verify": "GET /webhook/facebook",
            "webhook": "POST /webhook/facebook",
            "test": "POST /api/test/webhook/{object_id}",
            "test_status": "GET /api/test/status/{object_id}",
            "deliveries": "GET /api/deliveries/{request_id}",
        },
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
        "stats": state.relay.stats(),
        "pending_retries": state.relay.scheduler().pending().await,
    }))
}

async fn verify_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(request): Query<VerificationRequest>,
) -> Response {
    info!(
        mode = ?request.mode,
        token_present = request.verify_token.is_some(),
        challenge_present = request.challenge.is_some(),
        user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-"),
        "Webhook verification request"
    );

    match state.verifier.verify(&request) {
        VerificationOutcome::Verified { challenge } => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            challenge,
        )
            .into_response(),
        VerificationOutcome::MissingParameters => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Missing required parameters",
                "required": ["hub.mode", "hub.verify_token", "hub.challenge"],
                "message": "This endpoint expects a subscription verification request",
            })),
        )
            .into_response(),
        VerificationOutcome::Rejected { reasons } => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "Verification failed",
                "reasons": reasons,
            })),
        )
            .into_response(),
    }
}

async fn receive_webhook(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let size = body.len();
    let receipt = state.relay.ingest(body);
    debug!(request_id = %receipt.request_id, size, "Webhook accepted");
    StatusCode::OK
}

async fn test_delivery(State(state): State<AppState>, Path(object_id): Path<String>) -> Response {
    let Some(route) = state.relay.resolve(&object_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "Tenant not found",
                "object_id": object_id,
            })),
        )
            .into_response();
    };

    let now = Utc::now();
    let event = json!({
        "object": "page",
        "entry": [{
            "id": object_id,
            "time": now.timestamp_millis(),
            "messaging": [],
            "changes": [{
                "field": "feed",
                "value": {
                    "item": "status",
                    "verb": "add",
                    "message": "Relay test event",
                    "created_time": now.timestamp(),
                },
            }],
        }],
    });
    let payload = match serde_json::to_vec(&event) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => return error_response(RelayError::from(e)),
    };
    let request_id = format!("test-{}", uuid::Uuid::new_v4());

    match state.relay.deliver_once(&route, &payload, &request_id).await {
        Ok(attempt) => Json(json!({
            "request_id": attempt.request_id,
            "object_id": attempt.object_id,
            "outcome": attempt.outcome,
            "status_code": attempt.status_code,
            "latency_ms": attempt.latency_ms,
            "error": attempt.error,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn tenant_status(State(state): State<AppState>, Path(object_id): Path<String>) -> Response {
    match state.relay.resolve(&object_id).await {
        Some(route) => Json(json!({
            "object_id": object_id,
            "registered": true,
            "callback_url": route.callback_url,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "object_id": object_id,
                "registered": false,
            })),
        )
            .into_response(),
    }
}

async fn delivery_history(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Response {
    let records = state.delivery_log.records_for_request(&request_id).await;
    if records.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No deliveries recorded", "request_id": request_id })),
        )
            .into_response();
    }
    Json(json!({ "request_id": request_id, "attempts": records })).into_response()
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not Found" })))
}

async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = client_key(&request, state.trusted_proxy_hops);
    match state.rate_limiter.acquire(&key).await {
        Ok(()) => next.run(request).await,
        Err(e) => {
            warn!(client = %key, error = %e, "Webhook rate limit exceeded");
            error_response(e)
        }
    }
}

/// Client address for rate limiting.
///
/// Only the last `trusted_hops` `X-Forwarded-For` entries were written by
/// our proxies; anything to their left is client-supplied. The entry
/// `trusted_hops` from the right is used, or the leftmost one when the
/// header is shorter. Falls back to the peer address, then `unknown`.
fn client_key(request: &Request, trusted_hops: usize) -> String {
    if trusted_hops > 0 {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                let hops: Vec<&str> = v
                    .split(',')
                    .map(str::trim)
                    .filter(|hop| !hop.is_empty())
                    .collect();
                let index = hops.len().saturating_sub(trusted_hops);
                hops.get(index).copied()
            });
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn error_response(error: RelayError) -> Response {
    match error {
        RelayError::RateLimited { retry_after_secs } => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            Json(json!({
                "error": "Too Many Requests",
                "retry_after": retry_after_secs,
            })),
        )
            .into_response(),
        RelayError::Configuration(msg) | RelayError::InvalidPayload(msg) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
        }
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": other.to_string() })),
        )
            .into_response(),
    }
}
