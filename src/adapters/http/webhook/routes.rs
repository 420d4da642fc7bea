//! Axum router configuration for the webhook service.

use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    BoxError, Json, Router,
};
use tower::{
    timeout::{error::Elapsed, TimeoutLayer},
    ServiceBuilder,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};

use super::dto::WebhookErrorResponse;
use super::handlers::{handle_stripe_webhook, health, WebhookAppState};
use crate::config::ServerConfig;

/// Webhook routes, mounted under `/webhooks`.
///
/// # Routes
/// - `POST /stripe` - Reconcile a Stripe event (no auth, signature verified)
pub fn webhook_routes() -> Router<WebhookAppState> {
    Router::new().route("/stripe", post(handle_stripe_webhook))
}

/// The complete service router.
///
/// # Routes
/// - `GET /health`
/// - `POST /webhooks/stripe`
///
/// Every request gets an `x-request-id`, a trace span and a deadline.
/// Webhook bodies above `server.max_body_bytes` are refused with 413.
pub fn webhook_router(state: WebhookAppState, server: &ServerConfig) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .nest(
            "/webhooks",
            webhook_routes().layer(DefaultBodyLimit::max(server.max_body_bytes)),
        )
        .with_state(state);
    with_service_layers(router, server.request_timeout())
}

/// Request id, tracing and the deadline, outermost first.
///
/// A missed deadline answers 503 so Stripe redelivers the event.
fn with_service_layers(router: Router, timeout: Duration) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(HandleErrorLayer::new(handle_middleware_error))
            .layer(TimeoutLayer::new(timeout)),
    )
}

async fn handle_middleware_error(err: BoxError) -> Response {
    if err.is::<Elapsed>() {
        warn!("request exceeded its deadline");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(WebhookErrorResponse::new("Request timed out")),
        )
            .into_response();
    }
    error!(error = %err, "unhandled middleware error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(WebhookErrorResponse::new("Internal server error")),
    )
        .into_response()
}
