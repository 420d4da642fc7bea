//! HTTP handlers for the webhook endpoint.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use crate::application::{ReconcileWebhookCommand, ReconcileWebhookHandler};
use crate::domain::billing::WebhookError;

use super::dto::{HealthResponse, WebhookAck, WebhookErrorResponse};

/// Header carrying the provider signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared state for the webhook router. Cloned per request.
#[derive(Clone)]
pub struct WebhookAppState {
    pub reconcile_handler: Arc<ReconcileWebhookHandler>,
}

impl WebhookAppState {
    pub fn new(reconcile_handler: Arc<ReconcileWebhookHandler>) -> Self {
        Self { reconcile_handler }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Handlers
// ════════════════════════════════════════════════════════════════════════════════

/// POST /webhooks/stripe - Reconcile one Stripe event.
///
/// The body is taken as raw bytes; the signature covers them exactly.
pub async fn handle_stripe_webhook(
    State(state): State<WebhookAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingSignature)?;

    let cmd = ReconcileWebhookCommand {
        payload: body.to_vec(),
        signature: signature.to_string(),
    };
    state.reconcile_handler.handle(cmd).await?;

    Ok((StatusCode::OK, Json(WebhookAck::received())))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// Converts webhook errors to HTTP responses. 4xx stops redelivery, 5xx asks
/// for it.
pub struct WebhookApiError(WebhookError);

impl From<WebhookError> for WebhookApiError {
    fn from(err: WebhookError) -> Self {
        Self(err)
    }
}

impl IntoResponse for WebhookApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.0.status_code();
        // Infrastructure detail stays in the logs.
        let message = if self.0.is_retryable() {
            "Temporary failure, retry later".to_string()
        } else {
            self.0.to_string()
        };
        (status, Json(WebhookErrorResponse::new(message))).into_response()
    }
}
