//! Webhook error types.
//!
//! HTTP status decides whether the provider redelivers: 2xx and 4xx stop
//! delivery, 5xx triggers a retry.

use axum::http::StatusCode;
use thiserror::Error;

use crate::domain::foundation::DomainError;

/// Errors that occur during webhook processing.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// No signature header on the request.
    #[error("Missing Stripe-Signature header")]
    MissingSignature,

    /// Webhook signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Webhook timestamp is older than the tolerance window.
    #[error("Timestamp out of range")]
    TimestampOutOfRange,

    /// Event timestamp is in the future beyond clock skew tolerance.
    #[error("Invalid timestamp")]
    InvalidTimestamp,

    /// Failed to parse webhook payload or signature header.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Required field missing from webhook payload.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Fetching detail from the payment provider failed.
    #[error("Payment provider error: {message}")]
    Provider { message: String, retryable: bool },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),
}

impl WebhookError {
    /// Returns true if the provider should redeliver this webhook.
    pub fn is_retryable(&self) -> bool {
        match self {
            WebhookError::Database(_) => true,
            WebhookError::Provider { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Maps the error to an HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        if self.is_retryable() {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::BAD_REQUEST
        }
    }

    /// True for failures of the authenticity check.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            WebhookError::MissingSignature
                | WebhookError::InvalidSignature
                | WebhookError::TimestampOutOfRange
                | WebhookError::InvalidTimestamp
        )
    }
}

impl From<DomainError> for WebhookError {
    fn from(err: DomainError) -> Self {
        WebhookError::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ══════════════════════════════════════════════════════════════
    // Display
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn parse_error_displays_message() {
        let err = WebhookError::ParseError("invalid JSON".to_string());
        assert_eq!(format!("{}", err), "Parse error: invalid JSON");
    }

    #[test]
    fn missing_field_displays_field_name() {
        let err = WebhookError::MissingField("subscription");
        assert_eq!(format!("{}", err), "Missing field: subscription");
    }

    #[test]
    fn provider_error_displays_message() {
        let err = WebhookError::Provider {
            message: "timed out".to_string(),
            retryable: true,
        };
        assert_eq!(format!("{}", err), "Payment provider error: timed out");
    }

    // ══════════════════════════════════════════════════════════════
    // Retryability and status
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn database_error_is_retried() {
        let err = WebhookError::Database("connection failed".to_string());
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn transient_provider_error_is_retried() {
        let err = WebhookError::Provider {
            message: "503".to_string(),
            retryable: true,
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn permanent_provider_error_is_rejected() {
        let err = WebhookError::Provider {
            message: "subscription not found".to_string(),
            retryable: false,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn signature_failures_are_bad_requests() {
        for err in [
            WebhookError::MissingSignature,
            WebhookError::InvalidSignature,
            WebhookError::TimestampOutOfRange,
            WebhookError::InvalidTimestamp,
        ] {
            assert!(err.is_authentication_failure());
            assert!(!err.is_retryable());
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn malformed_payload_is_bad_request() {
        let err = WebhookError::MissingField("data.object.customer");
        assert!(!err.is_authentication_failure());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn domain_error_becomes_retryable_database_error() {
        let err: WebhookError = DomainError::database("deadlock detected").into();
        assert!(matches!(err, WebhookError::Database(ref m) if m.contains("deadlock")));
        assert!(err.is_retryable());
    }
}
