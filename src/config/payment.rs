//! Payment configuration

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;

/// Payment configuration (Stripe)
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Stripe API key
    pub stripe_api_key: SecretString,

    /// Stripe webhook signing secret
    pub stripe_webhook_secret: SecretString,

    /// Stripe API base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Deadline for Stripe API calls in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum accepted webhook age in seconds
    #[serde(default = "default_signature_tolerance")]
    pub signature_tolerance_secs: i64,

    /// Skip test-mode events
    #[serde(default)]
    pub require_livemode: bool,

    /// YAML price table replacing the built-in one
    pub price_plan_file: Option<PathBuf>,
}

impl PaymentConfig {
    /// Check if using Stripe test mode
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key.expose_secret().starts_with("sk_test_")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate payment configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        let api_key = self.stripe_api_key.expose_secret();
        let webhook_secret = self.stripe_webhook_secret.expose_secret();

        if api_key.is_empty() {
            return Err(ValidationError::MissingRequired("STRIPE_API_KEY"));
        }
        if webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired("STRIPE_WEBHOOK_SECRET"));
        }

        // Verify key prefixes for safety
        if !api_key.starts_with("sk_") {
            return Err(ValidationError::InvalidStripeKey);
        }
        if !webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidStripeWebhookSecret);
        }

        if !self.api_base_url.starts_with("https://") && !self.api_base_url.starts_with("http://") {
            return Err(ValidationError::InvalidApiBaseUrl);
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 60 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.signature_tolerance_secs <= 0 {
            return Err(ValidationError::InvalidSignatureTolerance);
        }

        Ok(())
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            stripe_api_key: SecretString::new(String::new()),
            stripe_webhook_secret: SecretString::new(String::new()),
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout(),
            signature_tolerance_secs: default_signature_tolerance(),
            require_livemode: false,
            price_plan_file: None,
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.stripe.com".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_signature_tolerance() -> i64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: &str, webhook_secret: &str) -> PaymentConfig {
        PaymentConfig {
            stripe_api_key: SecretString::new(api_key.to_string()),
            stripe_webhook_secret: SecretString::new(webhook_secret.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_is_test_mode() {
        assert!(config("sk_test_xxx", "whsec_xxx").is_test_mode());
        assert!(!config("sk_live_xxx", "whsec_xxx").is_test_mode());
        assert!(!config("rk_live_xxx", "whsec_xxx").is_test_mode());
    }

    #[test]
    fn test_validation_missing_api_key() {
        let config = PaymentConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingRequired("STRIPE_API_KEY"))
        ));
    }

    #[test]
    fn test_validation_missing_webhook_secret() {
        let config = config("sk_test_xxx", "");
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingRequired("STRIPE_WEBHOOK_SECRET"))
        ));
    }

    #[test]
    fn test_validation_invalid_api_key_prefix() {
        let config = config("pk_test_xxx", "whsec_xxx"); // Publishable key
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_webhook_secret_prefix() {
        let config = config("sk_test_xxx", "secret_xxx");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_tolerance() {
        let config = PaymentConfig {
            signature_tolerance_secs: 0,
            ..config("sk_test_xxx", "whsec_xxx")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_valid_config() {
        let config = config("sk_test_abcd1234", "whsec_xyz789");
        assert!(config.validate().is_ok());
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = config("sk_live_topsecret", "whsec_topsecret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("topsecret"));
    }
}
