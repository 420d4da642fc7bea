//! Stripe REST client.
//!
//! Implements [`PaymentProvider`] for the two reads reconciliation needs:
//! the full subscription behind a checkout and a checkout's line items.
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::new(api_key).with_timeout(Duration::from_secs(10));
//! let client = StripeClient::new(config)?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use crate::domain::billing::wire::{StripeLineItem, StripeList, StripeSubscription};
use crate::domain::billing::SubscriptionDetails;
use crate::ports::{PaymentError, PaymentErrorCode, PaymentProvider};

/// Default Stripe API host.
pub const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Base URL for the API. Overridden in tests.
    api_base_url: String,

    /// Per-request deadline.
    timeout: Duration,
}

impl StripeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_key", &"[REDACTED]")
            .field("api_base_url", &self.api_base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Stripe implementation of the PaymentProvider port.
pub struct StripeClient {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self, PaymentError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// GET a resource. `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, PaymentError> {
        let url = format!("{}{}", self.config.api_base_url, path);
        let response = self
            .http_client
            .get(&url)
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::from_status(status.as_u16(), body));
        }

        response.json::<T>().await.map(Some).map_err(|e| {
            PaymentError::new(
                PaymentErrorCode::ProviderError,
                format!("unparseable response from {}: {}", path, e),
            )
        })
    }
}

fn map_transport_error(err: reqwest::Error) -> PaymentError {
    if err.is_timeout() {
        PaymentError::timeout(err.to_string())
    } else {
        PaymentError::network(err.to_string())
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionDetails>, PaymentError> {
        let path = format!("/v1/subscriptions/{}", subscription_id);
        let Some(subscription) = self.get_json::<StripeSubscription>(&path).await? else {
            return Ok(None);
        };

        SubscriptionDetails::try_from(subscription)
            .map(Some)
            .map_err(|e| PaymentError::new(PaymentErrorCode::ProviderError, e.to_string()))
    }

    async fn list_checkout_price_ids(&self, session_id: &str) -> Result<Vec<String>, PaymentError> {
        let path = format!("/v1/checkout/sessions/{}/line_items?limit=100", session_id);
        let items = self
            .get_json::<StripeList<StripeLineItem>>(&path)
            .await?
            .ok_or_else(|| PaymentError::not_found("checkout session"))?;

        Ok(items
            .data
            .into_iter()
            .filter_map(|item| item.price.map(|p| p.id))
            .collect())
    }
}
