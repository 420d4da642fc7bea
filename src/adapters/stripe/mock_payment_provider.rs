//! Mock payment provider for testing.
//!
//! Configurable implementation of `PaymentProvider` for unit and integration
//! tests. Supports:
//! - Pre-configured subscriptions and checkout line items
//! - Error injection
//! - Call tracking

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::domain::billing::SubscriptionDetails;
use crate::ports::{PaymentError, PaymentProvider};

/// Mock payment provider for testing.
///
/// # Example
///
/// ```ignore
/// let mock = MockPaymentProvider::new();
/// mock.add_subscription(details);
/// mock.set_error(PaymentError::timeout("simulated"));
/// ```
#[derive(Default, Clone)]
pub struct MockPaymentProvider {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    subscriptions: HashMap<String, SubscriptionDetails>,
    checkout_prices: HashMap<String, Vec<String>>,

    /// Error to return on next call.
    next_error: Option<PaymentError>,

    /// Errors returned on every call to a method.
    method_errors: HashMap<String, PaymentError>,

    call_log: Vec<MethodCall>,
}

/// Recorded method call for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<String>,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Add a subscription to the "provider".
    pub fn add_subscription(&self, details: SubscriptionDetails) {
        let id = details.subscription_id.clone();
        self.state().subscriptions.insert(id, details);
    }

    /// Set the line item prices of a checkout session.
    pub fn set_checkout_prices(&self, session_id: &str, prices: Vec<String>) {
        self.state()
            .checkout_prices
            .insert(session_id.to_string(), prices);
    }

    /// Set an error to return on the next call to any method.
    pub fn set_error(&self, error: PaymentError) {
        self.state().next_error = Some(error);
    }

    /// Set an error for a specific method.
    pub fn set_method_error(&self, method: &str, error: PaymentError) {
        self.state()
            .method_errors
            .insert(method.to_string(), error);
    }

    /// Clear all configured errors.
    pub fn clear_errors(&self) {
        let mut state = self.state();
        state.next_error = None;
        state.method_errors.clear();
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Call Tracking
    // ════════════════════════════════════════════════════════════════════════════

    pub fn calls(&self) -> Vec<MethodCall> {
        self.state().call_log.clone()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.state().call_log.iter().any(|c| c.method == method)
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Records a call and returns the injected error, if any.
    fn record(&self, method: &str, args: Vec<String>) -> Result<(), PaymentError> {
        let mut state = self.state();
        state.call_log.push(MethodCall {
            method: method.to_string(),
            args,
        });
        if let Some(error) = state.next_error.take() {
            return Err(error);
        }
        if let Some(error) = state.method_errors.get(method) {
            return Err(error.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionDetails>, PaymentError> {
        self.record("get_subscription", vec![subscription_id.to_string()])?;
        Ok(self.state().subscriptions.get(subscription_id).cloned())
    }

    async fn list_checkout_price_ids(&self, session_id: &str) -> Result<Vec<String>, PaymentError> {
        self.record("list_checkout_price_ids", vec![session_id.to_string()])?;
        Ok(self
            .state()
            .checkout_prices
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::BillingPeriod;
    use crate::domain::foundation::Timestamp;

    fn details(id: &str) -> SubscriptionDetails {
        SubscriptionDetails {
            subscription_id: id.to_string(),
            customer_id: "cus_1".to_string(),
            provider_status: "active".to_string(),
            price_id: Some("price_monthly".to_string()),
            period: BillingPeriod {
                start: Timestamp::from_unix_secs(0).unwrap(),
                end: Timestamp::from_unix_secs(100).unwrap(),
            },
            cancel_at_period_end: false,
        }
    }

    #[tokio::test]
    async fn returns_configured_subscription() {
        let mock = MockPaymentProvider::new();
        mock.add_subscription(details("sub_1"));

        let found = mock.get_subscription("sub_1").await.unwrap();
        assert_eq!(found, Some(details("sub_1")));
        assert!(mock.get_subscription("sub_2").await.unwrap().is_none());
        assert_eq!(mock.call_count("get_subscription"), 2);
    }

    #[tokio::test]
    async fn next_error_fires_once() {
        let mock = MockPaymentProvider::new();
        mock.set_error(PaymentError::timeout("simulated"));

        assert!(mock.list_checkout_price_ids("cs_1").await.is_err());
        assert!(mock.list_checkout_price_ids("cs_1").await.is_ok());
    }

    #[tokio::test]
    async fn method_error_persists_until_cleared() {
        let mock = MockPaymentProvider::new();
        mock.set_method_error("get_subscription", PaymentError::network("down"));

        assert!(mock.get_subscription("sub_1").await.is_err());
        assert!(mock.get_subscription("sub_1").await.is_err());
        mock.clear_errors();
        assert!(mock.get_subscription("sub_1").await.is_ok());
        assert!(mock.was_called("get_subscription"));
    }
}
