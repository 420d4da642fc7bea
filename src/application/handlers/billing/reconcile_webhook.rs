//! ReconcileWebhookHandler - Command handler for payment provider webhooks.
//!
//! Verifies the raw body, classifies the event and routes it to the matching
//! reconciler. Each reconciler finishes with a single `BillingStore::apply`.

use tracing::{debug, error, info, warn};

use crate::domain::billing::{
    classify, ApplyOutcome, BillingEvent, StripeEvent, StripeWebhookVerifier, WebhookError,
};
use crate::domain::foundation::UserId;

use super::{
    checkout_completed, invoice_failed, invoice_paid, payment_succeeded, subscription_canceled,
    subscription_changed, ReconciliationContext,
};

/// Command to reconcile one webhook delivery.
#[derive(Debug, Clone)]
pub struct ReconcileWebhookCommand {
    /// Raw request body, exactly as received.
    pub payload: Vec<u8>,
    /// `Stripe-Signature` header value.
    pub signature: String,
}

/// Result of a reconciled delivery. Every variant is acknowledged with 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The store ran the event's unit of work.
    Applied { user_id: UserId, outcome: ApplyOutcome },
    /// No user matched the event's customer, email or id.
    UserNotFound { reference: String },
    /// Nothing to do for this event.
    Ignored { reason: String },
}

/// Handler for Stripe webhook deliveries.
pub struct ReconcileWebhookHandler {
    verifier: StripeWebhookVerifier,
    context: ReconciliationContext,
    require_livemode: bool,
}

impl ReconcileWebhookHandler {
    pub fn new(verifier: StripeWebhookVerifier, context: ReconciliationContext) -> Self {
        Self {
            verifier,
            context,
            require_livemode: false,
        }
    }

    /// Acknowledge and skip test-mode events.
    pub fn with_require_livemode(mut self, require_livemode: bool) -> Self {
        self.require_livemode = require_livemode;
        self
    }

    pub async fn handle(
        &self,
        cmd: ReconcileWebhookCommand,
    ) -> Result<ReconcileOutcome, WebhookError> {
        // 1. Authenticate the raw body before looking at it
        let event = self
            .verifier
            .verify_and_parse(&cmd.payload, &cmd.signature)
            .map_err(|e| {
                if e.is_authentication_failure() {
                    warn!(error = %e, "webhook authentication failed");
                } else {
                    warn!(error = %e, "signed webhook body could not be parsed");
                }
                e
            })?;

        // 2. Reconcile
        let result = self.reconcile(&event).await;
        match &result {
            Err(e) if e.is_retryable() => {
                error!(event_id = %event.id, event_type = %event.event_type, error = %e, "transient failure, provider will redeliver")
            }
            Err(e) => {
                warn!(event_id = %event.id, event_type = %event.event_type, error = %e, "event rejected")
            }
            Ok(_) => {}
        }
        result
    }

    /// Reconciles an already verified event.
    pub async fn reconcile(&self, event: &StripeEvent) -> Result<ReconcileOutcome, WebhookError> {
        let classified = classify(event)?;
        let event_id = classified.event_id.as_str();
        let occurred_at = classified.occurred_at;

        if self.require_livemode && !classified.livemode {
            debug!(event_id, "test-mode event skipped");
            return Ok(ReconcileOutcome::Ignored {
                reason: "test-mode event".to_string(),
            });
        }

        debug!(event_id, event_type = %classified.event_type, kind = classified.event.kind(), "reconciling");

        let ctx = &self.context;
        match &classified.event {
            BillingEvent::CheckoutCompleted(checkout) => {
                checkout_completed::reconcile(ctx, event_id, occurred_at, checkout).await
            }
            BillingEvent::SubscriptionChanged(details) => {
                subscription_changed::reconcile(ctx, event_id, occurred_at, details).await
            }
            BillingEvent::SubscriptionCanceled(details) => {
                subscription_canceled::reconcile(ctx, event_id, occurred_at, details).await
            }
            BillingEvent::InvoicePaid(invoice) => {
                invoice_paid::reconcile(ctx, event_id, occurred_at, invoice).await
            }
            BillingEvent::InvoiceFailed(invoice) => {
                invoice_failed::reconcile(ctx, event_id, occurred_at, invoice).await
            }
            BillingEvent::PaymentSucceeded(payment) => {
                payment_succeeded::reconcile(ctx, event_id, occurred_at, payment).await
            }
            BillingEvent::Ignored { reason } => {
                info!(event_id, event_type = %classified.event_type, reason = %reason, "event ignored");
                Ok(ReconcileOutcome::Ignored {
                    reason: reason.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::adapters::memory::InMemoryBillingStore;
    use crate::adapters::stripe::MockPaymentProvider;
    use crate::domain::billing::events::{BillingPeriod, SubscriptionDetails};
    use crate::domain::billing::{
        sign_payload, BillingAccount, LedgerOutcome, LedgerPlan, PaymentStatus, PlanMapper,
        PlanTier, SubscriptionOutcome, SubscriptionStatus, UpsertDecision,
    };
    use crate::domain::foundation::Timestamp;
    use crate::ports::{BillingStore, PaymentError};

    const SECRET: &str = "whsec_test_secret";
    const MONTHLY: &str = "price_1SaMthK12hmLPpaYMCTzzlPB";

    // ════════════════════════════════════════════════════════════════════════════
    // Fixtures
    // ════════════════════════════════════════════════════════════════════════════

    struct Harness {
        store: Arc<InMemoryBillingStore>,
        provider: Arc<MockPaymentProvider>,
        handler: ReconcileWebhookHandler,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryBillingStore::new());
        let provider = Arc::new(MockPaymentProvider::new());
        let context = ReconciliationContext::new(
            store.clone(),
            provider.clone(),
            Arc::new(PlanMapper::default()),
        );
        let verifier = StripeWebhookVerifier::new(SECRET).unwrap();
        Harness {
            store,
            provider,
            handler: ReconcileWebhookHandler::new(verifier, context),
        }
    }

    fn user() -> UserId {
        UserId::new("U1").unwrap()
    }

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs(secs).unwrap()
    }

    fn details(status: &str, end: i64) -> SubscriptionDetails {
        SubscriptionDetails {
            subscription_id: "sub_1".to_string(),
            customer_id: "cus_1".to_string(),
            provider_status: status.to_string(),
            price_id: Some(MONTHLY.to_string()),
            period: BillingPeriod {
                start: ts(end - 2_592_000),
                end: ts(end),
            },
            cancel_at_period_end: false,
        }
    }

    fn command(event_type: &str, object: serde_json::Value, livemode: bool) -> ReconcileWebhookCommand {
        let now = chrono::Utc::now().timestamp();
        let body = json!({
            "id": format!("evt_{}", event_type),
            "type": event_type,
            "created": now,
            "livemode": livemode,
            "data": { "object": object }
        });
        let payload = serde_json::to_vec(&body).unwrap();
        let signature = sign_payload(SECRET, now, &payload);
        ReconcileWebhookCommand { payload, signature }
    }

    fn subscription_checkout() -> serde_json::Value {
        json!({
            "id": "cs_1",
            "object": "checkout.session",
            "mode": "subscription",
            "metadata": { "userId": "U1" },
            "customer": "cus_1",
            "subscription": "sub_1",
            "invoice": "in_1",
            "amount_total": 999,
            "currency": "usd"
        })
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn rejects_tampered_body() {
        let h = harness();
        let mut cmd = command("checkout.session.completed", subscription_checkout(), true);
        cmd.payload.push(b' ');

        let err = h.handler.handle(cmd).await.unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature));
        assert!(h.store.payments().await.is_empty());
    }

    #[tokio::test]
    async fn subscription_checkout_activates_user() {
        let h = harness();
        h.store.insert_account(BillingAccount::new(user(), None)).await;
        h.provider.add_subscription(details("active", 1_800_000_000));

        let outcome = h
            .handler
            .handle(command("checkout.session.completed", subscription_checkout(), true))
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Applied { .. }));
        let account = h.store.find_account(&user()).await.unwrap().unwrap();
        assert_eq!(account.subscription.tier, PlanTier::Monthly);
        assert_eq!(account.subscription.expires_at, Some(ts(1_800_000_000)));
        assert_eq!(account.stripe_customer_id.as_deref(), Some("cus_1"));

        let payments = h.store.payments().await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].external_payment_id, "in_1");
        assert_eq!(payments[0].plan_type, LedgerPlan::Tier(PlanTier::Monthly));
    }

    #[tokio::test]
    async fn checkout_falls_back_to_email() {
        let h = harness();
        h.store
            .insert_account(BillingAccount::new(user(), Some("buyer@example.com".to_string())))
            .await;
        h.provider
            .set_checkout_prices("cs_2", vec!["price_1SaMusK12hmLPpaYVpdgy4Ks".to_string()]);

        let object = json!({
            "id": "cs_2",
            "mode": "payment",
            "customer_details": { "email": "buyer@example.com" },
            "payment_intent": "pi_2",
            "amount_total": 19900
        });
        h.handler
            .handle(command("checkout.session.completed", object, true))
            .await
            .unwrap();

        let account = h.store.find_account(&user()).await.unwrap().unwrap();
        assert_eq!(account.subscription.tier, PlanTier::Lifetime);
        assert_eq!(account.subscription.expires_at, None);
        assert!(h.store.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn explicit_unknown_user_does_not_fall_back_to_email() {
        let h = harness();
        h.store
            .insert_account(BillingAccount::new(user(), Some("buyer@example.com".to_string())))
            .await;

        let object = json!({
            "id": "cs_3",
            "mode": "payment",
            "client_reference_id": "U404",
            "customer_email": "buyer@example.com"
        });
        let outcome = h
            .handler
            .handle(command("checkout.session.completed", object, true))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::UserNotFound {
                reference: "U404".to_string()
            }
        );
        assert!(!h.provider.was_called("list_checkout_price_ids"));
    }

    #[tokio::test]
    async fn missing_provider_subscription_is_permanent() {
        let h = harness();
        h.store.insert_account(BillingAccount::new(user(), None)).await;

        let err = h
            .handler
            .handle(command("checkout.session.completed", subscription_checkout(), true))
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        assert!(h.store.payments().await.is_empty());
    }

    #[tokio::test]
    async fn provider_timeout_is_retryable_and_writes_nothing() {
        let h = harness();
        h.store.insert_account(BillingAccount::new(user(), None)).await;
        h.provider.set_error(PaymentError::timeout("deadline elapsed"));

        let err = h
            .handler
            .handle(command("checkout.session.completed", subscription_checkout(), true))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(h.store.payments().await.is_empty());
        assert!(h.store.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn updated_with_canceled_status_cancels() {
        let h = harness();
        h.store
            .insert_account(BillingAccount::new(user(), None).with_stripe_customer("cus_1"))
            .await;

        let object = json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "canceled",
            "current_period_start": 1_797_408_000,
            "current_period_end": 1_800_000_000,
            "items": { "data": [ { "price": { "id": MONTHLY } } ] }
        });
        h.handler
            .handle(command("customer.subscription.updated", object, true))
            .await
            .unwrap();

        let account = h.store.find_account(&user()).await.unwrap().unwrap();
        assert_eq!(account.subscription.status, SubscriptionStatus::Canceled);
        assert_eq!(account.subscription.tier, PlanTier::Free);
        assert_eq!(account.subscription.expires_at, Some(ts(1_800_000_000)));
    }

    #[tokio::test]
    async fn late_active_update_after_cancellation_is_rejected() {
        let h = harness();
        h.store
            .insert_account(BillingAccount::new(user(), None).with_stripe_customer("cus_1"))
            .await;

        let sub = |status: &str, end: i64| {
            json!({
                "id": "sub_1",
                "customer": "cus_1",
                "status": status,
                "current_period_start": end - 2_592_000,
                "current_period_end": end,
                "items": { "data": [ { "price": { "id": MONTHLY } } ] }
            })
        };
        h.handler
            .handle(command("customer.subscription.deleted", sub("canceled", 1_800_000_000), true))
            .await
            .unwrap();
        let outcome = h
            .handler
            .handle(command("customer.subscription.updated", sub("active", 1_802_592_000), true))
            .await
            .unwrap();

        match outcome {
            ReconcileOutcome::Applied { outcome, .. } => assert_eq!(
                outcome.subscription,
                SubscriptionOutcome::Rejected(UpsertDecision::RejectTransition)
            ),
            other => panic!("unexpected outcome {:?}", other),
        }
        let account = h.store.find_account(&user()).await.unwrap().unwrap();
        assert_eq!(account.subscription.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn test_mode_event_ignored_when_livemode_required() {
        let h = harness();
        let handler = h.handler.with_require_livemode(true);

        let outcome = handler
            .handle(command("checkout.session.completed", subscription_checkout(), false))
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Ignored { .. }));
        assert!(!h.provider.was_called("get_subscription"));
    }

    #[tokio::test]
    async fn unknown_event_type_is_ignored() {
        let h = harness();
        let outcome = h
            .handler
            .handle(command("customer.created", json!({ "id": "cus_1" }), true))
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn invoice_without_stored_row_records_ledger_only() {
        let h = harness();
        h.store
            .insert_account(BillingAccount::new(user(), None).with_stripe_customer("cus_1"))
            .await;

        let object = json!({
            "id": "in_7",
            "customer": "cus_1",
            "subscription": "sub_9",
            "amount_paid": 999,
            "currency": "usd",
            "lines": { "data": [ { "period": { "start": 1_797_408_000, "end": 1_800_000_000 } } ] }
        });
        let outcome = h
            .handler
            .handle(command("invoice.payment_succeeded", object, true))
            .await
            .unwrap();

        match outcome {
            ReconcileOutcome::Applied { outcome, .. } => {
                assert_eq!(outcome.ledger, LedgerOutcome::Recorded);
                assert_eq!(outcome.subscription, SubscriptionOutcome::Skipped);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(h.store.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn payment_intent_without_user_is_ignored() {
        let h = harness();
        let object = json!({ "id": "pi_1", "amount": 500, "currency": "usd" });

        let outcome = h
            .handler
            .handle(command("payment_intent.succeeded", object, true))
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Ignored { .. }));
        assert!(h.store.payments().await.is_empty());
    }

    #[tokio::test]
    async fn payment_intent_records_label() {
        let h = harness();
        h.store.insert_account(BillingAccount::new(user(), None)).await;
        let object = json!({
            "id": "pi_5",
            "amount": 4900,
            "currency": "EUR",
            "metadata": { "userId": "U1", "plan_type": "lifetime_team" }
        });

        h.handler
            .handle(command("payment_intent.succeeded", object, true))
            .await
            .unwrap();

        let payment = h.store.find_payment("pi_5").await.unwrap().unwrap();
        assert_eq!(payment.plan_type, LedgerPlan::Tier(PlanTier::LifetimeTeam));
        assert_eq!(payment.currency, "eur");
        assert_eq!(payment.status, PaymentStatus::Succeeded);
        let account = h.store.find_account(&user()).await.unwrap().unwrap();
        assert_eq!(account.subscription.tier, PlanTier::Free);
    }
}
