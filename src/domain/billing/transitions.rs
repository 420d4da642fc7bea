//! Pure state transitions: current state plus one event gives the writes
//! that event implies.
//!
//! Nothing here performs I/O. Handlers gather inputs (account, stored
//! subscription, provider detail, resolved plan) and pass the resulting
//! [`BillingWrite`] to the store.

use serde_json::json;

use super::events::{CheckoutCompleted, DirectPayment, InvoiceSettlement, SubscriptionDetails};
use super::{
    BillingAccount, BillingWrite, CreditAllotment, LedgerPlan, PaymentRecord, PaymentStatus,
    PlanTier, SnapshotUpdate, SubscriptionRecord, SubscriptionStatus, UserSubscription,
};
use crate::domain::foundation::{Timestamp, UserId};

/// One-time plans outrank whatever a leftover subscription reports.
fn holds_lifetime(account: &BillingAccount) -> bool {
    account.subscription.tier.is_paid()
        && !account.subscription.tier.is_recurring()
        && account.subscription.status == SubscriptionStatus::Active
}

fn subscription_snapshot(
    account: &BillingAccount,
    snapshot: SnapshotUpdate,
) -> Option<SnapshotUpdate> {
    if holds_lifetime(account) {
        None
    } else {
        Some(snapshot)
    }
}

fn with_optional_snapshot(write: BillingWrite, snapshot: Option<SnapshotUpdate>) -> BillingWrite {
    match snapshot {
        Some(snapshot) => write.with_snapshot(snapshot),
        None => write,
    }
}

fn checkout_payment(
    user_id: &UserId,
    checkout: &CheckoutCompleted,
    tier: PlanTier,
    occurred_at: Timestamp,
) -> PaymentRecord {
    PaymentRecord {
        external_payment_id: checkout.payment_key().to_string(),
        user_id: user_id.clone(),
        external_customer_id: checkout.customer_id.clone(),
        amount: checkout.amount_total,
        currency: checkout.currency.clone(),
        status: PaymentStatus::Succeeded,
        plan_type: LedgerPlan::Tier(tier),
        metadata: json!({
            "checkout_session_id": checkout.session_id,
            "customer_email": checkout.customer_email,
        }),
        occurred_at,
    }
}

/// Checkout for a recurring plan.
pub fn checkout_subscription(
    account: &BillingAccount,
    checkout: &CheckoutCompleted,
    details: &SubscriptionDetails,
    tier: PlanTier,
    status: SubscriptionStatus,
    occurred_at: Timestamp,
) -> BillingWrite {
    let user_id = &account.user_id;
    let record = SubscriptionRecord {
        user_id: user_id.clone(),
        external_subscription_id: details.subscription_id.clone(),
        external_customer_id: details.customer_id.clone(),
        plan_type: tier,
        status,
        current_period_start: details.period.start,
        current_period_end: details.period.end,
        cancel_at_period_end: details.cancel_at_period_end,
    };

    let credits = (status == SubscriptionStatus::Active)
        .then(|| CreditAllotment::for_tier(tier, occurred_at));
    let snapshot = subscription_snapshot(
        account,
        SnapshotUpdate {
            subscription: UserSubscription {
                tier,
                status,
                expires_at: Some(details.period.end),
            },
            credits,
            stripe_customer_id: Some(details.customer_id.clone()),
        },
    );

    let write = BillingWrite::for_user(user_id.clone())
        .with_payment(checkout_payment(user_id, checkout, tier, occurred_at))
        .with_subscription(record);
    with_optional_snapshot(write, snapshot)
}

/// Checkout for a one-time purchase. No subscription row, no expiry.
pub fn checkout_one_time(
    account: &BillingAccount,
    checkout: &CheckoutCompleted,
    tier: PlanTier,
    occurred_at: Timestamp,
) -> BillingWrite {
    let user_id = &account.user_id;
    BillingWrite::for_user(user_id.clone())
        .with_payment(checkout_payment(user_id, checkout, tier, occurred_at))
        .with_snapshot(SnapshotUpdate {
            subscription: UserSubscription {
                tier,
                status: SubscriptionStatus::Active,
                expires_at: None,
            },
            credits: Some(CreditAllotment::for_tier(tier, occurred_at)),
            stripe_customer_id: checkout.customer_id.clone(),
        })
}

/// Created/updated subscription with a non-canceled status.
pub fn subscription_changed(
    account: &BillingAccount,
    details: &SubscriptionDetails,
    tier: PlanTier,
    status: SubscriptionStatus,
) -> BillingWrite {
    let record = SubscriptionRecord {
        user_id: account.user_id.clone(),
        external_subscription_id: details.subscription_id.clone(),
        external_customer_id: details.customer_id.clone(),
        plan_type: tier,
        status,
        current_period_start: details.period.start,
        current_period_end: details.period.end,
        cancel_at_period_end: details.cancel_at_period_end,
    };
    let snapshot = subscription_snapshot(
        account,
        SnapshotUpdate {
            subscription: UserSubscription {
                tier,
                status,
                expires_at: Some(details.period.end),
            },
            credits: None,
            stripe_customer_id: Some(details.customer_id.clone()),
        },
    );

    with_optional_snapshot(
        BillingWrite::for_user(account.user_id.clone()).with_subscription(record),
        snapshot,
    )
}

/// Cancellation. The row keeps its plan for provenance; the user drops to
/// the free tier and free credits, with the paid-through date kept as
/// `expires_at`.
pub fn subscription_canceled(
    account: &BillingAccount,
    details: &SubscriptionDetails,
    current: Option<&SubscriptionRecord>,
    event_tier: PlanTier,
    occurred_at: Timestamp,
) -> BillingWrite {
    let plan_type = current
        .filter(|row| row.external_subscription_id == details.subscription_id)
        .map(|row| row.plan_type)
        .unwrap_or(event_tier);

    let record = SubscriptionRecord {
        user_id: account.user_id.clone(),
        external_subscription_id: details.subscription_id.clone(),
        external_customer_id: details.customer_id.clone(),
        plan_type,
        status: SubscriptionStatus::Canceled,
        current_period_start: details.period.start,
        current_period_end: details.period.end,
        cancel_at_period_end: true,
    };
    let snapshot = subscription_snapshot(
        account,
        SnapshotUpdate {
            subscription: UserSubscription {
                tier: PlanTier::Free,
                status: SubscriptionStatus::Canceled,
                expires_at: Some(details.period.end),
            },
            credits: Some(CreditAllotment::for_tier(PlanTier::Free, occurred_at)),
            stripe_customer_id: None,
        },
    );

    with_optional_snapshot(
        BillingWrite::for_user(account.user_id.clone()).with_subscription(record),
        snapshot,
    )
}

fn matching_row<'a>(
    current: Option<&'a SubscriptionRecord>,
    invoice: &InvoiceSettlement,
) -> Option<&'a SubscriptionRecord> {
    current.filter(|row| row.external_subscription_id == invoice.subscription_id)
}

/// Successful renewal. Without a stored row for the invoice's subscription
/// only the ledger entry is written.
pub fn invoice_paid(
    account: &BillingAccount,
    invoice: &InvoiceSettlement,
    current: Option<&SubscriptionRecord>,
    occurred_at: Timestamp,
) -> BillingWrite {
    let payment = PaymentRecord {
        external_payment_id: invoice.paid_key(),
        user_id: account.user_id.clone(),
        external_customer_id: Some(invoice.customer_id.clone()),
        amount: invoice.amount_paid,
        currency: invoice.currency.clone(),
        status: PaymentStatus::Succeeded,
        plan_type: LedgerPlan::SubscriptionRenewal,
        metadata: json!({
            "invoice_id": invoice.invoice_id,
            "subscription_id": invoice.subscription_id,
        }),
        occurred_at,
    };
    let write = BillingWrite::for_user(account.user_id.clone()).with_payment(payment);

    let Some(row) = matching_row(current, invoice) else {
        return write;
    };

    let (start, end) = invoice
        .period
        .map(|p| (p.start, p.end))
        .unwrap_or((row.current_period_start, row.current_period_end));
    let renewed = SubscriptionRecord {
        status: SubscriptionStatus::Active,
        current_period_start: start,
        current_period_end: end,
        ..row.clone()
    };
    let snapshot = subscription_snapshot(
        account,
        SnapshotUpdate {
            subscription: UserSubscription {
                tier: row.plan_type,
                status: SubscriptionStatus::Active,
                expires_at: Some(end),
            },
            credits: None,
            stripe_customer_id: None,
        },
    );

    with_optional_snapshot(write.with_subscription(renewed), snapshot)
}

/// Failed collection. Status drops to expired; the plan is kept so a later
/// successful retry restores it unchanged.
///
/// `settled` is true when the ledger already holds the paid entry for this
/// invoice. A failed attempt delivered after that is recorded but does not
/// demote.
pub fn invoice_failed(
    account: &BillingAccount,
    invoice: &InvoiceSettlement,
    current: Option<&SubscriptionRecord>,
    settled: bool,
    occurred_at: Timestamp,
) -> BillingWrite {
    let row = matching_row(current, invoice);
    let plan_type = row
        .map(|r| LedgerPlan::Tier(r.plan_type))
        .unwrap_or(LedgerPlan::SubscriptionRenewal);

    let payment = PaymentRecord {
        external_payment_id: invoice.failed_key(),
        user_id: account.user_id.clone(),
        external_customer_id: Some(invoice.customer_id.clone()),
        amount: invoice.amount_due,
        currency: invoice.currency.clone(),
        status: PaymentStatus::Failed,
        plan_type,
        metadata: json!({
            "invoice_id": invoice.invoice_id,
            "subscription_id": invoice.subscription_id,
            "attempt_count": invoice.attempt_count,
            "failure_reason": "payment_failed",
        }),
        occurred_at,
    };
    let write = BillingWrite::for_user(account.user_id.clone()).with_payment(payment);

    let Some(row) = row.filter(|_| !settled) else {
        return write;
    };

    let expired = SubscriptionRecord {
        status: SubscriptionStatus::Expired,
        ..row.clone()
    };
    let snapshot = subscription_snapshot(
        account,
        SnapshotUpdate {
            subscription: UserSubscription {
                tier: row.plan_type,
                status: SubscriptionStatus::Expired,
                expires_at: Some(row.current_period_end),
            },
            credits: None,
            stripe_customer_id: None,
        },
    );

    with_optional_snapshot(write.with_subscription(expired), snapshot)
}

/// Direct payment intent. Ledger only.
pub fn direct_payment(
    user_id: &UserId,
    payment: &DirectPayment,
    occurred_at: Timestamp,
) -> BillingWrite {
    BillingWrite::for_user(user_id.clone()).with_payment(PaymentRecord {
        external_payment_id: payment.payment_intent_id.clone(),
        user_id: user_id.clone(),
        external_customer_id: payment.customer_id.clone(),
        amount: payment.amount,
        currency: payment.currency.clone(),
        status: PaymentStatus::Succeeded,
        plan_type: LedgerPlan::from_label(payment.plan_label.as_deref()),
        metadata: json!({
            "payment_intent_id": payment.payment_intent_id,
            "plan_label": payment.plan_label,
        }),
        occurred_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::events::{BillingPeriod, CheckoutMode};

    const T: i64 = 1_738_368_000;

    fn at(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs(secs).unwrap()
    }

    fn account() -> BillingAccount {
        BillingAccount::new(UserId::new("U1").unwrap(), Some("u1@example.com".to_string()))
            .with_stripe_customer("cus_1")
    }

    fn details(status: &str, end: i64) -> SubscriptionDetails {
        SubscriptionDetails {
            subscription_id: "sub_1".to_string(),
            customer_id: "cus_1".to_string(),
            provider_status: status.to_string(),
            price_id: Some("price_1SaMthK12hmLPpaYMCTzzlPB".to_string()),
            period: BillingPeriod {
                start: at(end - 2_592_000),
                end: at(end),
            },
            cancel_at_period_end: false,
        }
    }

    fn checkout(mode: CheckoutMode) -> CheckoutCompleted {
        CheckoutCompleted {
            session_id: "cs_1".to_string(),
            mode,
            user_id: Some(UserId::new("U1").unwrap()),
            customer_id: Some("cus_1".to_string()),
            customer_email: Some("u1@example.com".to_string()),
            subscription_id: Some("sub_1".to_string()),
            payment_intent_id: None,
            invoice_id: Some("in_1".to_string()),
            amount_total: 999,
            currency: "usd".to_string(),
        }
    }

    fn invoice() -> InvoiceSettlement {
        InvoiceSettlement {
            invoice_id: "in_2".to_string(),
            customer_id: "cus_1".to_string(),
            subscription_id: "sub_1".to_string(),
            amount_paid: 999,
            amount_due: 999,
            currency: "usd".to_string(),
            attempt_count: 1,
            period: Some(BillingPeriod {
                start: at(T),
                end: at(T + 2_592_000),
            }),
        }
    }

    fn stored_row(status: SubscriptionStatus) -> SubscriptionRecord {
        SubscriptionRecord {
            user_id: UserId::new("U1").unwrap(),
            external_subscription_id: "sub_1".to_string(),
            external_customer_id: "cus_1".to_string(),
            plan_type: PlanTier::Monthly,
            status,
            current_period_start: at(T - 2_592_000),
            current_period_end: at(T),
            cancel_at_period_end: false,
        }
    }

    #[test]
    fn subscription_checkout_writes_row_payment_and_snapshot() {
        let write = checkout_subscription(
            &account(),
            &checkout(CheckoutMode::Subscription),
            &details("active", T),
            PlanTier::Monthly,
            SubscriptionStatus::Active,
            at(100),
        );

        let row = write.subscription.unwrap();
        assert_eq!(row.plan_type, PlanTier::Monthly);
        assert_eq!(row.status, SubscriptionStatus::Active);
        assert_eq!(row.current_period_end, at(T));

        let payment = write.payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(payment.plan_type, LedgerPlan::Tier(PlanTier::Monthly));
        assert_eq!(payment.external_payment_id, "in_1");
        assert_eq!(payment.metadata["checkout_session_id"], "cs_1");

        let snapshot = write.snapshot.unwrap();
        assert_eq!(snapshot.subscription.tier, PlanTier::Monthly);
        assert_eq!(snapshot.subscription.expires_at, Some(at(T)));
        assert_eq!(snapshot.credits.unwrap().limit, 999_999);
    }

    #[test]
    fn inactive_subscription_checkout_does_not_grant_credits() {
        let write = checkout_subscription(
            &account(),
            &checkout(CheckoutMode::Subscription),
            &details("incomplete", T),
            PlanTier::Monthly,
            SubscriptionStatus::Expired,
            at(100),
        );
        assert!(write.snapshot.unwrap().credits.is_none());
    }

    #[test]
    fn one_time_checkout_has_no_expiry_and_no_row() {
        let write = checkout_one_time(
            &account(),
            &checkout(CheckoutMode::Payment),
            PlanTier::Lifetime,
            at(100),
        );

        assert!(write.subscription.is_none());
        let snapshot = write.snapshot.unwrap();
        assert_eq!(snapshot.subscription.tier, PlanTier::Lifetime);
        assert_eq!(snapshot.subscription.expires_at, None);
        assert_eq!(snapshot.credits.unwrap().last_reset, at(100));
    }

    #[test]
    fn subscription_update_leaves_credits_alone() {
        let write = subscription_changed(
            &account(),
            &details("active", T),
            PlanTier::Annual,
            SubscriptionStatus::Active,
        );

        assert_eq!(write.subscription.unwrap().plan_type, PlanTier::Annual);
        assert!(write.snapshot.unwrap().credits.is_none());
        assert!(write.payment.is_none());
    }

    #[test]
    fn subscription_update_does_not_demote_lifetime_holder() {
        let mut holder = account();
        holder.subscription = UserSubscription {
            tier: PlanTier::Lifetime,
            status: SubscriptionStatus::Active,
            expires_at: None,
        };

        let write = subscription_changed(
            &holder,
            &details("active", T),
            PlanTier::Monthly,
            SubscriptionStatus::Active,
        );

        assert!(write.subscription.is_some());
        assert!(write.snapshot.is_none());
    }

    #[test]
    fn cancellation_keeps_paid_through_date() {
        let current = stored_row(SubscriptionStatus::Active);
        let write = subscription_canceled(
            &account(),
            &details("canceled", T),
            Some(&current),
            PlanTier::Annual,
            at(100),
        );

        let row = write.subscription.unwrap();
        assert_eq!(row.status, SubscriptionStatus::Canceled);
        assert_eq!(row.plan_type, PlanTier::Monthly, "stored plan wins over event price");
        assert!(row.cancel_at_period_end);

        let snapshot = write.snapshot.unwrap();
        assert_eq!(snapshot.subscription.tier, PlanTier::Free);
        assert_eq!(snapshot.subscription.status, SubscriptionStatus::Canceled);
        assert_eq!(snapshot.subscription.expires_at, Some(at(T)));
        assert_eq!(snapshot.credits.unwrap().limit, 100);
    }

    #[test]
    fn invoice_paid_renews_matching_row() {
        let current = stored_row(SubscriptionStatus::Expired);
        let write = invoice_paid(&account(), &invoice(), Some(&current), at(100));

        let row = write.subscription.unwrap();
        assert_eq!(row.status, SubscriptionStatus::Active);
        assert_eq!(row.current_period_end, at(T + 2_592_000));

        let payment = write.payment.unwrap();
        assert_eq!(payment.plan_type, LedgerPlan::SubscriptionRenewal);
        assert_eq!(payment.external_payment_id, "in_2");

        let snapshot = write.snapshot.unwrap();
        assert_eq!(snapshot.subscription.tier, PlanTier::Monthly);
        assert_eq!(snapshot.subscription.expires_at, Some(at(T + 2_592_000)));
    }

    #[test]
    fn invoice_paid_without_row_only_records_payment() {
        let write = invoice_paid(&account(), &invoice(), None, at(100));

        assert!(write.payment.is_some());
        assert!(write.subscription.is_none());
        assert!(write.snapshot.is_none());
    }

    #[test]
    fn invoice_paid_for_other_subscription_only_records_payment() {
        let mut current = stored_row(SubscriptionStatus::Active);
        current.external_subscription_id = "sub_other".to_string();

        let write = invoice_paid(&account(), &invoice(), Some(&current), at(100));
        assert!(write.subscription.is_none());
    }

    #[test]
    fn invoice_failed_expires_without_touching_plan() {
        let current = stored_row(SubscriptionStatus::Active);
        let write = invoice_failed(&account(), &invoice(), Some(&current), false, at(100));

        let row = write.subscription.unwrap();
        assert_eq!(row.status, SubscriptionStatus::Expired);
        assert_eq!(row.plan_type, PlanTier::Monthly);
        assert_eq!(row.current_period_end, at(T));

        let payment = write.payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.external_payment_id, "in_2:failed:1");
        assert_eq!(payment.metadata["failure_reason"], "payment_failed");

        let snapshot = write.snapshot.unwrap();
        assert_eq!(snapshot.subscription.tier, PlanTier::Monthly);
        assert_eq!(snapshot.subscription.status, SubscriptionStatus::Expired);
    }

    #[test]
    fn invoice_failed_after_invoice_was_paid_only_records_attempt() {
        let current = stored_row(SubscriptionStatus::Active);
        let write = invoice_failed(&account(), &invoice(), Some(&current), true, at(100));

        assert_eq!(write.payment.unwrap().status, PaymentStatus::Failed);
        assert!(write.subscription.is_none());
        assert!(write.snapshot.is_none());
    }

    #[test]
    fn direct_payment_uses_label() {
        let payment = DirectPayment {
            payment_intent_id: "pi_1".to_string(),
            customer_id: None,
            user_id: Some(UserId::new("U1").unwrap()),
            amount: 4900,
            currency: "usd".to_string(),
            plan_label: Some("lifetime_team".to_string()),
        };

        let write = direct_payment(&UserId::new("U1").unwrap(), &payment, at(100));

        let record = write.payment.unwrap();
        assert_eq!(record.plan_type, LedgerPlan::Tier(PlanTier::LifetimeTeam));
        assert!(write.snapshot.is_none());
        assert!(write.subscription.is_none());
    }
}
