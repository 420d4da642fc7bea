//! PostgreSQL implementation of BillingStore.
//!
//! `apply` locks the user row, then runs the ledger insert, the guarded
//! subscription upsert and the snapshot update in one transaction. The
//! `WHERE` clause of the upsert is the SQL form of [`SubscriptionRecord::decide`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::billing::{
    ApplyOutcome, BillingAccount, BillingWrite, CreditAllotment, LedgerOutcome, LedgerPlan,
    PaymentRecord, PaymentStatus, PlanTier, SnapshotUpdate, SubscriptionOutcome,
    SubscriptionRecord, SubscriptionStatus, UserSubscription,
};
use crate::domain::foundation::{DomainError, ErrorCode, Timestamp, UserId};
use crate::ports::BillingStore;

const SUBSCRIPTION_UPSERT: &str = r#"
    INSERT INTO subscriptions (
        user_id, external_subscription_id, external_customer_id, plan_type, status,
        current_period_start, current_period_end, cancel_at_period_end, updated_at
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
    ON CONFLICT (user_id) DO UPDATE SET
        external_subscription_id = EXCLUDED.external_subscription_id,
        external_customer_id = EXCLUDED.external_customer_id,
        plan_type = EXCLUDED.plan_type,
        status = EXCLUDED.status,
        current_period_start = EXCLUDED.current_period_start,
        current_period_end = EXCLUDED.current_period_end,
        cancel_at_period_end = EXCLUDED.cancel_at_period_end,
        updated_at = now()
    WHERE (
        subscriptions.external_subscription_id = EXCLUDED.external_subscription_id
        AND (
            subscriptions.status = EXCLUDED.status
            OR (subscriptions.status = 'active' AND EXCLUDED.status IN ('expired', 'canceled'))
            OR (subscriptions.status = 'expired' AND EXCLUDED.status IN ('active', 'canceled'))
        )
        AND (
            EXCLUDED.status IN ('canceled', 'expired')
            OR EXCLUDED.current_period_end >= subscriptions.current_period_end
        )
    )
    OR (
        subscriptions.external_subscription_id <> EXCLUDED.external_subscription_id
        AND EXCLUDED.status = 'active'
    )
    RETURNING user_id
"#;

/// PostgreSQL implementation of the BillingStore port.
pub struct PostgresBillingStore {
    pool: PgPool,
}

impl PostgresBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: Option<String>,
    stripe_customer_id: Option<String>,
    subscription_tier: String,
    subscription_status: String,
    subscription_expires_at: Option<DateTime<Utc>>,
    credits_current: Option<i64>,
    credits_limit: Option<i64>,
    credits_last_reset: Option<DateTime<Utc>>,
}

impl TryFrom<UserRow> for BillingAccount {
    type Error = DomainError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let credits = match (row.credits_current, row.credits_limit, row.credits_last_reset) {
            (Some(current), Some(limit), Some(last_reset)) => Some(CreditAllotment {
                current,
                limit,
                last_reset: Timestamp::from_datetime(last_reset),
            }),
            _ => None,
        };

        Ok(BillingAccount {
            user_id: parse_user_id(row.id)?,
            email: row.email,
            stripe_customer_id: row.stripe_customer_id,
            subscription: UserSubscription {
                tier: parse_column("subscription_tier", &row.subscription_tier)?,
                status: parse_column("subscription_status", &row.subscription_status)?,
                expires_at: row.subscription_expires_at.map(Timestamp::from_datetime),
            },
            credits,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    user_id: String,
    external_subscription_id: String,
    external_customer_id: String,
    plan_type: String,
    status: String,
    current_period_start: DateTime<Utc>,
    current_period_end: DateTime<Utc>,
    cancel_at_period_end: bool,
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(SubscriptionRecord {
            user_id: parse_user_id(row.user_id)?,
            external_subscription_id: row.external_subscription_id,
            external_customer_id: row.external_customer_id,
            plan_type: parse_column::<PlanTier>("plan_type", &row.plan_type)?,
            status: parse_column::<SubscriptionStatus>("status", &row.status)?,
            current_period_start: Timestamp::from_datetime(row.current_period_start),
            current_period_end: Timestamp::from_datetime(row.current_period_end),
            cancel_at_period_end: row.cancel_at_period_end,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    external_payment_id: String,
    user_id: String,
    external_customer_id: Option<String>,
    amount: i64,
    currency: String,
    status: String,
    plan_type: String,
    metadata: serde_json::Value,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = DomainError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(PaymentRecord {
            external_payment_id: row.external_payment_id,
            user_id: parse_user_id(row.user_id)?,
            external_customer_id: row.external_customer_id,
            amount: row.amount,
            currency: row.currency,
            status: parse_column::<PaymentStatus>("status", &row.status)?,
            plan_type: LedgerPlan::from_label(Some(&row.plan_type)),
            metadata: row.metadata,
            occurred_at: Timestamp::from_datetime(row.occurred_at),
        })
    }
}

fn parse_user_id(raw: String) -> Result<UserId, DomainError> {
    UserId::new(raw)
        .map_err(|e| DomainError::new(ErrorCode::DatabaseError, format!("Invalid user id: {}", e)))
}

fn parse_column<T>(column: &str, raw: &str) -> Result<T, DomainError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| {
        DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid {} value '{}': {}", column, raw, e),
        )
    })
}

fn db_error(context: &str) -> impl FnOnce(sqlx::Error) -> DomainError + '_ {
    move |e| DomainError::database(format!("{}: {}", context, e))
}

const USER_COLUMNS: &str = r#"
    id, email, stripe_customer_id, subscription_tier, subscription_status,
    subscription_expires_at, credits_current, credits_limit, credits_last_reset
"#;

const SUBSCRIPTION_COLUMNS: &str = r#"
    user_id, external_subscription_id, external_customer_id, plan_type, status,
    current_period_start, current_period_end, cancel_at_period_end
"#;

const PAYMENT_COLUMNS: &str = r#"
    external_payment_id, user_id, external_customer_id, amount, currency, status,
    plan_type, metadata, occurred_at
"#;

async fn insert_payment(
    tx: &mut Transaction<'_, Postgres>,
    payment: &PaymentRecord,
) -> Result<LedgerOutcome, DomainError> {
    let result = sqlx::query(
        r#"
        INSERT INTO payments (
            id, external_payment_id, user_id, external_customer_id, amount, currency,
            status, plan_type, metadata, occurred_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (external_payment_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&payment.external_payment_id)
    .bind(payment.user_id.as_str())
    .bind(&payment.external_customer_id)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(payment.status.as_str())
    .bind(payment.plan_type.as_str())
    .bind(&payment.metadata)
    .bind(payment.occurred_at.as_datetime())
    .execute(&mut **tx)
    .await
    .map_err(db_error("Failed to record payment"))?;

    Ok(if result.rows_affected() == 0 {
        LedgerOutcome::Duplicate
    } else {
        LedgerOutcome::Recorded
    })
}

async fn upsert_subscription(
    tx: &mut Transaction<'_, Postgres>,
    incoming: &SubscriptionRecord,
) -> Result<SubscriptionOutcome, DomainError> {
    let applied: Option<(String,)> = sqlx::query_as(SUBSCRIPTION_UPSERT)
        .bind(incoming.user_id.as_str())
        .bind(&incoming.external_subscription_id)
        .bind(&incoming.external_customer_id)
        .bind(incoming.plan_type.as_str())
        .bind(incoming.status.as_str())
        .bind(incoming.current_period_start.as_datetime())
        .bind(incoming.current_period_end.as_datetime())
        .bind(incoming.cancel_at_period_end)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error("Failed to upsert subscription"))?;

    if applied.is_some() {
        return Ok(SubscriptionOutcome::Applied);
    }

    // The guard refused the row; recover the reason from the stored row.
    let stored: SubscriptionRow = sqlx::query_as(&format!(
        "SELECT {} FROM subscriptions WHERE user_id = $1",
        SUBSCRIPTION_COLUMNS
    ))
    .bind(incoming.user_id.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(db_error("Failed to read subscription"))?;
    let stored = SubscriptionRecord::try_from(stored)?;

    Ok(SubscriptionOutcome::Rejected(stored.decide(incoming)))
}

async fn update_snapshot(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &UserId,
    snapshot: &SnapshotUpdate,
) -> Result<(), DomainError> {
    let credits = snapshot.credits.as_ref();
    sqlx::query(
        r#"
        UPDATE users SET
            subscription_tier = $2,
            subscription_status = $3,
            subscription_expires_at = $4,
            stripe_customer_id = COALESCE($5, stripe_customer_id),
            credits_current = COALESCE($6, credits_current),
            credits_limit = COALESCE($7, credits_limit),
            credits_last_reset = COALESCE($8, credits_last_reset)
        WHERE id = $1
        "#,
    )
    .bind(user_id.as_str())
    .bind(snapshot.subscription.tier.as_str())
    .bind(snapshot.subscription.status.as_str())
    .bind(snapshot.subscription.expires_at.map(|t| *t.as_datetime()))
    .bind(&snapshot.stripe_customer_id)
    .bind(credits.map(|c| c.current))
    .bind(credits.map(|c| c.limit))
    .bind(credits.map(|c| *c.last_reset.as_datetime()))
    .execute(&mut **tx)
    .await
    .map_err(db_error("Failed to update user snapshot"))?;

    Ok(())
}

#[async_trait]
impl BillingStore for PostgresBillingStore {
    async fn find_account(&self, user_id: &UserId) -> Result<Option<BillingAccount>, DomainError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
                .bind(user_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error("Failed to find user"))?;

        row.map(BillingAccount::try_from).transpose()
    }

    async fn find_account_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<BillingAccount>, DomainError> {
        let direct: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE stripe_customer_id = $1 LIMIT 1",
            USER_COLUMNS
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find user by customer"))?;
        if let Some(row) = direct {
            return BillingAccount::try_from(row).map(Some);
        }

        let via_subscription: Option<UserRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM users
            WHERE id = (SELECT user_id FROM subscriptions WHERE external_customer_id = $1 LIMIT 1)
            "#,
            USER_COLUMNS
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find user by subscription customer"))?;

        via_subscription.map(BillingAccount::try_from).transpose()
    }

    async fn find_account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<BillingAccount>, DomainError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE lower(email) = lower($1) ORDER BY created_at ASC LIMIT 1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find user by email"))?;

        row.map(BillingAccount::try_from).transpose()
    }

    async fn find_subscription(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find subscription"))?;

        row.map(SubscriptionRecord::try_from).transpose()
    }

    async fn find_payment(
        &self,
        external_payment_id: &str,
    ) -> Result<Option<PaymentRecord>, DomainError> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE external_payment_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(external_payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find payment"))?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn payments_for_user(&self, user_id: &UserId) -> Result<Vec<PaymentRecord>, DomainError> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE user_id = $1 ORDER BY occurred_at ASC, created_at ASC",
            PAYMENT_COLUMNS
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list payments"))?;

        rows.into_iter().map(PaymentRecord::try_from).collect()
    }

    async fn apply(&self, write: BillingWrite) -> Result<ApplyOutcome, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        // Serializes concurrent events for the same user.
        let locked: Option<(String,)> =
            sqlx::query_as("SELECT id FROM users WHERE id = $1 FOR UPDATE")
                .bind(write.user_id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error("Failed to lock user"))?;
        if locked.is_none() {
            return Err(
                DomainError::new(ErrorCode::UserNotFound, "user vanished during reconciliation")
                    .with_detail("user_id", write.user_id.as_str()),
            );
        }

        let ledger = match &write.payment {
            Some(payment) => insert_payment(&mut tx, payment).await?,
            None => LedgerOutcome::Skipped,
        };

        let subscription = match &write.subscription {
            Some(incoming) => upsert_subscription(&mut tx, incoming).await?,
            None => SubscriptionOutcome::Skipped,
        };

        let mut snapshot_updated = false;
        if let Some(snapshot) = &write.snapshot {
            if ApplyOutcome::snapshot_allowed(subscription) {
                update_snapshot(&mut tx, &write.user_id, snapshot).await?;
                snapshot_updated = true;
            }
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;

        Ok(ApplyOutcome {
            ledger,
            subscription,
            snapshot_updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_row() -> UserRow {
        UserRow {
            id: "U1".to_string(),
            email: Some("u1@example.com".to_string()),
            stripe_customer_id: Some("cus_1".to_string()),
            subscription_tier: "monthly".to_string(),
            subscription_status: "active".to_string(),
            subscription_expires_at: Some(Utc::now()),
            credits_current: Some(999_999),
            credits_limit: Some(999_999),
            credits_last_reset: Some(Utc::now()),
        }
    }

    #[test]
    fn user_row_converts_to_account() {
        let account = BillingAccount::try_from(user_row()).unwrap();
        assert_eq!(account.subscription.tier, PlanTier::Monthly);
        assert!(account.subscription.has_paid_access());
        assert_eq!(account.credits.unwrap().limit, 999_999);
    }

    #[test]
    fn partial_credit_columns_read_as_none() {
        let mut row = user_row();
        row.credits_last_reset = None;
        let account = BillingAccount::try_from(row).unwrap();
        assert!(account.credits.is_none());
    }

    #[test]
    fn unknown_tier_is_a_database_error() {
        let mut row = user_row();
        row.subscription_tier = "platinum".to_string();
        let err = BillingAccount::try_from(row).unwrap_err();
        assert_eq!(err.code, ErrorCode::DatabaseError);
    }

    #[test]
    fn subscription_row_parses_status() {
        let row = SubscriptionRow {
            user_id: "U1".to_string(),
            external_subscription_id: "sub_1".to_string(),
            external_customer_id: "cus_1".to_string(),
            plan_type: "annual".to_string(),
            status: "canceled".to_string(),
            current_period_start: Utc::now(),
            current_period_end: Utc::now(),
            cancel_at_period_end: true,
        };
        let record = SubscriptionRecord::try_from(row).unwrap();
        assert_eq!(record.status, SubscriptionStatus::Canceled);
        assert_eq!(record.plan_type, PlanTier::Annual);
    }

    #[test]
    fn payment_row_keeps_renewal_label() {
        let row = PaymentRow {
            external_payment_id: "in_1".to_string(),
            user_id: "U1".to_string(),
            external_customer_id: None,
            amount: 999,
            currency: "usd".to_string(),
            status: "succeeded".to_string(),
            plan_type: "subscription_renewal".to_string(),
            metadata: serde_json::json!({}),
            occurred_at: Utc::now(),
        };
        let record = PaymentRecord::try_from(row).unwrap();
        assert_eq!(record.plan_type, LedgerPlan::SubscriptionRenewal);
    }

    #[test]
    fn upsert_guard_mentions_every_status_rule() {
        assert!(SUBSCRIPTION_UPSERT.contains("ON CONFLICT (user_id) DO UPDATE"));
        assert!(SUBSCRIPTION_UPSERT.contains("RETURNING user_id"));
        assert!(SUBSCRIPTION_UPSERT
            .contains("EXCLUDED.current_period_end >= subscriptions.current_period_end"));
    }
}
