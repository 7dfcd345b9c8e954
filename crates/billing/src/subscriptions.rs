//! Subscription records: a business's paid-plan entitlement window.
//!
//! At most one subscription per business may be `active` at any instant.
//! The captured-payment handler enforces this by expiring prior active rows
//! in the same transaction that inserts the replacement.

use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingResult;

/// Length of the pro entitlement window granted per captured payment.
pub const PRO_PERIOD_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub business_id: Uuid,
    pub plan: String,
    pub status: String,
    pub start_date: OffsetDateTime,
    pub end_date: Option<OffsetDateTime>,
    pub cancelled_at: Option<OffsetDateTime>,
    pub cancellation_reason: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanType {
    Free,
    Pro,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Free => "free",
            PlanType::Pro => "pro",
        }
    }
}

/// End of the pro window that starts at `start`.
pub fn pro_period_end(start: OffsetDateTime) -> OffsetDateTime {
    start + Duration::days(PRO_PERIOD_DAYS)
}

/// Whether the subscription with the given id is currently active. Used
/// inside the capture transaction to decide if the payment's linked
/// subscription still stands.
pub async fn is_active(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> BillingResult<bool> {
    let row: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM subscriptions WHERE id = $1 AND status = 'active'")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;

    Ok(row.is_some())
}

/// Expire every active subscription a business holds, in one bulk update.
pub async fn expire_active_for_business(
    tx: &mut Transaction<'_, Postgres>,
    business_id: Uuid,
) -> BillingResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions SET
            status = 'expired',
            updated_at = NOW()
        WHERE business_id = $1 AND status = 'active'
        "#,
    )
    .bind(business_id)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

/// Insert a fresh pro subscription for a business.
pub async fn create_pro(
    tx: &mut Transaction<'_, Postgres>,
    business_id: Uuid,
    start: OffsetDateTime,
) -> BillingResult<Uuid> {
    let row: (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO subscriptions (business_id, plan, status, start_date, end_date)
        VALUES ($1, 'pro', 'active', $2, $3)
        RETURNING id
        "#,
    )
    .bind(business_id)
    .bind(start)
    .bind(pro_period_end(start))
    .fetch_one(&mut **tx)
    .await?;

    Ok(row.0)
}

/// Cancel every active subscription a business holds, recording when and
/// why. Used by the refund handler.
pub async fn cancel_active_for_business(
    tx: &mut Transaction<'_, Postgres>,
    business_id: Uuid,
    cancelled_at: OffsetDateTime,
    reason: &str,
) -> BillingResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions SET
            status = 'cancelled',
            cancelled_at = $2,
            cancellation_reason = $3,
            updated_at = NOW()
        WHERE business_id = $1 AND status = 'active'
        "#,
    )
    .bind(business_id)
    .bind(cancelled_at)
    .bind(reason)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

/// All of a business's subscriptions, newest first. Used by tests and
/// diagnostics.
pub async fn list_for_business(
    pool: &PgPool,
    business_id: Uuid,
) -> BillingResult<Vec<Subscription>> {
    let rows = sqlx::query_as::<_, Subscription>(
        r#"
        SELECT * FROM subscriptions
        WHERE business_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(business_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
