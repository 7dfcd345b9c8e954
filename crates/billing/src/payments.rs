//! Payment records and the queries the reconciliation handlers run on them.
//!
//! A row is created in `pending` state when a checkout order is initiated and
//! is mutated to `completed`, `failed`, or `refunded` exclusively by the
//! webhook handlers. Rows are never deleted.

use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// One attempted charge against a business's checkout order.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub business_id: Uuid,
    pub razorpay_order_id: String,
    pub razorpay_payment_id: Option<String>,
    pub status: String,
    /// Major currency units.
    pub amount: f64,
    pub paid_at: Option<OffsetDateTime>,
    pub subscription_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Payment {
    /// Whether this capture has already been applied for the given provider
    /// payment id.
    pub fn is_completed_capture(&self, payment_id: &str) -> bool {
        self.status == PaymentStatus::Completed.as_str()
            && self.razorpay_payment_id.as_deref() == Some(payment_id)
    }
}

/// Read-only duplicate check run before any transaction is opened. Returns
/// the payment id when the (order, payment) pair has already completed.
pub async fn find_completed_capture(
    pool: &PgPool,
    order_id: &str,
    payment_id: &str,
) -> BillingResult<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM payments
        WHERE razorpay_order_id = $1
          AND razorpay_payment_id = $2
          AND status = 'completed'
        "#,
    )
    .bind(order_id)
    .bind(payment_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id,)| id))
}

/// Fetch and row-lock the payment for an order inside a transaction.
pub async fn lock_by_order_id(
    tx: &mut Transaction<'_, Postgres>,
    order_id: &str,
) -> BillingResult<Option<Payment>> {
    let payment = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE razorpay_order_id = $1 FOR UPDATE",
    )
    .bind(order_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(payment)
}

/// Fetch and row-lock a payment by the provider payment id. Refunds
/// reference the payment, not the order.
pub async fn lock_by_payment_id(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: &str,
) -> BillingResult<Option<Payment>> {
    let payment = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE razorpay_payment_id = $1 FOR UPDATE",
    )
    .bind(payment_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(payment)
}

/// Apply a capture to the payment row: provider payment id, completed
/// status, subscription link, paid-at, and the major-unit amount.
pub async fn mark_completed(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    payment_id: &str,
    subscription_id: Uuid,
    amount: f64,
    paid_at: OffsetDateTime,
) -> BillingResult<()> {
    sqlx::query(
        r#"
        UPDATE payments SET
            razorpay_payment_id = $2,
            status = 'completed',
            subscription_id = $3,
            amount = $4,
            paid_at = $5,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(payment_id)
    .bind(subscription_id)
    .bind(amount)
    .bind(paid_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Mark the payment for an order as failed. A single atomic statement;
/// returns the number of rows touched so the caller can tell an unknown
/// order apart from a recorded failure.
pub async fn mark_failed(
    pool: &PgPool,
    order_id: &str,
    payment_id: Option<&str>,
) -> BillingResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE payments SET
            status = 'failed',
            razorpay_payment_id = COALESCE($2, razorpay_payment_id),
            updated_at = NOW()
        WHERE razorpay_order_id = $1
        "#,
    )
    .bind(order_id)
    .bind(payment_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Mark a payment as refunded inside the refund transaction.
pub async fn mark_refunded(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> BillingResult<()> {
    sqlx::query("UPDATE payments SET status = 'refunded', updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Record a pending payment for a freshly initiated checkout order. The
/// checkout flow itself lives outside this crate; this is its single touch
/// point on the payments table.
pub async fn create_pending(
    pool: &PgPool,
    business_id: Uuid,
    order_id: &str,
    amount: f64,
) -> BillingResult<Payment> {
    let payment = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (business_id, razorpay_order_id, status, amount)
        VALUES ($1, $2, 'pending', $3)
        RETURNING *
        "#,
    )
    .bind(business_id)
    .bind(order_id)
    .bind(amount)
    .fetch_one(pool)
    .await?;

    Ok(payment)
}

/// Fetch a payment by order id without locking. Used by tests and
/// diagnostics.
pub async fn find_by_order_id(
    pool: &PgPool,
    order_id: &str,
) -> BillingResult<Option<Payment>> {
    let payment =
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE razorpay_order_id = $1")
            .bind(order_id)
            .fetch_optional(pool)
            .await?;

    Ok(payment)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(status: PaymentStatus, payment_id: Option<&str>) -> Payment {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        Payment {
            id: Uuid::new_v4(),
            business_id: Uuid::new_v4(),
            razorpay_order_id: "order_A1".to_string(),
            razorpay_payment_id: payment_id.map(str::to_string),
            status: status.as_str().to_string(),
            amount: 0.0,
            paid_at: None,
            subscription_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn completed_capture_requires_matching_payment_id() {
        let completed = payment(PaymentStatus::Completed, Some("pay_X1"));
        assert!(completed.is_completed_capture("pay_X1"));
        assert!(!completed.is_completed_capture("pay_other"));
    }

    #[test]
    fn pending_payment_is_not_a_completed_capture() {
        let pending = payment(PaymentStatus::Pending, None);
        assert!(!pending.is_completed_capture("pay_X1"));
    }

    #[test]
    fn status_round_trips_as_text() {
        assert_eq!(PaymentStatus::Pending.as_str(), "pending");
        assert_eq!(PaymentStatus::Completed.as_str(), "completed");
        assert_eq!(PaymentStatus::Failed.as_str(), "failed");
        assert_eq!(PaymentStatus::Refunded.to_string(), "refunded");
    }
}
