//! Billing invariants.
//!
//! Runnable consistency checks over the payments and subscriptions tables.
//! Each check is a real SQL query, reads only, and reports enough context to
//! debug a violation. Run after webhook replays or migrations to confirm the
//! reconciliation logic left the store in a valid state.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated.
    pub invariant: String,
    /// Business(es) affected.
    pub business_ids: Vec<Uuid>,
    /// Human-readable description of the violation.
    pub description: String,
    /// Additional context for debugging.
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Entitlements may be wrong right now.
    Critical,
    /// Data inconsistency that needs attention.
    High,
    /// Potential issue, should investigate.
    Medium,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
        }
    }
}

/// Summary of all invariant checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleActiveRow {
    business_id: Uuid,
    active_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct CompletedPaymentRow {
    id: Uuid,
    business_id: Uuid,
    razorpay_order_id: String,
}

#[derive(Debug, sqlx::FromRow)]
struct RefundedWithActiveRow {
    business_id: Uuid,
    payment_id: Uuid,
    active_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct BadWindowRow {
    id: Uuid,
    business_id: Uuid,
    start_date: OffsetDateTime,
    end_date: Option<OffsetDateTime>,
}

/// Service for running billing invariant checks.
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return a summary.
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_active_subscription().await?);
        violations.extend(self.check_completed_payment_complete().await?);
        violations.extend(self.check_refunded_payment_has_no_active().await?);
        violations.extend(self.check_subscription_window_valid().await?);

        let checks_run = 4;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: at most one active subscription per business.
    ///
    /// Two active rows would grant overlapping entitlement windows and make
    /// the refund cascade ambiguous.
    async fn check_single_active_subscription(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleActiveRow> = sqlx::query_as(
            r#"
            SELECT business_id, COUNT(*) as active_count
            FROM subscriptions
            WHERE status = 'active'
            GROUP BY business_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_active_subscription".to_string(),
                business_ids: vec![row.business_id],
                description: format!(
                    "Business has {} active subscriptions (expected at most 1)",
                    row.active_count
                ),
                context: serde_json::json!({
                    "active_count": row.active_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: a completed payment carries its provider payment id and
    /// a subscription link.
    async fn check_completed_payment_complete(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<CompletedPaymentRow> = sqlx::query_as(
            r#"
            SELECT id, business_id, razorpay_order_id
            FROM payments
            WHERE status = 'completed'
              AND (razorpay_payment_id IS NULL OR subscription_id IS NULL)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "completed_payment_complete".to_string(),
                business_ids: vec![row.business_id],
                description: format!(
                    "Completed payment for order '{}' is missing its payment id or subscription link",
                    row.razorpay_order_id
                ),
                context: serde_json::json!({
                    "payment_id": row.id,
                    "razorpay_order_id": row.razorpay_order_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: a refunded payment's business has no active
    /// subscription left behind.
    async fn check_refunded_payment_has_no_active(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<RefundedWithActiveRow> = sqlx::query_as(
            r#"
            SELECT p.business_id, p.id as payment_id, COUNT(s.id) as active_count
            FROM payments p
            JOIN subscriptions s ON s.business_id = p.business_id
            WHERE p.status = 'refunded'
              AND s.status = 'active'
            GROUP BY p.business_id, p.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "refunded_payment_has_no_active".to_string(),
                business_ids: vec![row.business_id],
                description: format!(
                    "Business of a refunded payment still holds {} active subscription(s)",
                    row.active_count
                ),
                context: serde_json::json!({
                    "payment_id": row.payment_id,
                    "active_count": row.active_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 4: subscription windows are well formed (end after start
    /// when an end exists).
    async fn check_subscription_window_valid(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<BadWindowRow> = sqlx::query_as(
            r#"
            SELECT id, business_id, start_date, end_date
            FROM subscriptions
            WHERE end_date IS NOT NULL
              AND end_date <= start_date
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "subscription_window_valid".to_string(),
                business_ids: vec![row.business_id],
                description: "Subscription window ends on or before it starts".to_string(),
                context: serde_json::json!({
                    "subscription_id": row.id,
                    "start_date": row.start_date.to_string(),
                    "end_date": row.end_date.map(|d| d.to_string()),
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name.
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_active_subscription" => self.check_single_active_subscription().await,
            "completed_payment_complete" => self.check_completed_payment_complete().await,
            "refunded_payment_has_no_active" => {
                self.check_refunded_payment_has_no_active().await
            }
            "subscription_window_valid" => self.check_subscription_window_valid().await,
            _ => Ok(vec![]),
        }
    }

    /// Names of all available invariant checks.
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_active_subscription",
            "completed_payment_complete",
            "refunded_payment_has_no_active",
            "subscription_window_valid",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
    }

    #[test]
    fn available_checks_cover_every_branch() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 4);
        assert!(checks.contains(&"single_active_subscription"));
        assert!(checks.contains(&"refunded_payment_has_no_active"));
    }
}
