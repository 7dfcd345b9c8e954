//! Razorpay webhook reconciliation.
//!
//! Verifies each delivery's signature over the raw body, then applies the
//! event to the payments and subscriptions tables so that every
//! provider-side payment lands exactly once, no matter how often or how
//! concurrently the provider delivers it.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use subtle::ConstantTimeEq;

use crate::error::{BillingError, BillingResult};
use crate::events::{
    amount_to_major, CapturedPayment, FailedPayment, RefundCreated, WebhookEvent,
};
use crate::{payments, retry, subscriptions};

type HmacSha256 = Hmac<Sha256>;

/// Header the provider puts the hex-encoded HMAC-SHA256 signature in.
pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

/// Cancellation reason recorded when a refund tears down a subscription.
const REFUND_CANCELLATION_REASON: &str = "Payment refunded";

/// Webhook handler for Razorpay events.
///
/// Constructed explicitly with its pool and secret and injected where it is
/// needed; there is no process-global provider client.
pub struct WebhookHandler {
    pool: PgPool,
    webhook_secret: String,
}

impl WebhookHandler {
    pub fn new(pool: PgPool, webhook_secret: impl Into<String>) -> Self {
        Self {
            pool,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Verify the provider signature over the exact raw body bytes.
    ///
    /// The signature is an HMAC-SHA256 of the body under the shared secret,
    /// hex encoded. Comparison is constant time so the check leaks nothing
    /// about the expected value.
    pub fn verify_signature(&self, payload: &[u8], signature: &str) -> BillingResult<()> {
        if self.webhook_secret.is_empty() {
            tracing::error!("Webhook secret missing from environment, rejecting delivery");
            return Err(BillingError::MissingWebhookSecret);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| BillingError::MissingWebhookSecret)?;
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        if bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            Ok(())
        } else {
            tracing::warn!(
                payload_len = payload.len(),
                "Webhook signature mismatch, dropping event"
            );
            Err(BillingError::SignatureMismatch)
        }
    }

    /// Apply a verified event to the data store.
    ///
    /// Outcomes that redelivery cannot improve (duplicates, unknown records,
    /// unknown event types) resolve to `Ok` here; only failures worth a
    /// provider retry propagate.
    pub async fn process(&self, event: WebhookEvent) -> BillingResult<()> {
        match event {
            WebhookEvent::PaymentCaptured(capture) => {
                self.handle_payment_captured(&capture).await
            }
            WebhookEvent::PaymentFailed(failed) => self.handle_payment_failed(&failed).await,
            WebhookEvent::RefundCreated(refund) => self.handle_refund_created(&refund).await,
            WebhookEvent::Unhandled { event } => {
                tracing::info!(event = %event, "Ignoring unhandled webhook event type");
                Ok(())
            }
        }
    }

    async fn handle_payment_captured(&self, capture: &CapturedPayment) -> BillingResult<()> {
        // Cheap read-only duplicate check before any transaction is opened.
        // The provider guarantees at-least-once delivery, so replays of a
        // capture we already applied are the common case.
        if payments::find_completed_capture(
            &self.pool,
            &capture.order_id,
            &capture.payment_id,
        )
        .await?
        .is_some()
        {
            tracing::info!(
                order_id = %capture.order_id,
                payment_id = %capture.payment_id,
                "Capture already applied, skipping duplicate delivery"
            );
            return Ok(());
        }

        match retry::on_conflict(|| self.apply_capture(capture)).await {
            Ok(()) => Ok(()),
            Err(BillingError::OrphanPayment(order_id)) => {
                // The order was never initiated on our side. Redelivery
                // cannot create the missing row, so answer the provider
                // with success and leave the trail in the logs.
                tracing::error!(
                    order_id = %order_id,
                    payment_id = %capture.payment_id,
                    "Captured payment references an unknown order"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Transactional body of the captured-payment handler. Aborts as a unit
    /// on any error; the retry wrapper replays it on write conflicts.
    async fn apply_capture(&self, capture: &CapturedPayment) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        let payment = payments::lock_by_order_id(&mut tx, &capture.order_id)
            .await?
            .ok_or_else(|| BillingError::OrphanPayment(capture.order_id.clone()))?;

        // Re-check under the row lock: a concurrent delivery of the same
        // event can pass the outer check and still lose the race here.
        if payment.is_completed_capture(&capture.payment_id) {
            tx.rollback().await?;
            tracing::info!(
                order_id = %capture.order_id,
                payment_id = %capture.payment_id,
                "Capture applied by a concurrent delivery, nothing to do"
            );
            return Ok(());
        }

        let linked_active = match payment.subscription_id {
            Some(id) => subscriptions::is_active(&mut tx, id).await?.then_some(id),
            None => None,
        };

        let subscription_id = match linked_active {
            Some(id) => id,
            None => {
                let expired =
                    subscriptions::expire_active_for_business(&mut tx, payment.business_id)
                        .await?;
                if expired > 0 {
                    tracing::info!(
                        business_id = %payment.business_id,
                        expired = expired,
                        "Expired prior active subscriptions before renewal"
                    );
                }
                subscriptions::create_pro(&mut tx, payment.business_id, capture.captured_at)
                    .await?
            }
        };

        payments::mark_completed(
            &mut tx,
            payment.id,
            &capture.payment_id,
            subscription_id,
            amount_to_major(capture.amount_minor),
            capture.captured_at,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            business_id = %payment.business_id,
            order_id = %capture.order_id,
            payment_id = %capture.payment_id,
            subscription_id = %subscription_id,
            amount = amount_to_major(capture.amount_minor),
            "Payment captured and subscription reconciled"
        );

        Ok(())
    }

    async fn handle_payment_failed(&self, failed: &FailedPayment) -> BillingResult<()> {
        let updated = retry::on_conflict(|| {
            payments::mark_failed(&self.pool, &failed.order_id, failed.payment_id.as_deref())
        })
        .await?;

        if updated == 0 {
            // The order may belong to a different integration or predate
            // this system.
            tracing::warn!(
                order_id = %failed.order_id,
                "payment.failed for an order with no payment record, ignoring"
            );
        } else {
            tracing::info!(
                order_id = %failed.order_id,
                payment_id = ?failed.payment_id,
                "Payment marked failed"
            );
        }

        Ok(())
    }

    async fn handle_refund_created(&self, refund: &RefundCreated) -> BillingResult<()> {
        retry::on_conflict(|| self.apply_refund(refund)).await
    }

    /// Transactional body of the refund handler: the payment flips to
    /// refunded and the business's active subscriptions are cancelled
    /// together or not at all.
    async fn apply_refund(&self, refund: &RefundCreated) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        let Some(payment) = payments::lock_by_payment_id(&mut tx, &refund.payment_id).await?
        else {
            tx.rollback().await?;
            tracing::warn!(
                refund_id = %refund.refund_id,
                payment_id = %refund.payment_id,
                "refund.created for an unknown payment, ignoring"
            );
            return Ok(());
        };

        payments::mark_refunded(&mut tx, payment.id).await?;
        let cancelled = subscriptions::cancel_active_for_business(
            &mut tx,
            payment.business_id,
            refund.created_at,
            REFUND_CANCELLATION_REASON,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            business_id = %payment.business_id,
            refund_id = %refund.refund_id,
            payment_id = %refund.payment_id,
            subscriptions_cancelled = cancelled,
            "Refund applied"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(secret: &str) -> WebhookHandler {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://invisifeed@localhost/invisifeed")
            .unwrap();
        WebhookHandler::new(pool, secret)
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn accepts_a_valid_signature() {
        let handler = handler("whsec_test");
        let body = br#"{"event":"payment.captured"}"#;
        let signature = sign("whsec_test", body);
        assert!(handler.verify_signature(body, &signature).is_ok());
    }

    #[tokio::test]
    async fn rejects_a_signature_under_the_wrong_secret() {
        let handler = handler("whsec_test");
        let body = br#"{"event":"payment.captured"}"#;
        let signature = sign("whsec_other", body);
        let err = handler.verify_signature(body, &signature).unwrap_err();
        assert!(matches!(err, BillingError::SignatureMismatch));
    }

    #[tokio::test]
    async fn rejects_a_tampered_body() {
        let handler = handler("whsec_test");
        let signature = sign("whsec_test", br#"{"event":"payment.captured"}"#);
        let err = handler
            .verify_signature(br#"{"event":"refund.created"}"#, &signature)
            .unwrap_err();
        assert!(matches!(err, BillingError::SignatureMismatch));
    }

    #[tokio::test]
    async fn rejects_a_truncated_signature() {
        let handler = handler("whsec_test");
        let body = br#"{"event":"payment.captured"}"#;
        let mut signature = sign("whsec_test", body);
        signature.truncate(16);
        let err = handler.verify_signature(body, &signature).unwrap_err();
        assert!(matches!(err, BillingError::SignatureMismatch));
    }

    #[tokio::test]
    async fn missing_secret_is_a_configuration_fault() {
        let handler = handler("");
        let body = br#"{"event":"payment.captured"}"#;
        let err = handler.verify_signature(body, "deadbeef").unwrap_err();
        assert!(matches!(err, BillingError::MissingWebhookSecret));
    }
}
