//! Razorpay webhook event parsing.
//!
//! The provider posts a JSON envelope with an `event` string and a `payload`
//! object keyed by entity type. Parsing happens exactly once, at the entry
//! point, into a closed enum so each handler receives a strongly shaped
//! input instead of an untyped document.

use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

/// A successfully captured payment, ready to be reconciled.
#[derive(Debug, Clone)]
pub struct CapturedPayment {
    pub order_id: String,
    pub payment_id: String,
    /// Amount in the provider's minor currency unit (paise).
    pub amount_minor: i64,
    pub captured_at: OffsetDateTime,
}

/// A payment attempt the provider rejected.
#[derive(Debug, Clone)]
pub struct FailedPayment {
    pub order_id: String,
    pub payment_id: Option<String>,
}

/// A refund issued against a previously captured payment.
#[derive(Debug, Clone)]
pub struct RefundCreated {
    pub refund_id: String,
    pub payment_id: String,
    pub created_at: OffsetDateTime,
}

/// One webhook delivery, dispatched on the provider's `event` field.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    PaymentCaptured(CapturedPayment),
    PaymentFailed(FailedPayment),
    RefundCreated(RefundCreated),
    /// An event type this system does not care about. Accepted and logged,
    /// never rejected, so the provider does not retry-storm on it.
    Unhandled { event: String },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Payload,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    payment: Option<Wrapped<PaymentEntity>>,
    refund: Option<Wrapped<RefundEntity>>,
}

#[derive(Debug, Deserialize)]
struct Wrapped<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    created_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RefundEntity {
    id: String,
    payment_id: String,
    #[serde(default)]
    created_at: Option<i64>,
}

impl WebhookEvent {
    /// Parse a raw webhook body. Must only be called after the signature
    /// over these exact bytes has been verified.
    pub fn parse(body: &[u8]) -> BillingResult<Self> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| BillingError::InvalidPayload(e.to_string()))?;

        match envelope.event.as_str() {
            "payment.captured" => {
                let payment = require_payment(&envelope)?;
                Ok(WebhookEvent::PaymentCaptured(captured_from(payment)?))
            }
            // The provider emits `order.paid` alongside `payment.captured`
            // for the same capture. Treated identically when a payment
            // sub-object is present; ignored otherwise.
            "order.paid" => match envelope.payload.payment.as_ref() {
                Some(wrapped) => Ok(WebhookEvent::PaymentCaptured(captured_from(
                    &wrapped.entity,
                )?)),
                None => Ok(WebhookEvent::Unhandled {
                    event: envelope.event.clone(),
                }),
            },
            "payment.failed" => {
                let payment = require_payment(&envelope)?;
                let order_id = payment.order_id.clone().ok_or_else(|| {
                    BillingError::InvalidPayload(
                        "payment.failed without an order id".to_string(),
                    )
                })?;
                Ok(WebhookEvent::PaymentFailed(FailedPayment {
                    order_id,
                    payment_id: payment.id.clone(),
                }))
            }
            "refund.created" => {
                let refund = envelope.payload.refund.as_ref().ok_or_else(|| {
                    BillingError::InvalidPayload(
                        "refund.created without a refund entity".to_string(),
                    )
                })?;
                Ok(WebhookEvent::RefundCreated(RefundCreated {
                    refund_id: refund.entity.id.clone(),
                    payment_id: refund.entity.payment_id.clone(),
                    created_at: parse_epoch(refund.entity.created_at)?,
                }))
            }
            _ => Ok(WebhookEvent::Unhandled {
                event: envelope.event.clone(),
            }),
        }
    }
}

fn require_payment(envelope: &Envelope) -> BillingResult<&PaymentEntity> {
    envelope
        .payload
        .payment
        .as_ref()
        .map(|wrapped| &wrapped.entity)
        .ok_or_else(|| {
            BillingError::InvalidPayload(format!(
                "{} without a payment entity",
                envelope.event
            ))
        })
}

fn captured_from(payment: &PaymentEntity) -> BillingResult<CapturedPayment> {
    let payment_id = payment.id.clone().ok_or_else(|| {
        BillingError::InvalidPayload("captured payment without an id".to_string())
    })?;
    let order_id = payment.order_id.clone().ok_or_else(|| {
        BillingError::InvalidPayload("captured payment without an order id".to_string())
    })?;
    let amount_minor = payment.amount.ok_or_else(|| {
        BillingError::InvalidPayload("captured payment without an amount".to_string())
    })?;

    Ok(CapturedPayment {
        order_id,
        payment_id,
        amount_minor,
        captured_at: parse_epoch(payment.created_at)?,
    })
}

fn parse_epoch(seconds: Option<i64>) -> BillingResult<OffsetDateTime> {
    let seconds = seconds.ok_or_else(|| {
        BillingError::InvalidPayload("missing entity timestamp".to_string())
    })?;
    OffsetDateTime::from_unix_timestamp(seconds).map_err(|_| {
        BillingError::InvalidPayload(format!("timestamp {} out of range", seconds))
    })
}

/// Convert a provider minor-unit amount (paise) to major currency units.
pub fn amount_to_major(amount_minor: i64) -> f64 {
    amount_minor as f64 / 100.0
}
