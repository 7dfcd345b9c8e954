//! Error types for the billing crate.

use thiserror::Error;

/// Failures raised while verifying or reconciling webhook events.
#[derive(Debug, Error)]
pub enum BillingError {
    /// The shared webhook secret is absent from the runtime environment.
    /// A deployment fault, not something a caller can fix by retrying.
    #[error("webhook secret is not configured")]
    MissingWebhookSecret,

    /// The supplied signature does not match the request body.
    #[error("webhook signature mismatch")]
    SignatureMismatch,

    /// The body carried a known event type but its payload did not have the
    /// expected shape.
    #[error("malformed webhook payload: {0}")]
    InvalidPayload(String),

    /// A captured-payment event arrived for an order this system never
    /// recorded. Redelivery cannot create the missing row, so callers
    /// resolve this locally instead of surfacing a retryable failure.
    #[error("no payment recorded for order {0}")]
    OrphanPayment(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type BillingResult<T> = Result<T, BillingError>;
