// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! InvisiFeed Billing Module
//!
//! Reconciles Razorpay payment webhooks against the payments and
//! subscriptions tables.
//!
//! ## Guarantees
//!
//! - **Exactly-once application**: a captured payment flips its `Payment`
//!   row to completed and provisions a subscription once, no matter how
//!   often or how concurrently the provider delivers the event.
//! - **Single active subscription**: activating a new subscription expires
//!   the business's prior active ones in the same transaction.
//! - **Refund cascade**: a refund marks the payment refunded and cancels
//!   the business's active subscriptions atomically.
//! - **Conflict retry**: transient write conflicts are replayed with
//!   exponential backoff; everything else escalates so the provider
//!   redelivers.

pub mod error;
pub mod events;
pub mod invariants;
pub mod payments;
pub mod retry;
pub mod subscriptions;
pub mod webhooks;

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{
    amount_to_major, CapturedPayment, FailedPayment, RefundCreated, WebhookEvent,
};

// Payments
pub use payments::{Payment, PaymentStatus};

// Subscriptions
pub use subscriptions::{
    PlanType, Subscription, SubscriptionStatus, PRO_PERIOD_DAYS,
};

// Webhooks
pub use webhooks::{WebhookHandler, SIGNATURE_HEADER};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};
