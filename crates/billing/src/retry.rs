//! Retry-with-backoff for transient write conflicts.
//!
//! Two transactions touching overlapping rows can make Postgres reject one
//! of them with a serialization failure or deadlock. Those rejections are
//! safe to replay; everything else must propagate so the webhook entry
//! point can answer 500 and let the provider redeliver.

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;

use crate::error::BillingError;

/// Retries attempted after the initial try.
pub const MAX_RETRIES: usize = 3;

/// SQLSTATE codes Postgres uses for concurrency-control rejections.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

/// The backoff schedule between attempts: 50ms, 100ms, 200ms.
pub fn backoff() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2).factor(25).take(MAX_RETRIES)
}

/// Whether an error is a transient concurrency-control rejection worth
/// replaying.
pub fn is_transient_conflict(err: &BillingError) -> bool {
    match err {
        BillingError::Database(sqlx::Error::Database(db)) => matches!(
            db.code().as_deref(),
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
        ),
        _ => false,
    }
}

/// Run `action`, replaying it on errors matching `condition` according to
/// the backoff schedule. Generic over the error type so it can be exercised
/// without a database.
pub async fn with_backoff<T, E, A, F, C>(action: A, condition: C) -> Result<T, E>
where
    A: FnMut() -> F,
    F: Future<Output = Result<T, E>>,
    C: FnMut(&E) -> bool,
{
    RetryIf::spawn(backoff(), action, condition).await
}

/// Run a transactional body, replaying it on transient write conflicts.
pub async fn on_conflict<T, A, F>(action: A) -> Result<T, BillingError>
where
    A: FnMut() -> F,
    F: Future<Output = Result<T, BillingError>>,
{
    with_backoff(action, is_transient_conflict).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn backoff_schedule_doubles_from_fifty_millis() {
        let delays: Vec<Duration> = backoff().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(50),
                Duration::from_millis(100),
                Duration::from_millis(200),
            ]
        );
    }

    #[test]
    fn non_database_errors_are_not_conflicts() {
        assert!(!is_transient_conflict(&BillingError::SignatureMismatch));
        assert!(!is_transient_conflict(&BillingError::OrphanPayment(
            "order_A1".to_string()
        )));
        assert!(!is_transient_conflict(&BillingError::Database(
            sqlx::Error::RowNotFound
        )));
    }

    #[tokio::test]
    async fn replays_while_the_condition_matches() {
        let attempts = AtomicUsize::new(0);

        let result: Result<u32, &str> = with_backoff(
            || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err("conflict")
                    } else {
                        Ok(7)
                    }
                }
            },
            |err: &&str| *err == "conflict",
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_schedule_is_exhausted() {
        let attempts = AtomicUsize::new(0);

        let result: Result<(), &str> = with_backoff(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("conflict") }
            },
            |err: &&str| *err == "conflict",
        )
        .await;

        assert_eq!(result, Err("conflict"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1 + MAX_RETRIES);
    }

    #[tokio::test]
    async fn fails_fast_on_errors_the_condition_rejects() {
        let attempts = AtomicUsize::new(0);

        let result: Result<(), &str> = with_backoff(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
            |err: &&str| *err == "conflict",
        )
        .await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
