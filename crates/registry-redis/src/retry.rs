//! Retry logic for transient Redis failures.
//!
//! [`with_retry`] wraps an async operation and retries the errors its
//! `retryable` predicate accepts. Idempotent commands retry every transient
//! failure; commands that must apply at most once retry only failures that
//! never reached the server. Other errors are returned immediately.
//!
//! # Backoff Strategy
//!
//! - Base delay doubles with each attempt: `initial_backoff * 2^attempt`
//! - Delay is capped at `max_backoff`
//! - Random jitter of 0–50% of the computed delay is added to spread out retries from many nodes

use std::{fmt, future::Future, time::Duration};

use cas_ticket_registry::{RegistryError, RegistryResult};
use fail::fail_point;
use rand::Rng;

use crate::config::RetryPolicyConfig;

/// Executes `operation`, retrying the errors `retryable` accepts.
///
/// Returns the first success, or the last error once retries run out.
#[tracing::instrument(skip(config, retryable, operation), fields(max_retries = config.max_retries))]
pub(crate) async fn with_retry<F, Fut, T, E>(
    config: &RetryPolicyConfig,
    operation_name: &str,
    retryable: fn(&E) -> bool,
    mut operation: F,
) -> RegistryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<RegistryError> + fmt::Display,
{
    let mut last_error: Option<RegistryError> = None;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry",
                    );
                }
                return Ok(value);
            },
            Err(err) if retryable(&err) && attempt < config.max_retries => {
                let delay = compute_backoff(config, attempt);
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient error, retrying after backoff",
                );
                let err: RegistryError = err.into();
                fail_point!("redis-retry-before-sleep", |_| Err(err.clone()));
                tokio::time::sleep(delay).await;
                last_error = Some(err);
            },
            Err(err) => {
                if attempt > 0 && retryable(&err) {
                    tracing::error!(operation = operation_name, error = %err, "retries exhausted");
                }
                return Err(err.into());
            },
        }
    }

    Err(last_error
        .unwrap_or_else(|| RegistryError::internal("retry loop completed without result or error")))
}

fn compute_backoff(config: &RetryPolicyConfig, attempt: u32) -> Duration {
    let base = config.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(config.max_backoff);

    let jitter_range = capped.as_millis() as u64 / 2;
    if jitter_range > 0 {
        let jitter = rand::rng().random_range(0..=jitter_range);
        capped + Duration::from_millis(jitter)
    } else {
        capped
    }
}


#[cfg(all(test, feature = "failpoints"))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod failpoint_tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_failpoint_before_sleep_ends_retries_with_last_error() {
        let scenario = fail::FailScenario::setup();
        fail::cfg("redis-retry-before-sleep", "return").expect("failed to configure fail point");

        let calls = AtomicU32::new(0);
        let policy = RetryPolicyConfig::builder()
            .max_retries(3)
            .initial_backoff(Duration::from_millis(1))
            .max_backoff(Duration::from_millis(2))
            .build();
        let result: RegistryResult<()> = with_retry(&policy, "get", RegistryError::is_transient, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RegistryError::timeout()) }
        })
        .await;

        assert!(matches!(result, Err(RegistryError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        scenario.teardown();
    }
}
