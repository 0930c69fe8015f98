//! Retry-with-backoff utility for the transient half of the error taxonomy
//! (spec §7: `BackendUnavailable`/`Timeout` are "retried with exponential
//! backoff (`retry_delay × retry_backoff^n`), then surfaced").
//!
//! Grounded directly in `starknet_client::retry::{Retry, RetryConfig}`.

use std::iter::Take;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::{Action, Condition, RetryIf};
use tracing::debug;

use crate::error::BackendError;

/// Configuration for the retry mechanism, named to match spec §6's backend
/// configuration fields (`retry_delay`, `retry_backoff`, `max_retries`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial delay before the first retry, in milliseconds.
    pub retry_delay_millis: u64,
    /// Multiplicative backoff factor applied on each subsequent retry.
    pub retry_backoff: u32,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { retry_delay_millis: 100, retry_backoff: 2, max_retries: 3 }
    }
}

/// Retries an action with exponential backoff, logging each retry decision.
pub struct Retry {
    strategy: Take<ExponentialBackoff>,
}

impl Retry {
    pub fn new(config: &RetryConfig) -> Self {
        let backoff = ExponentialBackoff::from_millis(config.retry_delay_millis.max(1))
            .factor(config.retry_backoff.max(1) as u64);
        Retry { strategy: backoff.take(config.max_retries) }
    }

    fn log_condition<C: Condition<BackendError>>(err: &BackendError, condition: &mut C) -> bool {
        if condition.should_retry(err) {
            debug!("retryable backend error {:?}, retrying", err);
            true
        } else {
            debug!("non-retryable backend error {:?}, surfacing", err);
            false
        }
    }

    /// Retries `action` only while the error reports
    /// [`BackendError::is_retryable`].
    pub async fn start<I, A>(&self, action: A) -> Result<I, BackendError>
    where
        A: Action<Item = I, Error = BackendError>,
    {
        self.start_with_condition(action, |err: &BackendError| err.is_retryable()).await
    }

    pub async fn start_with_condition<I, A, C>(
        &self,
        action: A,
        mut condition: C,
    ) -> Result<I, BackendError>
    where
        A: Action<Item = I, Error = BackendError>,
        C: Condition<BackendError> + Send,
    {
        let condition: Box<dyn Send + FnMut(&BackendError) -> bool> =
            Box::new(move |err| Self::log_condition(err, &mut condition));
        RetryIf::spawn(self.strategy.clone(), action, condition).await
    }
}

/// `retry_delay × retry_backoff^n` as a plain [`Duration`], for call sites
/// that want to log or test the schedule without driving a real [`Retry`].
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let millis = config.retry_delay_millis.saturating_mul(
        (config.retry_backoff.max(1) as u64).saturating_pow(attempt),
    );
    Duration::from_millis(millis)
}

#[cfg(test)]
mod retry_test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn backoff_delay_grows_exponentially() {
        let config = RetryConfig { retry_delay_millis: 100, retry_backoff: 2, max_retries: 3 };
        assert_eq!(backoff_delay(&config, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let retry = Retry::new(&RetryConfig { retry_delay_millis: 1, retry_backoff: 1, max_retries: 5 });
        let attempts_clone = attempts.clone();
        let result = retry
            .start(move || {
                let attempts = attempts_clone.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(BackendError::BackendUnavailable("not yet".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_errors() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let retry = Retry::new(&RetryConfig { retry_delay_millis: 1, retry_backoff: 1, max_retries: 5 });
        let attempts_clone = attempts.clone();
        let result: Result<(), BackendError> = retry
            .start(move || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::Unauthorized("nope".into()))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
