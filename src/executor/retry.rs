//! Retry with exponential backoff for transient provider failures.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::ProviderError;

use super::cancel::CancelToken;

/// Backoff policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum provider calls, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound of a computed delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

/// Why a retried call stopped without a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupted {
    /// The last error; fatal, or transient with attempts exhausted.
    Failed(ProviderError),
    /// Cancellation was requested between attempts.
    Cancelled,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            multiplier: config.multiplier,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based) after `error`.
    ///
    /// A provider-supplied retry-after wins when it is longer, still capped
    /// at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, retry: u32, error: &ProviderError) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let computed = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let backoff = Duration::from_secs_f64(computed.min(self.max_delay.as_secs_f64()));

        match error.retry_after() {
            Some(hint) if hint > backoff => hint.min(self.max_delay),
            _ => backoff,
        }
    }

    /// Calls `op` until it succeeds, fails fatally, runs out of attempts or
    /// the run is cancelled. Returns the outcome and the number of calls made.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancelToken,
        mut op: F,
    ) -> (Result<T, Interrupted>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match op().await {
                Ok(value) => return (Ok(value), attempts),
                Err(error) => error,
            };

            if !error.is_retryable() || attempts >= self.max_attempts {
                return (Err(Interrupted::Failed(error)), attempts);
            }

            if cancel.is_cancelled() {
                return (Err(Interrupted::Cancelled), attempts);
            }

            let delay = self.delay_for(attempts - 1, &error);
            warn!(
                "{label}: attempt {attempts}/{} failed ({error}), retrying in {delay:?}",
                self.max_attempts
            );

            let mut watcher = cancel.clone();
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = watcher.cancelled() => {
                    warn!("{label}: cancelled during backoff");
                    return (Err(Interrupted::Cancelled), attempts);
                }
            }
        }
    }
}
