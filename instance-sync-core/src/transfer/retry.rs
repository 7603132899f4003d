//! Retry policy composed around byte-transfer calls.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Constant;
use backoff::future::retry_notify;
use backoff::Error as BackoffError;
use tracing::warn;

use crate::error::SyncError;

pub const TRANSFER_MAX_ATTEMPTS: usize = 5;
pub const TRANSFER_RETRY_DELAY_SECS: u64 = 2;

/// How often and how patiently a transfer is retried.
///
/// Only errors for which [`SyncError::is_transient`] holds are retried. The
/// last failure is returned unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: TRANSFER_MAX_ATTEMPTS,
            delay: Duration::from_secs(TRANSFER_RETRY_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or the attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let max_attempts = self.max_attempts;
        let mut attempt = 0usize;

        retry_notify(
            Constant::new(self.delay),
            || {
                attempt += 1;
                let current = attempt;
                let fut = op();
                async move {
                    match fut.await {
                        Ok(value) => Ok(value),
                        Err(err) if err.is_transient() && current < max_attempts => {
                            Err(BackoffError::transient(err))
                        }
                        Err(err) => Err(BackoffError::permanent(err)),
                    }
                }
            },
            |err: SyncError, wait: Duration| {
                warn!(
                    what,
                    error = %err,
                    wait_secs = wait.as_secs_f32(),
                    max_attempts,
                    "Transient transfer error, retrying"
                );
            },
        )
        .await
    }
}
