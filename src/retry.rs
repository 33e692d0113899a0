//! Bounded retry for transient provider errors.
//!
//! Only errors with [`AppError::is_transient`] are retried; anything else is
//! returned after the first attempt.

use std::future::Future;
use std::time::Duration;

use crate::dispatcher::Sleeper;
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Fixed sleep between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

/// Result of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, AppError>,
    pub attempts: u32,
}

pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match operation().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(err) => {
                if !err.is_transient() || attempt >= max_attempts {
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                    };
                }
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_secs = policy.delay.as_secs(),
                    error = %err,
                    "transient provider error, retrying"
                );
            }
        }

        sleeper.sleep(policy.delay).await;
        attempt += 1;
    }
}
