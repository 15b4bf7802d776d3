//! Bounded retry with an injectable predicate and delay.
//!
//! [`retry_with`] keeps the policy visible as plain values: how many attempts,
//! which errors are worth another try, and how long to wait in between.
//! Production code passes a [`JitterDelay`]; tests pass a zero delay.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

/// Attempt budget for one call to [`retry_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// A policy of zero attempts is raised to one.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Uniformly random delay in `[min, max]`, independent of the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterDelay {
    min: Duration,
    max: Duration,
}

impl JitterDelay {
    /// Bounds given in the wrong order are swapped.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let (lo, hi) = (self.min.as_millis() as u64, self.max.as_millis() as u64);
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }

    /// Adapts the jitter into the delay generator [`retry_with`] expects.
    pub fn as_fn(self) -> impl FnMut(u32) -> Duration {
        move |_attempt| self.sample()
    }
}

/// Runs `op` until it succeeds, fails with an error `should_retry` rejects, or
/// the policy's attempts are used up.
///
/// `op` receives the 1-based attempt number. Rejected errors return at once
/// without sleeping. On exhaustion the last error is returned unchanged.
pub async fn retry_with<T, E, Op, Fut, P, D>(
    policy: &RetryPolicy,
    mut op: Op,
    should_retry: P,
    mut delay: D,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    D: FnMut(u32) -> Duration,
    E: Display,
{
    let max = policy.max_attempts();
    let mut attempt = 1;
    loop {
        debug!(attempt, max, "starting attempt");
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !should_retry(&err) {
                    debug!(attempt, error = %err, "error is not retriable, giving up");
                    return Err(err);
                }
                if attempt >= max {
                    debug!(attempt, max, error = %err, "attempts exhausted");
                    return Err(err);
                }
                let wait = delay(attempt);
                debug!(
                    attempt,
                    max,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                if !wait.is_zero() {
                    sleep(wait).await;
                }
                attempt += 1;
            }
        }
    }
}
