//! Bounded retry with fixed backoff.
//!
//! Every transient-failure site in the pipeline (directory connections,
//! directory queries) retries through this one policy instead of growing
//! its own loop. Sleeping goes through the [`Clock`] seam, so tests
//! assert the backoff schedule on a virtual clock.

use roost_env::Clock;
use std::future::Future;
use std::time::Duration;

/// Default total attempts before a transient failure becomes permanent.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default pause between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// A bounded retry policy with a fixed pause between attempts.
///
/// The bounded attempt count doubles as the pipeline's deadline: there is
/// no separate timeout propagation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Fixed pause between consecutive attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Runs `operation` until it succeeds or attempts are exhausted,
    /// sleeping `backoff` between attempts.
    ///
    /// Returns the last error once `max_attempts` have failed. Each
    /// failed attempt is logged with its position in the schedule.
    pub async fn run<T, E, F, Fut>(
        &self,
        clock: &dyn Clock,
        what: &str,
        mut operation: F,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.max_attempts => {
                    tracing::warn!(
                        what,
                        attempt,
                        max_attempts = self.max_attempts,
                        %error,
                        "transient failure, backing off"
                    );
                    clock.sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        what,
                        attempts = self.max_attempts,
                        %error,
                        "giving up after exhausting retries"
                    );
                    return Err(error);
                }
            }
        }
    }
}
