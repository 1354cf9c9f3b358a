//! Retry policy value object
//!
//! One policy drives both the per-identifier scrape retry controller and
//! the upload adapter's sub-chunk retries, so classification and delay
//! behavior stay identical across the pipeline.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Classification of a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying (timeout, server error, blocked response)
    Transient,
    /// Retrying cannot help (malformed input, explicit not-found)
    Terminal,
}

/// Bounded retry policy with randomized inter-attempt delays
///
/// The randomized delay avoids synchronized request bursts when several
/// workers back off at the same time.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first (minimum 1)
    pub max_attempts: u32,
    /// Lower bound of the randomized delay between attempts
    pub min_delay: Duration,
    /// Upper bound of the randomized delay between attempts
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    /// Sample a delay uniformly from the configured bounds
    pub fn sample_delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let min_ms = self.min_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }

    /// Run `op` until it succeeds, fails terminally, or attempts are
    /// exhausted. `classify` decides whether a given error is worth
    /// another attempt.
    ///
    /// Returns the final error when all attempts fail.
    pub async fn run<T, E, F, Fut, C>(&self, mut op: F, classify: C) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClass,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if classify(&err) == ErrorClass::Terminal {
                        debug!(attempt, error = %err, "Terminal failure, not retrying");
                        return Err(err);
                    }
                    if attempt >= self.max_attempts {
                        debug!(attempt, error = %err, "Retry budget exhausted");
                        return Err(err);
                    }
                    let delay = self.sample_delay();
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
