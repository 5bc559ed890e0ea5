//! Retry logic with linear backoff.
//!
//! Retries a fallible operation only while its error is classified as
//! retryable. The delay before retry `n` is `n * base_delay`, so the pause
//! grows by one step after every failed attempt.

use std::time::{Duration, Instant};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one (minimum 1).
    pub max_attempts: u32,

    /// Backoff step. Retry `n` waits `n * base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_secs(2) }
    }
}

impl RetryConfig {
    /// Create a config that performs exactly one attempt.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Default::default() }
    }

    /// Create a config with the given attempt bound and backoff step.
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Result of a retry operation.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The final result (success or last error).
    pub result: Result<T, E>,

    /// Number of attempts made.
    pub attempts: u32,

    /// Delays slept between attempts, in order.
    pub delays: Vec<Duration>,

    /// Total time spent (including delays).
    pub total_time: Duration,
}

impl<T, E> RetryResult<T, E> {
    /// Check if the operation succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Whether more than one attempt was made.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Get the result.
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Retry a synchronous operation while `is_retryable` accepts its error.
///
/// Errors rejected by `is_retryable` are returned after the attempt that
/// produced them.
pub fn retry_if<T, E, F, P>(config: &RetryConfig, is_retryable: P, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    let start = Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut attempts = 0;
    let mut delays = Vec::new();

    loop {
        attempts += 1;
        let result = operation(attempts);

        let give_up = match &result {
            Ok(_) => true,
            Err(err) => attempts >= max_attempts || !is_retryable(err),
        };

        if give_up {
            return RetryResult { result, attempts, delays, total_time: start.elapsed() };
        }

        let delay = config.delay_for_attempt(attempts);
        tracing::debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, "retrying");
        std::thread::sleep(delay);
        delays.push(delay);
    }
}
