//! Retry policy: exponential backoff with bounded jitter.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Backoff parameters for the retry scheduler.
///
/// `delay = min(base · factor^retry_count · jitter, max_delay)` with jitter
/// in `0.75..1.25`. Jitter is derived from a hash of the operation id and
/// retry count rather than an RNG, so schedules are reproducible in tests
/// while still decorrelating concurrent clients.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            factor: 2.0,
            max_delay_ms: 30_000,
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Compute the delay before retry number `retry_count` of an operation.
    pub fn delay_for(&self, operation_id: &str, retry_count: u32) -> Duration {
        let exponential =
            self.base_delay_ms as f64 * self.factor.powi(retry_count.min(32) as i32);
        let jittered = exponential * jitter_factor(operation_id, retry_count);
        let capped = jittered.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Whether an operation has any retries left.
    pub fn can_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

/// Deterministic jitter in `0.75..1.25`.
fn jitter_factor(operation_id: &str, retry_count: u32) -> f64 {
    let mut hasher = DefaultHasher::new();
    operation_id.hash(&mut hasher);
    retry_count.hash(&mut hasher);
    let normalized = hasher.finish() as f64 / u64::MAX as f64;
    0.75 + normalized * 0.5
}
