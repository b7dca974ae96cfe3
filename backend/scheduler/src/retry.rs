//! Retry policy: exponential backoff with jitter for failed recurring
//! tasks.
//!
//! The delay never re-runs a task in-process. It feeds the `next_run`
//! floor when a recurring task fails, so a flapping executor backs off
//! instead of firing on every tick, and exhaustion parks the task.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum consecutive failures before the task is parked as failed.
    pub max_attempts: u32,
    /// Base delay before the first retry, in seconds.
    pub base_delay_secs: u64,
    /// Multiplier for each subsequent wait (exponential factor).
    pub backoff_factor: f64,
    /// Delay cap in seconds.
    pub max_delay_secs: u64,
    /// Add random jitter (±25% of computed delay) to avoid thundering herd.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 60,
            backoff_factor: 2.0,
            max_delay_secs: 3_600,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Compute the delay before attempt `attempt_number` (1-indexed).
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        if attempt_number == 0 {
            return Duration::zero();
        }
        let delay_secs = self.base_delay_secs as f64
            * self.backoff_factor.powi((attempt_number - 1) as i32);
        let delay_secs = delay_secs.min(self.max_delay_secs as f64) as u64;

        let delay_secs = if self.jitter {
            // ±25% random jitter.
            let jitter = (delay_secs / 4) as i64;
            let offset: i64 = if jitter > 0 {
                (rand_offset() % (jitter as u64 * 2)) as i64 - jitter
            } else {
                0
            };
            (delay_secs as i64 + offset).max(0) as u64
        } else {
            delay_secs
        };

        Duration::seconds(delay_secs as i64)
    }

    pub fn should_retry(&self, attempt_number: u32) -> bool {
        attempt_number < self.max_attempts
    }
}

/// Simple xorshift64 for jitter without pulling in a full rand dep.
fn rand_offset() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEED: AtomicU64 = AtomicU64::new(0x123456789abcdef0);
    let x = SEED.load(Ordering::Relaxed);
    let x = x ^ (x << 13);
    let x = x ^ (x >> 7);
    let x = x ^ (x << 17);
    SEED.store(x, Ordering::Relaxed);
    x
}
