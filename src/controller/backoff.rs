//! Per-object exponential backoff for failed reconciliations.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

/// First retry delay after a failure.
pub const BACKOFF_BASE: Duration = Duration::from_secs(5);
/// Upper bound on the retry delay.
pub const BACKOFF_MAX: Duration = Duration::from_secs(5 * 60);

/// Consecutive failure counts keyed by object name.
#[derive(Debug)]
pub struct ErrorBackoff {
    failures: Mutex<HashMap<String, u32>>,
    base: Duration,
    max: Duration,
}

impl Default for ErrorBackoff {
    fn default() -> Self {
        Self::new(BACKOFF_BASE, BACKOFF_MAX)
    }
}

impl ErrorBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            base,
            max: max.max(base),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.to_string()).or_insert(0);
        let delay = self
            .base
            .checked_mul(2u32.saturating_pow(*count))
            .map_or(self.max, |d| d.min(self.max));
        *count = count.saturating_add(1);
        delay
    }

    /// Forget the failures of `key` after a successful pass.
    pub fn reset(&self, key: &str) {
        self.failures.lock().remove(key);
    }
}
