//! Interval progress logging for long record streams.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// Logs a message each time a running count crosses a multiple of the interval.
///
/// Safe to share between threads.
#[derive(Debug)]
pub struct ProgressTracker {
    interval: u64,
    message: String,
    count: AtomicU64,
}

impl ProgressTracker {
    /// Tracker with the default interval of 1,000,000.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            interval: 1_000_000,
            message: message.into(),
            count: AtomicU64::new(0),
        }
    }

    /// Set the logging interval; 0 is treated as 1.
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Add to the count, logging once per interval boundary crossed.
    ///
    /// Returns `true` if the new count lands exactly on a boundary.
    pub fn log_if_needed(&self, additional: u64) -> bool {
        if additional == 0 {
            let count = self.count.load(Ordering::Relaxed);
            return count > 0 && count % self.interval == 0;
        }

        let prev = self.count.fetch_add(additional, Ordering::Relaxed);
        let new_count = prev + additional;

        for i in (prev / self.interval + 1)..=(new_count / self.interval) {
            info!(count = i * self.interval, "{}", self.message);
        }

        new_count % self.interval == 0
    }

    /// Log the final count unless the last boundary already reported it.
    pub fn log_final(&self) {
        if !self.log_if_needed(0) {
            let count = self.count.load(Ordering::Relaxed);
            if count > 0 {
                info!(count, "{} (complete)", self.message);
            }
        }
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
