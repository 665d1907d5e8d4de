//! Manually advanced clock

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::time::LocalClock;

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Clock reading `start` nanoseconds
    #[must_use]
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move forward by `by`
    #[allow(clippy::cast_possible_truncation, reason = "Test durations are short")]
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Jump to `now` nanoseconds
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl LocalClock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
