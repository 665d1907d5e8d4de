//! Local monotonic time source

use std::sync::OnceLock;
use std::time::Instant;

/// Source of local monotonic time in nanoseconds
///
/// The engine never reads the system clock directly, so tests can drive it
/// with a manual clock.
pub trait LocalClock: Send + Sync {
    /// Nanoseconds since an arbitrary fixed origin
    fn now(&self) -> u64;
}

/// Process-wide monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl LocalClock for MonotonicClock {
    #[allow(
        clippy::cast_possible_truncation,
        reason = "u64 nanoseconds cover centuries of uptime"
    )]
    fn now(&self) -> u64 {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        ORIGIN.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}

impl<T: LocalClock + ?Sized> LocalClock for std::sync::Arc<T> {
    fn now(&self) -> u64 {
        (**self).now()
    }
}
