//! Playback statistics
//!
//! A fixed-size moving window of sync error, correction, correction magnitude
//! and drift, plus monotonic session counters.

/// Frames per statistics window
pub const STATISTICS_WINDOW: usize = 1003;

/// One released frame's measurements, in output frames
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Sample {
    sync_error: i64,
    correction: i64,
    abs_correction: i64,
    drift: i64,
}

/// Circular moving-average window
#[derive(Debug, Clone)]
pub struct StatisticsWindow {
    samples: Box<[Sample]>,
    next: usize,
    len: usize,
    sums: Sample,
    previous_sync_error: i64,
    previous_correction: i64,
    primed: bool,
}

impl Default for StatisticsWindow {
    fn default() -> Self {
        Self::new(STATISTICS_WINDOW)
    }
}

impl StatisticsWindow {
    /// Create a window holding `capacity` samples
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![Sample::default(); capacity.max(1)].into_boxed_slice(),
            next: 0,
            len: 0,
            sums: Sample::default(),
            previous_sync_error: 0,
            previous_correction: 0,
            primed: false,
        }
    }

    /// Record one frame. Drift is the change in sync error not explained by
    /// the previous correction.
    pub fn record(&mut self, sync_error: i64, correction: i64) {
        let drift = if self.primed {
            sync_error - self.previous_sync_error - self.previous_correction
        } else {
            0
        };
        self.primed = true;
        self.previous_sync_error = sync_error;
        self.previous_correction = correction;

        let sample = Sample {
            sync_error,
            correction,
            abs_correction: correction.abs(),
            drift,
        };
        if self.len == self.samples.len() {
            let old = self.samples[self.next];
            self.sums.sync_error -= old.sync_error;
            self.sums.correction -= old.correction;
            self.sums.abs_correction -= old.abs_correction;
            self.sums.drift -= old.drift;
        } else {
            self.len += 1;
        }
        self.samples[self.next] = sample;
        self.sums.sync_error += sample.sync_error;
        self.sums.correction += sample.correction;
        self.sums.abs_correction += sample.abs_correction;
        self.sums.drift += sample.drift;
        self.next = (self.next + 1) % self.samples.len();
    }

    /// Samples currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the most recent sample completed a full window
    #[must_use]
    pub fn window_complete(&self) -> bool {
        self.len == self.samples.len() && self.next == 0
    }

    #[allow(clippy::cast_precision_loss, reason = "Sums of a thousand frame counts")]
    fn mean(&self, sum: i64) -> f64 {
        if self.len == 0 {
            0.0
        } else {
            sum as f64 / self.len as f64
        }
    }

    /// Moving-average sync error in frames
    #[must_use]
    pub fn mean_sync_error(&self) -> f64 {
        self.mean(self.sums.sync_error)
    }

    /// Moving-average correction in frames per frame
    #[must_use]
    pub fn mean_correction(&self) -> f64 {
        self.mean(self.sums.correction)
    }

    /// Moving-average correction magnitude; insertions and removals both count
    #[must_use]
    pub fn mean_abs_correction(&self) -> f64 {
        self.mean(self.sums.abs_correction)
    }

    /// Moving-average drift in frames per frame
    #[must_use]
    pub fn mean_drift(&self) -> f64 {
        self.mean(self.sums.drift)
    }

    /// Forget everything, as after a flush.
    pub fn reset(&mut self) {
        self.next = 0;
        self.len = 0;
        self.sums = Sample::default();
        self.previous_sync_error = 0;
        self.previous_correction = 0;
        self.primed = false;
    }
}

/// Monotonic session counters, kept under the buffer lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerCounters {
    /// Packets offered to the ring
    pub packets_received: u64,
    /// Positions released with no frame
    pub missing_frames: u64,
    /// Packets that arrived after their slot was passed by the write cursor
    pub late_packets: u64,
    /// Packets older than the read cursor
    pub too_late_packets: u64,
    /// Retransmission requests issued
    pub resend_requests: u64,
    /// Packets that repeated a stored slot
    pub duplicate_packets: u64,
    /// Payloads the decoder rejected
    pub decode_failures: u64,
    /// Frames dropped to reach a flush target
    pub flushed_frames: u64,
    /// Unread slots overwritten because the ring was full
    pub evicted_slots: u64,
    /// Hard corrections made
    pub hard_resyncs: u64,
    /// Silence insertions, including missing frames and hard-correction fills
    pub silence_insertions: u64,
    /// Frames added (positive) or removed (negative) by stuffing
    pub stuffed_frames: i64,
}

/// Point-in-time statistics for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackStats {
    /// Session counters
    pub counters: PlayerCounters,
    /// Most recent sync error in output frames
    pub sync_error_frames: i64,
    /// Moving-average sync error in milliseconds
    pub mean_sync_error_ms: f64,
    /// Moving-average correction in parts per million
    pub correction_ppm: f64,
    /// Moving-average correction magnitude in parts per million
    pub abs_correction_ppm: f64,
    /// Moving-average drift in parts per million
    pub drift_ppm: f64,
    /// Drift of the clock bridge in parts per million
    pub clock_drift_ppm: f64,
    /// Packets released since the session started, missing ones excluded
    pub packets_played: u64,
    /// Slots currently occupied
    pub occupancy: usize,
    /// Smallest occupancy seen in the current window
    pub min_occupancy: usize,
    /// Largest occupancy seen in the current window
    pub max_occupancy: usize,
    /// Smallest sink queue seen in the current window, if the sink reports one
    pub min_sink_queue: Option<i64>,
    /// Whether the ring is still pre-rolling
    pub buffering: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_means() {
        let mut window = StatisticsWindow::new(4);
        assert!(window.is_empty());
        for e in [10, 20, 30, 40] {
            window.record(e, 0);
        }
        assert!((window.mean_sync_error() - 25.0).abs() < 1e-9);
        assert!(window.window_complete());

        window.record(50, 0);
        assert_eq!(window.len(), 4);
        assert!((window.mean_sync_error() - 35.0).abs() < 1e-9);
        assert!(!window.window_complete());
    }

    #[test]
    fn test_drift_excludes_corrections() {
        let mut window = StatisticsWindow::new(8);
        window.record(0, 0);
        // Error grew by 3 while the corrector removed 1: drift is 3 - 0.
        window.record(3, -1);
        // Error moved by -1 exactly as corrected: no drift.
        window.record(2, 0);
        assert!((window.mean_drift() - 1.0).abs() < 1e-9);
        assert!((window.mean_correction() + 1.0 / 3.0).abs() < 1e-9);
        assert!((window.mean_abs_correction() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_opposing_corrections_keep_magnitude() {
        let mut window = StatisticsWindow::new(4);
        for correction in [1, -1, 1, -1] {
            window.record(0, correction);
        }
        assert!(window.mean_correction().abs() < 1e-9);
        assert!((window.mean_abs_correction() - 1.0).abs() < 1e-9);

        // Evicting a +1 in favour of a 0 lowers the magnitude too.
        window.record(0, 0);
        assert!((window.mean_correction() + 0.25).abs() < 1e-9);
        assert!((window.mean_abs_correction() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let mut window = StatisticsWindow::default();
        window.record(5, 1);
        window.reset();
        assert!(window.is_empty());
        assert!(window.mean_sync_error().abs() < f64::EPSILON);
    }
}
