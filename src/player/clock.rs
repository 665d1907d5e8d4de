//! Mapping between source RTP time and local monotonic time
//!
//! The bridge keeps the most recent timing reference together with a drift
//! gradient (local nanoseconds per remote nanosecond) measured from an anchor
//! reference to the latest one. The anchor moves forward once the span grows
//! past a few sample intervals, so the gradient follows drift that changes
//! during a session. Consumers take a [`ClockMapping`] snapshot and
//! do all conversions on that copy, so the lock is held only for the copy.

use std::time::Duration;

use super::seq::{timestamp_add, timestamp_delta};

/// Drift beyond this fraction is treated as a measurement error (1000 ppm).
const MAX_GRADIENT_DEVIATION: f64 = 0.001;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Sample intervals an anchor may span before it is moved forward.
const REANCHOR_INTERVALS: u32 = 4;

/// One timing reference point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingReference {
    /// RTP timestamp the reference describes
    pub remote_timestamp: u32,
    /// Source clock reading for that timestamp, in nanoseconds
    pub remote_time: u64,
    /// Local monotonic time at which that timestamp is due, in nanoseconds
    pub local_time: u64,
}

/// Copyable snapshot of the bridge used for conversions
#[derive(Debug, Clone, Copy)]
pub struct ClockMapping {
    reference: TimingReference,
    gradient: f64,
    rate: u32,
    stale: bool,
}

impl ClockMapping {
    /// Local time at which the frame with timestamp `ts` is due.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "Clamped to the u64 range before conversion"
    )]
    pub fn frame_to_local_time(&self, ts: u32) -> u64 {
        let frames = f64::from(timestamp_delta(self.reference.remote_timestamp, ts));
        let offset_ns = frames * NANOS_PER_SEC * self.gradient / f64::from(self.rate);
        let local = i128::from(self.reference.local_time) + offset_ns.round() as i128;
        local.clamp(0, i128::from(u64::MAX)) as u64
    }

    /// Timestamp of the frame due at local time `local`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        reason = "Frame offsets are far inside f64 precision"
    )]
    pub fn local_time_to_frame(&self, local: u64) -> u32 {
        let delta_ns = (i128::from(local) - i128::from(self.reference.local_time)) as f64;
        let frames = delta_ns * f64::from(self.rate) / (NANOS_PER_SEC * self.gradient);
        timestamp_add(self.reference.remote_timestamp, frames.round() as i64)
    }

    /// Whether the reference is older than the configured maximum age
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Local nanoseconds per source nanosecond
    #[must_use]
    pub fn gradient(&self) -> f64 {
        self.gradient
    }

    /// The reference this mapping extrapolates from
    #[must_use]
    pub fn reference(&self) -> TimingReference {
        self.reference
    }
}

/// Source-to-local clock bridge with drift estimation
#[derive(Debug)]
pub struct ClockBridge {
    rate: u32,
    current: Option<TimingReference>,
    anchor: Option<TimingReference>,
    gradient: f64,
    max_reference_age: Duration,
    drift_sample_interval: Duration,
}

impl ClockBridge {
    /// Create a bridge for a stream at `rate` frames per second
    #[must_use]
    pub fn new(rate: u32, max_reference_age: Duration, drift_sample_interval: Duration) -> Self {
        Self {
            rate,
            current: None,
            anchor: None,
            gradient: 1.0,
            max_reference_age,
            drift_sample_interval,
        }
    }

    /// Record a new timing reference.
    #[allow(
        clippy::cast_precision_loss,
        reason = "Nanosecond spans of hours are exact enough in f64"
    )]
    pub fn set_reference(&mut self, reference: TimingReference) {
        self.current = Some(reference);

        let Some(anchor) = self.anchor else {
            self.anchor = Some(reference);
            return;
        };

        if reference.remote_time <= anchor.remote_time || reference.local_time <= anchor.local_time
        {
            tracing::debug!("Timing reference moved backwards, drift anchor reset");
            self.anchor = Some(reference);
            return;
        }

        let remote_span = reference.remote_time - anchor.remote_time;
        if u128::from(remote_span) < self.drift_sample_interval.as_nanos() {
            return;
        }

        let local_span = reference.local_time - anchor.local_time;
        let gradient = local_span as f64 / remote_span as f64;
        if (gradient - 1.0).abs() < MAX_GRADIENT_DEVIATION {
            if (gradient - self.gradient).abs() > 50e-6 {
                tracing::debug!(
                    drift_ppm = (gradient - 1.0) * 1e6,
                    "Clock drift estimate updated"
                );
            }
            self.gradient = gradient;
            let reanchor_span = self.drift_sample_interval * REANCHOR_INTERVALS;
            if u128::from(remote_span) >= reanchor_span.as_nanos() {
                tracing::trace!("Drift anchor moved forward");
                self.anchor = Some(reference);
            }
        } else {
            tracing::debug!(gradient, "Implausible drift estimate rejected, anchor reset");
            self.anchor = Some(reference);
        }
    }

    /// Snapshot for conversions, or `None` if no reference has been set.
    #[must_use]
    pub fn mapping(&self, now: u64) -> Option<ClockMapping> {
        self.current.map(|reference| {
            let age = now.saturating_sub(reference.local_time);
            ClockMapping {
                reference,
                gradient: self.gradient,
                rate: self.rate,
                stale: u128::from(age) > self.max_reference_age.as_nanos(),
            }
        })
    }

    /// Whether any reference has been received
    #[must_use]
    pub fn has_reference(&self) -> bool {
        self.current.is_some()
    }

    /// Current drift gradient
    #[must_use]
    pub fn gradient(&self) -> f64 {
        self.gradient
    }

    /// Current drift in parts per million
    #[must_use]
    pub fn drift_ppm(&self) -> f64 {
        (self.gradient - 1.0) * 1e6
    }

    /// Forget all references and the drift estimate.
    pub fn clear(&mut self) {
        self.current = None;
        self.anchor = None;
        self.gradient = 1.0;
    }
}
