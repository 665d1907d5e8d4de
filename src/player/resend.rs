//! Retransmission look-back
//!
//! After each stored packet the ring is scanned at a few escalating distances
//! behind the write cursor. A slot still empty at distance `interval * j^e`
//! is requested once for pass `j`, so a lost packet is asked for at most once
//! per pass before the scheduler gives up and plays silence.

use super::ring::FrameRing;
use super::seq::{seq_add, seq_diff};
use crate::types::PlayerConfig;

/// Receives retransmission requests
///
/// Called without the buffer lock held.
pub trait ResendRequester: Send + Sync {
    /// Ask the source to send `count` packets again, starting at `seq`.
    fn request_resend(&self, seq: u16, count: u16);
}

impl<F> ResendRequester for F
where
    F: Fn(u16, u16) + Send + Sync,
{
    fn request_resend(&self, seq: u16, count: u16) {
        self(seq, count);
    }
}

/// Look-back distances and pass count
#[derive(Debug, Clone, Copy)]
pub struct ResendPolicy {
    attempts: u32,
    step_exponent: f64,
    interval: i32,
    enabled: bool,
}

impl ResendPolicy {
    /// Derive the policy from a session configuration.
    ///
    /// The base interval is the larger of the configured minimum and the
    /// latency spread over all passes.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Intervals are a few hundred packets at most"
    )]
    pub fn new(config: &PlayerConfig) -> Self {
        let fpp = config.frames_per_packet.max(1);
        let attempts = config.resend.attempts.max(1);
        let minimum =
            (config.resend.min_interval * f64::from(config.input_rate) / f64::from(fpp)) as i32;
        let from_latency =
            i32::try_from(config.latency_frames / (attempts * fpp)).unwrap_or(i32::MAX);
        let interval = minimum.max(from_latency).max(1);
        tracing::debug!(
            interval,
            latency = config.latency_frames,
            "Resend look-back interval"
        );
        Self {
            attempts: config.resend.attempts,
            step_exponent: config.resend.step_exponent,
            interval,
            enabled: !config.resend.disabled,
        }
    }

    /// Base look-back distance in packets
    #[must_use]
    pub fn interval(&self) -> i32 {
        self.interval
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "Back steps are bounded by the ring span checked below"
    )]
    fn back_step(&self, pass: u32) -> i32 {
        (f64::from(self.interval) * f64::from(pass).powf(self.step_exponent)) as i32
    }

    /// Flag newly overdue empty slots and collect their sequence numbers.
    ///
    /// Does nothing while the ring is buffering or when requests are disabled.
    pub fn scan(&self, ring: &mut FrameRing, out: &mut Vec<u16>) {
        out.clear();
        if !self.enabled || !ring.is_synced() || ring.is_buffering() {
            return;
        }
        let span = seq_diff(ring.read_cursor(), ring.write_cursor(), ring.read_cursor());
        for pass in 1..=self.attempts {
            let back_step = self.back_step(pass);
            for k in -1..=1 {
                let distance = back_step + k;
                if distance >= span {
                    continue;
                }
                let seq = seq_add(ring.write_cursor(), -distance);
                let slot = ring.slot_mut(seq);
                if !slot.is_ready() && slot.resend_level() < pass {
                    slot.set_resend_level(pass);
                    out.push(seq);
                }
            }
        }
    }
}
