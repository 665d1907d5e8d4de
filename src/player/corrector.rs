//! Sync error measurement and correction decisions
//!
//! The error is how far the frame being played sits from where the clock
//! mapping says it should be, measured in output frames. Small errors are
//! corrected by stuffing one frame per packet; errors beyond the resync
//! threshold that persist are fixed in one step by dropping frames or
//! inserting silence.

use std::time::Duration;

use super::clock::ClockMapping;
use super::seq::{timestamp_add, timestamp_delta};
use crate::audio::stuffer::{Stuffer, StuffingMode};
use crate::types::PlayerConfig;

/// Consecutive out-of-bounds frames that trigger a hard correction.
const OUT_OF_BOUNDS_LIMIT: u32 = 3;

/// Largest silence inserted by one hard correction, in thresholds.
const MAX_SILENCE_THRESHOLDS: i64 = 5;

/// Share of a packet's duration resampling may take on average.
const RESAMPLE_CPU_SHARE: u32 = 10;

/// What to do with the frame being played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// Play as is
    None,
    /// Add (`1`) or remove (`-1`) one frame
    Stuff(i32),
    /// Drop everything before this timestamp
    FlushTo(u32),
    /// Play this many output frames of silence first
    Silence(usize),
}

/// Corrector parameters, in output frames unless noted
#[derive(Debug, Clone, Copy)]
pub struct CorrectorSettings {
    /// Output frames per input frame
    pub ratio: i64,
    /// Sink frame rate
    pub output_rate: u32,
    /// Latency in input frames
    pub latency: i64,
    /// Backend latency offset in output frames
    pub backend_offset: i64,
    /// Soft-correction tolerance
    pub tolerance: f64,
    /// Hard-correction threshold; zero disables
    pub resync_threshold: i64,
    /// Minimum sink queue for resample stuffing
    pub interpolation_threshold: i64,
    /// Soft correction is suppressed this long after the first frame
    pub holdoff: Duration,
    /// Never correct
    pub no_sync: bool,
    /// Stuffing method
    pub stuffing: StuffingMode,
    /// Duration of one packet, for the resample CPU budget
    pub packet_duration: Duration,
}

impl CorrectorSettings {
    /// Derive the settings from a session configuration
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Thresholds are fractions of a second in frames"
    )]
    pub fn from_config(config: &PlayerConfig) -> Self {
        let output_rate = f64::from(config.output_rate);
        Self {
            ratio: i64::from(config.output_ratio()),
            output_rate: config.output_rate,
            latency: i64::from(config.latency_frames),
            backend_offset: (config.backend_latency_offset * output_rate).round() as i64,
            tolerance: config.tolerance * output_rate,
            resync_threshold: (config.resync_threshold * output_rate) as i64,
            interpolation_threshold: (config.interpolation_threshold * output_rate) as i64,
            holdoff: Duration::try_from_secs_f64(config.correction_holdoff)
                .unwrap_or(Duration::ZERO),
            no_sync: config.no_sync,
            stuffing: config.stuffing,
            packet_duration: Duration::from_secs_f64(
                f64::from(config.frames_per_packet) / f64::from(config.input_rate.max(1)),
            ),
        }
    }
}

/// Decides and applies timing corrections
#[derive(Debug)]
pub struct DriftCorrector {
    settings: CorrectorSettings,
    out_of_bounds: u32,
    stuffer: Stuffer,
    resample_failed: bool,
}

impl DriftCorrector {
    /// Create a corrector
    #[must_use]
    pub fn new(settings: CorrectorSettings) -> Self {
        Self::with_stuffer(settings, Stuffer::new())
    }

    /// Create a corrector with a given stuffer, e.g. a seeded one
    #[must_use]
    pub fn with_stuffer(settings: CorrectorSettings, stuffer: Stuffer) -> Self {
        Self {
            settings,
            out_of_bounds: 0,
            stuffer,
            resample_failed: false,
        }
    }

    /// Parameters in use
    #[must_use]
    pub fn settings(&self) -> &CorrectorSettings {
        &self.settings
    }

    /// Mean and longest resample time in microseconds
    #[must_use]
    pub fn resample_timing(&self) -> (f64, f64) {
        self.stuffer.resample_timing()
    }

    /// Sync error of the frame `timestamp` about to be queued behind
    /// `sink_delay` output frames, at local time `now`.
    ///
    /// Positive means the frame is late.
    #[must_use]
    pub fn sync_error(
        &self,
        mapping: &ClockMapping,
        now: u64,
        timestamp: u32,
        sink_delay: i64,
    ) -> i64 {
        let should_be_playing = mapping.local_time_to_frame(now);
        let behind = i64::from(timestamp_delta(timestamp, should_be_playing));
        behind * self.settings.ratio + sink_delay.max(0)
            - (self.settings.latency * self.settings.ratio + self.settings.backend_offset)
    }

    /// Choose the correction for a frame with `sync_error`.
    ///
    /// `first_play_time` is the local time the session's first frame was due;
    /// soft correction is held off for a while after it.
    pub fn decide(
        &mut self,
        sync_error: i64,
        timestamp: u32,
        now: u64,
        first_play_time: Option<u64>,
    ) -> Correction {
        let settings = self.settings;
        let threshold = settings.resync_threshold;

        if timestamp != 0 && !settings.no_sync && threshold > 0 && sync_error.abs() > threshold {
            self.out_of_bounds += 1;
        } else {
            self.out_of_bounds = 0;
        }

        if self.out_of_bounds > OUT_OF_BOUNDS_LIMIT {
            self.out_of_bounds = 0;
            if sync_error > threshold {
                let target = timestamp_add(timestamp, sync_error / settings.ratio);
                tracing::info!(
                    sync_error_ms = sync_error * 1000 / i64::from(settings.output_rate),
                    target_ts = target,
                    "Playing late, dropping frames to resync"
                );
                return Correction::FlushTo(target);
            }
            if sync_error < -threshold {
                let frames = (-sync_error).min(threshold * MAX_SILENCE_THRESHOLDS);
                tracing::info!(
                    sync_error_ms = sync_error * 1000 / i64::from(settings.output_rate),
                    frames,
                    "Playing early, inserting silence to resync"
                );
                return Correction::Silence(usize::try_from(frames).unwrap_or(0));
            }
            return Correction::None;
        }

        if settings.no_sync {
            return Correction::None;
        }
        if let Some(first) = first_play_time {
            let since_first = now.saturating_sub(first);
            if now >= first && u128::from(since_first) < settings.holdoff.as_nanos() {
                return Correction::None;
            }
        }

        #[allow(clippy::cast_precision_loss, reason = "Sync errors are small frame counts")]
        let error = sync_error as f64;
        let tolerance = settings.tolerance * (1.0 + self.stuffer.random_unit());
        if error > tolerance {
            Correction::Stuff(-1)
        } else if error < -tolerance {
            Correction::Stuff(1)
        } else {
            Correction::None
        }
    }

    /// Apply a stuff of `amount` to interleaved stereo `input`, writing the
    /// result to `out`. Returns the frames actually added.
    ///
    /// Resampling is used when the mode allows it, the sink queue is at least
    /// the interpolation threshold, and resampling has been cheap enough;
    /// otherwise one frame is interpolated.
    pub fn stuff(
        &mut self,
        input: &[i32],
        amount: i32,
        sink_delay: Option<i64>,
        out: &mut Vec<i32>,
    ) -> i32 {
        let budget = self.settings.packet_duration / RESAMPLE_CPU_SHARE;
        let queue_too_short = sink_delay.is_none_or(|d| d < self.settings.interpolation_threshold);
        let basic = self.resample_failed
            || queue_too_short
            || match self.settings.stuffing {
                StuffingMode::Basic => true,
                StuffingMode::Resample => false,
                StuffingMode::Auto => !self.stuffer.resample_affordable(budget),
            };
        if basic {
            return self.stuffer.stuff_basic(input, amount, out);
        }
        match self.stuffer.stuff_resample(input, amount, out) {
            Ok(added) => added,
            Err(e) => {
                tracing::warn!(error = %e, "Resample stuffing failed, using interpolation");
                self.resample_failed = true;
                self.stuffer.stuff_basic(input, amount, out)
            }
        }
    }

    /// Forget the out-of-bounds run, as after a flush.
    pub fn reset(&mut self) {
        self.out_of_bounds = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::clock::{ClockBridge, TimingReference};

    const SEC: u64 = 1_000_000_000;

    fn corrector() -> DriftCorrector {
        let config = PlayerConfig::builder().latency_frames(44100).build();
        DriftCorrector::with_stuffer(CorrectorSettings::from_config(&config), Stuffer::seeded(11))
    }

    fn mapping() -> ClockMapping {
        let mut bridge = ClockBridge::new(44100, Duration::from_secs(60), Duration::from_secs(5));
        bridge.set_reference(TimingReference {
            remote_timestamp: 0,
            remote_time: 0,
            local_time: 0,
        });
        bridge.mapping(0).unwrap()
    }

    #[test]
    fn test_sync_error_zero_when_on_time() {
        let corrector = corrector();
        // At 2 s the frame being heard is ts 88200 - latency = 44100. Queueing
        // ts 66150 behind 22050 frames of sink delay is exactly on time.
        let err = corrector.sync_error(&mapping(), 2 * SEC, 66150, 22050);
        assert_eq!(err, 0);
        // One millisecond more queued makes it 44 frames late.
        let err = corrector.sync_error(&mapping(), 2 * SEC, 66150, 22050 + 44);
        assert_eq!(err, 44);
    }

    #[test]
    fn test_sync_error_across_timestamp_wrap() {
        let corrector = corrector();
        let mut bridge = ClockBridge::new(44100, Duration::from_secs(60), Duration::from_secs(5));
        bridge.set_reference(TimingReference {
            remote_timestamp: u32::MAX - 100,
            remote_time: 0,
            local_time: 0,
        });
        let mapping = bridge.mapping(0).unwrap();
        let ts = (u32::MAX - 100).wrapping_add(44100 + 200);
        let now = (44100 + 200) * SEC / 44100 + SEC;
        assert!(corrector.sync_error(&mapping, now, ts, 0).abs() <= 1);
    }

    #[test]
    fn test_soft_correction_direction() {
        let mut corrector = corrector();
        assert_eq!(corrector.decide(200, 1000, 10 * SEC, Some(0)), Correction::Stuff(-1));
        assert_eq!(corrector.decide(-200, 1000, 10 * SEC, Some(0)), Correction::Stuff(1));
        // Tolerance is 88 frames, randomised up to 176.
        assert_eq!(corrector.decide(80, 1000, 10 * SEC, Some(0)), Correction::None);
    }

    #[test]
    fn test_holdoff_after_first_frame() {
        let mut corrector = corrector();
        assert_eq!(corrector.decide(500, 1000, 3 * SEC, Some(0)), Correction::None);
        assert_eq!(corrector.decide(500, 1000, 6 * SEC, Some(0)), Correction::Stuff(-1));
    }

    #[test]
    fn test_hard_correction_after_persistent_error() {
        let mut corrector = corrector();
        let late = 44100 / 10;
        for _ in 0..3 {
            assert_eq!(corrector.decide(late, 1000, 10 * SEC, Some(0)), Correction::Stuff(-1));
        }
        assert_eq!(
            corrector.decide(late, 1000, 10 * SEC, Some(0)),
            Correction::FlushTo(1000 + 4410)
        );

        for _ in 0..3 {
            corrector.decide(-late, 1000, 10 * SEC, Some(0));
        }
        assert_eq!(
            corrector.decide(-late, 1000, 10 * SEC, Some(0)),
            Correction::Silence(4410)
        );
    }

    #[test]
    fn test_hard_silence_is_capped() {
        let mut corrector = corrector();
        let early = -44100 * 10;
        for _ in 0..3 {
            corrector.decide(early, 1000, 10 * SEC, Some(0));
        }
        // Five thresholds of 2205 frames.
        assert_eq!(
            corrector.decide(early, 1000, 10 * SEC, Some(0)),
            Correction::Silence(11025)
        );
    }

    #[test]
    fn test_run_broken_by_good_frame() {
        let mut corrector = corrector();
        for _ in 0..3 {
            corrector.decide(5000, 1000, 10 * SEC, Some(0));
        }
        corrector.decide(0, 1000, 10 * SEC, Some(0));
        for _ in 0..3 {
            assert!(!matches!(
                corrector.decide(5000, 1000, 10 * SEC, Some(0)),
                Correction::FlushTo(_)
            ));
        }
    }

    #[test]
    fn test_no_sync_never_corrects() {
        let mut config = PlayerConfig::builder().no_sync(true).build();
        config.latency_frames = 44100;
        let mut corrector = DriftCorrector::with_stuffer(
            CorrectorSettings::from_config(&config),
            Stuffer::seeded(1),
        );
        for _ in 0..10 {
            assert_eq!(corrector.decide(50_000, 1000, 10 * SEC, None), Correction::None);
        }
    }

    #[test]
    fn test_short_queue_uses_basic_stuffing() {
        let mut corrector = corrector();
        let input = vec![0; 704];
        let mut out = Vec::new();
        assert_eq!(corrector.stuff(&input, 1, Some(10), &mut out), 1);
        assert_eq!(out.len(), 706);
        assert_eq!(corrector.resample_timing().0, 0.0);
    }
}
