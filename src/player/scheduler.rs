//! Playback scheduler
//!
//! Decides, one ring position at a time, whether to release a frame, play
//! pre-roll silence, or wait. [`PlaybackScheduler::poll`] never blocks: the
//! caller owns the condition variable and the sleeping.

use std::time::Duration;

use super::clock::ClockMapping;
use super::ring::{Fetched, FrameRing, Head};
use super::seq::{modulo_32_offset, timestamp_add};
use super::stats::PlayerCounters;
use crate::audio::output::{AudioSink, SinkCapabilities, SinkError};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Frames per packet the wait bound is derived from.
const REFERENCE_PACKET_FRAMES: u64 = 352;

/// Pending flush shared with producers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushRequest {
    /// Flush the sink and resync the ring on the next poll
    pub requested: bool,
    /// Drop frames before this timestamp; 0 means no target
    pub target: u32,
}

impl FlushRequest {
    /// Whether a frame at `timestamp` falls in the window discarded by the target.
    #[must_use]
    pub fn drops(&self, timestamp: u32, input_rate: u32) -> bool {
        self.target != 0
            && timestamp != self.target
            && modulo_32_offset(timestamp, self.target) < input_rate.saturating_mul(10)
    }
}

/// Scheduler parameters, in frames unless noted
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Source frame rate
    pub input_rate: u32,
    /// Sink frame rate
    pub output_rate: u32,
    /// Frames per packet
    pub frames_per_packet: u32,
    /// End-to-end latency in input frames
    pub latency: u32,
    /// Backend latency offset in input frames
    pub backend_offset: i64,
    /// Desired sink queue length in input frames
    pub desired_backend_buffer: i64,
    /// Upper bound on pre-roll lead-in, if configured
    pub silent_lead_in: Option<Duration>,
    /// Frames of the late-start flush lead
    pub late_start_lead: u32,
}

impl SchedulerSettings {
    fn ratio(&self) -> i64 {
        i64::from((self.output_rate / self.input_rate.max(1)).max(1))
    }
}

/// What the playback thread should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Render the fetched position; a ready payload is in the caller's buffer
    Release(Fetched),
    /// Play this many output frames of pre-roll silence
    Silence(usize),
    /// Nothing is due; wait at most this long for a signal
    Wait(Duration),
    /// The sink reported a stalled device while pre-rolling
    Stalled,
}

/// Buffering and release state machine
#[derive(Debug)]
pub struct PlaybackScheduler {
    settings: SchedulerSettings,
    wait_bound: Duration,
    first_packet_timestamp: Option<u32>,
    first_packet_time_to_play: Option<u64>,
    prefill_sent: bool,
    expected_timestamp: Option<u32>,
    epoch: u64,
}

impl PlaybackScheduler {
    /// Create a scheduler
    #[must_use]
    pub fn new(settings: SchedulerSettings) -> Self {
        let wait_bound = Duration::from_nanos(
            2 * REFERENCE_PACKET_FRAMES * NANOS_PER_SEC
                / (3 * u64::from(settings.input_rate.max(1))),
        );
        Self {
            settings,
            wait_bound,
            first_packet_timestamp: None,
            first_packet_time_to_play: None,
            prefill_sent: false,
            expected_timestamp: None,
            epoch: 0,
        }
    }

    /// Longest the caller may sleep between polls
    #[must_use]
    pub fn wait_bound(&self) -> Duration {
        self.wait_bound
    }

    /// Local time at which the first frame of this play session is due
    #[must_use]
    pub fn first_packet_time_to_play(&self) -> Option<u64> {
        self.first_packet_time_to_play
    }

    /// Incremented every time the play session is reset by a flush
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The parameters this scheduler runs with
    #[must_use]
    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    fn reset_session(&mut self) {
        self.first_packet_timestamp = None;
        self.first_packet_time_to_play = None;
        self.prefill_sent = false;
        self.expected_timestamp = None;
        self.epoch += 1;
    }

    fn flush_and_resync(&mut self, ring: &mut FrameRing, sink: &mut dyn AudioSink, caps: SinkCapabilities) {
        if caps.flush {
            sink.flush();
        }
        ring.resync();
        self.reset_session();
    }

    /// Timestamp `ts` shifted by the latency, the backend offset and `less`.
    #[allow(clippy::cast_possible_wrap, reason = "Latency is far below 2^31 frames")]
    fn due_timestamp(&self, ts: u32, less: i64) -> u32 {
        timestamp_add(
            ts,
            i64::from(self.settings.latency) + self.settings.backend_offset - less,
        )
    }

    fn release_time(&self, ts: u32, mapping: &ClockMapping) -> u64 {
        mapping.frame_to_local_time(self.due_timestamp(ts, self.settings.desired_backend_buffer))
    }

    fn wait_until(&self, due: u64, now: u64) -> Step {
        Step::Wait(self.wait_bound.min(Duration::from_nanos(due.saturating_sub(now))))
    }

    /// Advance the state machine by one decision.
    ///
    /// `sink` is only flushed or asked for its delay here; audio is played by
    /// the caller after the lock is released.
    #[allow(clippy::too_many_arguments)]
    pub fn poll(
        &mut self,
        ring: &mut FrameRing,
        flush: &mut FlushRequest,
        counters: &mut PlayerCounters,
        now: u64,
        mapping: Option<&ClockMapping>,
        sink: &mut dyn AudioSink,
        caps: SinkCapabilities,
        out: &mut Vec<i16>,
    ) -> Step {
        loop {
            if flush.requested {
                tracing::debug!(target_ts = flush.target, "Flushing sink and ring");
                self.flush_and_resync(ring, sink, caps);
                flush.requested = false;
            }

            match ring.head() {
                Head::Empty => return Step::Wait(self.wait_bound),
                Head::Ready { timestamp, .. } => {
                    if flush.drops(timestamp, self.settings.input_rate) {
                        tracing::trace!(timestamp, target_ts = flush.target, "Dropping flushed frame");
                        ring.skip_head();
                        counters.flushed_frames += 1;
                        continue;
                    }
                    let past_target = modulo_32_offset(flush.target, timestamp);
                    if flush.target != 0
                        && past_target > self.settings.input_rate / 5
                        && past_target < self.settings.input_rate.saturating_mul(10)
                    {
                        tracing::debug!(target_ts = flush.target, "Flush target passed, cleared");
                        flush.target = 0;
                    }

                    if ring.is_buffering() {
                        match self.preroll(ring, flush, timestamp, now, mapping, sink, caps) {
                            Some(step) => return step,
                            None if ring.is_buffering() => continue,
                            None => {}
                        }
                    }

                    let Some(mapping) = mapping else {
                        return Step::Wait(self.wait_bound);
                    };
                    let due = self.release_time(timestamp, mapping);
                    if now < due {
                        return self.wait_until(due, now);
                    }
                    let fetched = ring.take_head(out);
                    if let Fetched::Frame {
                        timestamp, frames, ..
                    } = fetched
                    {
                        let frames = u32::try_from(frames).unwrap_or(u32::MAX);
                        self.expected_timestamp = Some(timestamp.wrapping_add(frames));
                    }
                    return Step::Release(fetched);
                }
                Head::Missing { seq } => {
                    if ring.is_buffering() {
                        ring.skip_head();
                        continue;
                    }
                    if let (Some(expected), Some(mapping)) = (self.expected_timestamp, mapping) {
                        let due = self.release_time(expected, mapping);
                        if now < due {
                            return self.wait_until(due, now);
                        }
                    }
                    tracing::trace!(seq, "Missing frame released as silence");
                    counters.missing_frames += 1;
                    self.expected_timestamp = self
                        .expected_timestamp
                        .map(|ts| ts.wrapping_add(self.settings.frames_per_packet));
                    return Step::Release(ring.take_head(out));
                }
            }
        }
    }

    /// Pre-roll handling while buffering.
    ///
    /// Returns `Some(step)` to hand back to the caller, or `None` to re-run the
    /// poll loop (buffering just ended or a flush was issued).
    #[allow(
        clippy::too_many_arguments,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        reason = "Frame gaps are bounded by the lead-in, far below the integer limits"
    )]
    fn preroll(
        &mut self,
        ring: &mut FrameRing,
        flush: &mut FlushRequest,
        timestamp: u32,
        now: u64,
        mapping: Option<&ClockMapping>,
        sink: &mut dyn AudioSink,
        caps: SinkCapabilities,
    ) -> Option<Step> {
        let Some(mapping) = mapping else {
            return Some(Step::Wait(self.wait_bound));
        };

        let first_ts = match self.first_packet_timestamp {
            Some(ts) => ts,
            None => {
                self.first_packet_timestamp = Some(timestamp);
                self.prefill_sent = false;
                let start = mapping.frame_to_local_time(self.due_timestamp(timestamp, 0));
                self.first_packet_time_to_play = Some(start);
                if now > start {
                    tracing::info!(
                        late_us = (now - start) / 1000,
                        "First frame is already late, flushing ahead"
                    );
                    flush.requested = true;
                    flush.target = timestamp.wrapping_add(self.settings.late_start_lead);
                    return None;
                }
                timestamp
            }
        };

        let start = mapping.frame_to_local_time(self.due_timestamp(first_ts, 0));
        self.first_packet_time_to_play = Some(start);

        let ratio = self.settings.ratio();
        let output_rate = u64::from(self.settings.output_rate);
        let max_dac_delay = self.settings.silent_lead_in.map_or(
            i64::from(self.settings.latency) * ratio,
            |lead_in| (lead_in.as_secs_f64() * output_rate as f64) as i64,
        ) / 4;

        if now > start {
            tracing::debug!(past_us = (now - start) / 1000, "Past the start time, playing");
            self.prefill_sent = true;
            ring.set_buffering(false);
            return None;
        }

        let lead_time = start - now;
        if let Some(lead_in) = self.settings.silent_lead_in {
            if u128::from(lead_time) > lead_in.as_nanos() {
                return Some(Step::Wait(self.wait_bound));
            }
        }

        let gross_gap = (u128::from(lead_time) * u128::from(output_rate)
            / u128::from(NANOS_PER_SEC)) as i64;

        if !caps.delay {
            tracing::debug!(frames = gross_gap, "Sink has no delay query, playing full lead-in");
            self.prefill_sent = true;
            ring.set_buffering(false);
            return Some(if gross_gap > 0 {
                Step::Silence(gross_gap as usize)
            } else {
                Step::Wait(Duration::ZERO)
            });
        }

        let dac_delay = if self.prefill_sent {
            match sink.delay() {
                Ok(delay) => delay.max(0),
                Err(SinkError::Stalled) => return Some(Step::Stalled),
                Err(e) => {
                    tracing::debug!(error = %e, "Delay query failed during pre-roll");
                    return Some(Step::Wait(self.wait_bound));
                }
            }
        } else {
            0
        };
        self.prefill_sent = true;

        let exact_gap = gross_gap - dac_delay;
        if exact_gap < 0 {
            tracing::debug!(
                overrun = -exact_gap,
                dac_delay,
                "Ran past the start time while pre-rolling, resyncing"
            );
            self.flush_and_resync(ring, sink, caps);
            return Some(Step::Wait(self.wait_bound));
        }

        let mut fill = (max_dac_delay - dac_delay).clamp(0, max_dac_delay.max(0));
        let two_packets = 2 * i64::from(self.settings.frames_per_packet) * ratio;
        if exact_gap <= fill || exact_gap <= two_packets {
            fill = exact_gap;
            tracing::info!(silence = fill, dac_delay, "Pre-roll complete, starting playback");
            ring.set_buffering(false);
        }

        Some(if fill > 0 {
            Step::Silence(fill as usize)
        } else if ring.is_buffering() {
            Step::Wait(self.wait_bound)
        } else {
            Step::Wait(Duration::ZERO)
        })
    }
}
