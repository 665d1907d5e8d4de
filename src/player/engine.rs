//! Playback engine
//!
//! Owns the sink and everything the playback thread needs between
//! iterations. Each iteration takes the buffer lock once to decide what to
//! do, then renders and plays with the lock released.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::clock::{ClockBridge, ClockMapping};
use super::corrector::{Correction, CorrectorSettings, DriftCorrector};
use super::ring::{Fetched, FrameRing};
use super::scheduler::{FlushRequest, PlaybackScheduler, SchedulerSettings, Step};
use super::stats::{PlaybackStats, PlayerCounters, StatisticsWindow};
use crate::activity::{HookRunner, run_configured};
use crate::audio::convert::{UNITY_VOLUME, generate_zero_frames, process_samples, widen_frames};
use crate::audio::dither::Dither;
use crate::audio::format::PlaybackMode;
use crate::audio::output::{AudioSink, SinkCapabilities, SinkError};
use crate::audio::volume::{VolumeDecision, resolve_volume};
use crate::error::Result;
use crate::time::LocalClock;
use crate::types::PlayerConfig;

/// Interleaved channels throughout the engine.
pub(crate) const CHANNELS: usize = 2;

/// Argument passed to the unfixable-error hook for a stalled device.
const STALLED_ARGUMENT: &str = "output_device_stalled";

/// Everything protected by the buffer lock
#[derive(Debug)]
pub(crate) struct BufferState {
    pub(crate) ring: FrameRing,
    pub(crate) flush: FlushRequest,
    pub(crate) scheduler: PlaybackScheduler,
    pub(crate) counters: PlayerCounters,
    pub(crate) pending_volume: Option<f64>,
    pub(crate) published: PlaybackStats,
}

/// State shared between producers and the playback thread
#[derive(Debug)]
pub(crate) struct SharedState {
    pub(crate) buffer: Mutex<BufferState>,
    pub(crate) flow: Condvar,
    pub(crate) clock: Mutex<ClockBridge>,
}

impl SharedState {
    pub(crate) fn new(config: &PlayerConfig) -> Self {
        let scheduler = PlaybackScheduler::new(SchedulerSettings {
            input_rate: config.input_rate,
            output_rate: config.output_rate,
            frames_per_packet: config.frames_per_packet,
            latency: config.latency_frames,
            backend_offset: config.backend_offset_frames(),
            desired_backend_buffer: config.desired_buffer_frames(),
            silent_lead_in: config
                .silent_lead_in_time
                .and_then(|s| Duration::try_from_secs_f64(s).ok()),
            late_start_lead: config.input_rate / 2,
        });
        Self {
            buffer: Mutex::new(BufferState {
                ring: FrameRing::new(config.buffer_frames, config.samples_per_slot()),
                flush: FlushRequest::default(),
                scheduler,
                counters: PlayerCounters::default(),
                pending_volume: None,
                published: PlaybackStats {
                    buffering: true,
                    ..PlaybackStats::default()
                },
            }),
            flow: Condvar::new(),
            clock: Mutex::new(ClockBridge::new(
                config.input_rate,
                config.reference_age_limit(),
                config.drift_interval(),
            )),
        }
    }

    pub(crate) fn lock_buffer(&self) -> MutexGuard<'_, BufferState> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_clock(&self) -> MutexGuard<'_, ClockBridge> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Engine-side counters merged into the shared ones at the next lock
#[derive(Debug, Default)]
struct PendingCounters {
    hard_resyncs: u64,
    silence_insertions: u64,
    stuffed_frames: i64,
}

/// Outcome of one locked scheduling pass
#[derive(Debug, Clone, Copy)]
struct Decision {
    step: Step,
    volume: Option<f64>,
    first_play_time: Option<u64>,
}

/// Window extremes reset every statistics window
#[derive(Debug, Default)]
struct WindowExtremes {
    min_occupancy: Option<usize>,
    max_occupancy: usize,
    min_sink_queue: Option<i64>,
}

/// The playback thread's state
pub struct PlaybackEngine {
    config: PlayerConfig,
    shared: Arc<SharedState>,
    clock: Arc<dyn LocalClock>,
    sink: Box<dyn AudioSink>,
    caps: SinkCapabilities,
    hooks: Arc<dyn HookRunner>,
    corrector: DriftCorrector,
    window: StatisticsWindow,
    dither: Dither,
    fix_volume: i32,
    software_mute: bool,
    stall_reported: bool,
    epoch: u64,
    pending: PendingCounters,
    extremes: WindowExtremes,
    packets_played: u64,
    last_sync_error: i64,
    pcm: Vec<i16>,
    wide: Vec<i32>,
    stuffed: Vec<i32>,
    bytes: Vec<u8>,
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("caps", &self.caps)
            .field("packets_played", &self.packets_played)
            .field("fix_volume", &self.fix_volume)
            .finish_non_exhaustive()
    }
}

impl PlaybackEngine {
    pub(crate) fn new(
        config: PlayerConfig,
        shared: Arc<SharedState>,
        clock: Arc<dyn LocalClock>,
        sink: Box<dyn AudioSink>,
        hooks: Arc<dyn HookRunner>,
    ) -> Self {
        let caps = sink.capabilities();
        let corrector = DriftCorrector::new(CorrectorSettings::from_config(&config));
        let samples = config.samples_per_slot() * config.output_ratio() as usize;
        Self {
            config,
            shared,
            clock,
            sink,
            caps,
            hooks,
            corrector,
            window: StatisticsWindow::default(),
            dither: Dither::new(),
            fix_volume: UNITY_VOLUME,
            software_mute: false,
            stall_reported: false,
            epoch: 0,
            pending: PendingCounters::default(),
            extremes: WindowExtremes::default(),
            packets_played: 0,
            last_sync_error: 0,
            pcm: Vec::with_capacity(samples),
            wide: Vec::with_capacity(samples),
            stuffed: Vec::with_capacity(samples + CHANNELS),
            bytes: Vec::new(),
        }
    }

    /// Open the sink.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Sink` if the sink rejects the rate or format.
    pub fn start(&mut self) -> Result<()> {
        self.sink
            .start(self.config.output_rate, self.config.output_format)?;
        tracing::info!(
            rate = self.config.output_rate,
            format = ?self.config.output_format,
            delay = self.caps.delay,
            "Sink started"
        );
        Ok(())
    }

    /// Release the sink.
    pub fn shutdown(&mut self) {
        self.sink.stop();
        tracing::info!(packets_played = self.packets_played, "Sink stopped");
    }

    /// Decide the next step under the lock, leaving `Wait` to the caller.
    fn schedule(&mut self, guard: &mut BufferState, now: u64, mapping: Option<&ClockMapping>) -> Step {
        guard.counters.hard_resyncs += self.pending.hard_resyncs;
        guard.counters.silence_insertions += self.pending.silence_insertions;
        guard.counters.stuffed_frames += self.pending.stuffed_frames;
        self.pending = PendingCounters::default();

        let BufferState {
            ring,
            flush,
            scheduler,
            counters,
            ..
        } = guard;
        let step = scheduler.poll(
            ring,
            flush,
            counters,
            now,
            mapping,
            self.sink.as_mut(),
            self.caps,
            &mut self.pcm,
        );

        if scheduler.epoch() != self.epoch {
            self.epoch = scheduler.epoch();
            self.corrector.reset();
            self.window.reset();
            self.stuffed.clear();
        }

        if matches!(step, Step::Release(_)) {
            let occupancy = ring.occupancy();
            self.extremes.min_occupancy = Some(
                self.extremes
                    .min_occupancy
                    .map_or(occupancy, |m| m.min(occupancy)),
            );
            self.extremes.max_occupancy = self.extremes.max_occupancy.max(occupancy);
        }
        step
    }

    fn publish(&self, guard: &mut BufferState, clock_drift_ppm: f64) {
        let rate = f64::from(self.config.output_rate);
        guard.published = PlaybackStats {
            counters: guard.counters,
            sync_error_frames: self.last_sync_error,
            mean_sync_error_ms: self.window.mean_sync_error() * 1000.0 / rate,
            correction_ppm: self.window.mean_correction() * 1e6 / self.frames_per_release(),
            abs_correction_ppm: self.window.mean_abs_correction() * 1e6
                / self.frames_per_release(),
            drift_ppm: self.window.mean_drift() * 1e6 / self.frames_per_release(),
            clock_drift_ppm,
            packets_played: self.packets_played,
            occupancy: guard.ring.occupancy(),
            min_occupancy: self.extremes.min_occupancy.unwrap_or(0),
            max_occupancy: self.extremes.max_occupancy,
            min_sink_queue: self.extremes.min_sink_queue,
            buffering: guard.ring.is_buffering(),
        };
    }

    fn frames_per_release(&self) -> f64 {
        f64::from(self.config.frames_per_packet) * f64::from(self.config.output_ratio())
    }

    /// One iteration without blocking; returns the step taken.
    ///
    /// Waits are not slept; the returned `Step::Wait` says how long the caller
    /// may sleep.
    pub fn tick(&mut self) -> Step {
        let now = self.clock.now();
        let (mapping, drift) = self.clock_snapshot(now);
        let shared = Arc::clone(&self.shared);
        let mut guard = shared.lock_buffer();
        let decision = self.decide(&mut guard, now, mapping.as_ref(), drift);
        drop(guard);
        self.carry_out(decision, now, mapping.as_ref());
        decision.step
    }

    /// One iteration, sleeping on the condition variable when nothing is due.
    pub fn run_once(&mut self) {
        let now = self.clock.now();
        let (mapping, drift) = self.clock_snapshot(now);
        let shared = Arc::clone(&self.shared);
        let mut guard = shared.lock_buffer();
        let decision = self.decide(&mut guard, now, mapping.as_ref(), drift);

        if let (Step::Wait(timeout), None) = (decision.step, decision.volume) {
            if !timeout.is_zero() {
                drop(
                    shared
                        .flow
                        .wait_timeout(guard, timeout)
                        .unwrap_or_else(PoisonError::into_inner),
                );
            }
            return;
        }
        drop(guard);
        self.carry_out(decision, now, mapping.as_ref());

        if decision.step == Step::Stalled {
            let guard = shared.lock_buffer();
            let bound = guard.scheduler.wait_bound();
            drop(
                shared
                    .flow
                    .wait_timeout(guard, bound)
                    .unwrap_or_else(PoisonError::into_inner),
            );
        }
    }

    fn clock_snapshot(&self, now: u64) -> (Option<ClockMapping>, f64) {
        let bridge = self.shared.lock_clock();
        (bridge.mapping(now), bridge.drift_ppm())
    }

    fn decide(
        &mut self,
        guard: &mut BufferState,
        now: u64,
        mapping: Option<&ClockMapping>,
        drift: f64,
    ) -> Decision {
        let step = self.schedule(guard, now, mapping);
        self.publish(guard, drift);
        Decision {
            step,
            volume: guard.pending_volume.take(),
            first_play_time: guard.scheduler.first_packet_time_to_play(),
        }
    }

    fn carry_out(&mut self, decision: Decision, now: u64, mapping: Option<&ClockMapping>) {
        if let Some(volume) = decision.volume {
            self.apply_volume(volume);
        }
        self.perform(decision.step, now, mapping, decision.first_play_time);
    }

    fn perform(
        &mut self,
        step: Step,
        now: u64,
        mapping: Option<&ClockMapping>,
        first_play_time: Option<u64>,
    ) {
        match step {
            Step::Release(Fetched::Frame { timestamp, .. }) => {
                self.play_frame(timestamp, now, mapping, first_play_time);
            }
            Step::Release(Fetched::Missing { seq }) => {
                let frames = self.config.frames_per_packet as usize
                    * self.config.output_ratio() as usize;
                tracing::trace!(seq, frames, "Playing silence for missing frame");
                self.pending.silence_insertions += 1;
                self.play_silence(frames);
            }
            Step::Silence(frames) => self.play_silence(frames),
            Step::Stalled => self.report_stall(),
            Step::Wait(_) => {}
        }
    }

    fn sink_delay(&mut self) -> Option<i64> {
        if !self.caps.delay {
            return None;
        }
        match self.sink.delay() {
            Ok(delay) => {
                self.extremes.min_sink_queue = Some(
                    self.extremes
                        .min_sink_queue
                        .map_or(delay, |m| m.min(delay)),
                );
                Some(delay)
            }
            Err(SinkError::Stalled) => {
                self.report_stall();
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "Sink delay query failed");
                None
            }
        }
    }

    fn play_frame(
        &mut self,
        timestamp: u32,
        now: u64,
        mapping: Option<&ClockMapping>,
        first_play_time: Option<u64>,
    ) {
        widen_frames(
            &self.pcm,
            self.config.playback_mode,
            self.config.output_ratio() as usize,
            &mut self.wide,
        );
        let delay = self.sink_delay();

        let measured = match (mapping, delay) {
            (Some(mapping), Some(delay)) if !mapping.is_stale() => {
                Some(self.corrector.sync_error(mapping, now, timestamp, delay))
            }
            _ => None,
        };

        let mut added = 0;
        let mut use_stuffed = false;
        if let Some(sync_error) = measured {
            self.last_sync_error = sync_error;
            match self
                .corrector
                .decide(sync_error, timestamp, now, first_play_time)
            {
                Correction::None => {}
                Correction::Stuff(amount) => {
                    added = self
                        .corrector
                        .stuff(&self.wide, amount, delay, &mut self.stuffed);
                    use_stuffed = true;
                    self.pending.stuffed_frames += i64::from(added);
                }
                Correction::FlushTo(target) => {
                    self.pending.hard_resyncs += 1;
                    let mut guard = self.shared.lock_buffer();
                    guard.flush.target = target;
                }
                Correction::Silence(frames) => {
                    self.pending.hard_resyncs += 1;
                    self.pending.silence_insertions += 1;
                    self.play_silence(frames);
                }
            }
            self.window.record(sync_error, i64::from(added));
            if self.window.window_complete() {
                self.report_window();
            }
        }

        let samples = if use_stuffed { &self.stuffed } else { &self.wide };
        let volume = if self.software_mute { 0 } else { self.fix_volume };
        let dither = needs_dither(self.fix_volume, self.software_mute, &self.config)
            .then_some(&mut self.dither);
        self.bytes.clear();
        process_samples(samples, volume, self.config.output_format, dither, &mut self.bytes);
        let frames = samples.len() / CHANNELS;
        self.packets_played += 1;
        self.write(frames);
    }

    fn play_silence(&mut self, frames: usize) {
        let quantum = (self.config.output_rate / 10).max(1) as usize;
        let mut remaining = frames;
        while remaining > 0 {
            let chunk = remaining.min(quantum);
            let dither = needs_dither(self.fix_volume, self.software_mute, &self.config)
                .then_some(&mut self.dither);
            self.bytes.clear();
            generate_zero_frames(
                chunk,
                CHANNELS,
                self.config.output_format,
                dither,
                &mut self.bytes,
            );
            self.write(chunk);
            remaining -= chunk;
        }
    }

    fn write(&mut self, frames: usize) {
        match self.sink.play(&self.bytes, frames) {
            Ok(()) => {}
            Err(SinkError::Stalled) => self.report_stall(),
            Err(e) => tracing::debug!(error = %e, frames, "Sink rejected audio"),
        }
    }

    fn report_stall(&mut self) {
        if self.stall_reported {
            return;
        }
        self.stall_reported = true;
        tracing::warn!("Output device stalled");
        run_configured(
            self.hooks.as_ref(),
            self.config.hooks.on_unfixable.as_deref(),
            STALLED_ARGUMENT,
            self.config.hooks.wait_for_completion,
        );
    }

    fn report_window(&mut self) {
        if self.config.statistics {
            let counters = self.shared.lock_buffer().counters;
            let rate = f64::from(self.config.output_rate);
            let (resample_mean_us, _) = self.corrector.resample_timing();
            tracing::info!(
                sync_error_ms = format!("{:.2}", self.window.mean_sync_error() * 1000.0 / rate),
                correction_ppm =
                    format!("{:.1}", self.window.mean_correction() * 1e6 / self.frames_per_release()),
                abs_correction_ppm = format!(
                    "{:.1}",
                    self.window.mean_abs_correction() * 1e6 / self.frames_per_release()
                ),
                drift_ppm = format!("{:.1}", self.window.mean_drift() * 1e6 / self.frames_per_release()),
                missing = counters.missing_frames,
                late = counters.late_packets,
                too_late = counters.too_late_packets,
                resend_requests = counters.resend_requests,
                min_occupancy = self.extremes.min_occupancy.unwrap_or(0),
                max_occupancy = self.extremes.max_occupancy,
                min_sink_queue = self.extremes.min_sink_queue.unwrap_or(-1),
                resample_mean_us = format!("{resample_mean_us:.0}"),
                "Playback statistics"
            );
        }
        self.extremes = WindowExtremes::default();
    }

    fn apply_volume(&mut self, airplay_volume: f64) {
        let hardware = if self.caps.parameters {
            self.sink.parameters()
        } else {
            None
        };
        match resolve_volume(airplay_volume, hardware, &self.config.volume) {
            VolumeDecision::Ignore => {
                tracing::debug!(airplay_volume, "Volume control ignored");
            }
            VolumeDecision::Mute => {
                if self.caps.mute && self.sink.mute(true) {
                    tracing::debug!("Hardware mute on");
                } else {
                    self.software_mute = true;
                    tracing::debug!("Software mute on");
                }
            }
            VolumeDecision::Set {
                hardware_db,
                fix_volume,
                scaled_db,
            } => {
                if let Some(db) = hardware_db {
                    if self.caps.volume {
                        self.sink.volume(db);
                    }
                }
                self.fix_volume = fix_volume;
                if self.caps.mute {
                    self.sink.mute(false);
                }
                self.software_mute = false;
                tracing::debug!(airplay_volume, scaled_db, fix_volume, "Volume set");
            }
        }
    }
}

fn needs_dither(fix_volume: i32, software_mute: bool, config: &PlayerConfig) -> bool {
    (fix_volume != UNITY_VOLUME && !software_mute)
        || config.output_format.bits_per_sample() < 16
        || config.playback_mode == PlaybackMode::Mono
}
