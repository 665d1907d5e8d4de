//! Playback session
//!
//! [`Player`] owns the playback thread; [`PlayerHandle`] is the cloneable
//! producer side used by the network and control layers.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;

use super::clock::TimingReference;
use super::engine::{CHANNELS, PlaybackEngine, SharedState};
use super::resend::{ResendPolicy, ResendRequester};
use super::ring::PutOutcome;
use super::stats::PlaybackStats;
use crate::activity::{ActivityMonitor, CommandHookRunner, HookRunner};
use crate::audio::output::AudioSink;
use crate::decoder::{DecodeError, Decoder};
use crate::error::{Result, SyncError};
use crate::time::{LocalClock, MonotonicClock};
use crate::types::PlayerConfig;

/// Collaborators a session runs with
#[derive(Clone)]
pub struct SessionContext {
    /// Local time source
    pub clock: Arc<dyn LocalClock>,
    /// Where retransmission requests go; `None` drops them
    pub resender: Option<Arc<dyn ResendRequester>>,
    /// Runs the unfixable-error hook
    pub hooks: Arc<dyn HookRunner>,
    /// Told when playback starts and stops
    pub activity: Option<Arc<ActivityMonitor>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            clock: Arc::new(MonotonicClock),
            resender: None,
            hooks: Arc::new(CommandHookRunner),
            activity: None,
        }
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("resender", &self.resender.is_some())
            .field("activity", &self.activity.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Use `clock` for local time
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn LocalClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Send retransmission requests to `resender`
    #[must_use]
    pub fn with_resender(mut self, resender: Arc<dyn ResendRequester>) -> Self {
        self.resender = Some(resender);
        self
    }

    /// Run hooks through `hooks`
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn HookRunner>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Report activity to `monitor`
    #[must_use]
    pub fn with_activity(mut self, monitor: Arc<ActivityMonitor>) -> Self {
        self.activity = Some(monitor);
        self
    }
}

/// Producer-side handle to a running session
#[derive(Clone)]
pub struct PlayerHandle {
    shared: Arc<SharedState>,
    resend: ResendPolicy,
    resender: Option<Arc<dyn ResendRequester>>,
    activity: Option<Arc<ActivityMonitor>>,
    cancel: CancellationToken,
    max_frames: usize,
}

impl std::fmt::Debug for PlayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerHandle")
            .field("stopped", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl PlayerHandle {
    fn ensure_running(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Check that `pcm` is whole stereo frames that fit in one slot.
    fn check_shape(&self, pcm: &[i16]) -> std::result::Result<(), DecodeError> {
        if pcm.len() % CHANNELS != 0 {
            return Err(DecodeError::Truncated {
                len: pcm.len() * 2,
                frame_bytes: CHANNELS * 2,
            });
        }
        let frames = pcm.len() / CHANNELS;
        if frames > self.max_frames {
            return Err(DecodeError::Oversized {
                frames,
                capacity: self.max_frames,
            });
        }
        Ok(())
    }

    fn reject(&self, seq: u16, error: DecodeError) -> SyncError {
        tracing::debug!(seq, error = %error, "Bad audio packet discarded");
        self.shared.lock_buffer().counters.decode_failures += 1;
        error.into()
    }

    /// Insert a decoded packet of interleaved stereo.
    ///
    /// Retransmission requests for any gap that has become due are issued
    /// after the lock is released.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Decode` if `pcm` is not a whole number of stereo
    /// frames or holds more frames than a slot (the failure is counted and
    /// the packet dropped), or `SyncError::Stopped` after the session has
    /// been stopped.
    pub fn put_packet(&self, seq: u16, timestamp: u32, pcm: &[i16]) -> Result<PutOutcome> {
        self.ensure_running()?;
        if let Err(e) = self.check_shape(pcm) {
            return Err(self.reject(seq, e));
        }
        let mut requests = Vec::new();
        let outcome = {
            let mut guard = self.shared.lock_buffer();
            guard.counters.packets_received += 1;
            let outcome = guard.ring.put(seq, timestamp, pcm, CHANNELS);
            match outcome {
                PutOutcome::Stored { evicted, .. } => {
                    guard.counters.evicted_slots += evicted as u64;
                }
                PutOutcome::Late => {
                    guard.counters.late_packets += 1;
                    tracing::trace!(seq, "Late packet stored");
                }
                PutOutcome::Duplicate => {
                    guard.counters.duplicate_packets += 1;
                    tracing::trace!(seq, "Duplicate packet ignored");
                }
                PutOutcome::TooLate => {
                    guard.counters.too_late_packets += 1;
                    tracing::debug!(seq, read = guard.ring.read_cursor(), "Packet too late, dropped");
                }
            }
            self.shared.flow.notify_all();

            if self.resender.is_some() {
                self.resend.scan(&mut guard.ring, &mut requests);
                guard.counters.resend_requests += requests.len() as u64;
            }
            outcome
        };

        if let Some(resender) = &self.resender {
            for seq in requests {
                tracing::debug!(seq, "Requesting resend");
                resender.request_resend(seq, 1);
            }
        }
        Ok(outcome)
    }

    /// Decode `payload` outside the lock, then insert it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Decode` if the payload is rejected (the failure is
    /// counted and the packet dropped) or `SyncError::Stopped`.
    pub fn put_encoded(
        &self,
        seq: u16,
        timestamp: u32,
        payload: &[u8],
        decoder: &mut dyn Decoder,
    ) -> Result<PutOutcome> {
        self.ensure_running()?;
        let mut pcm = Vec::with_capacity(self.max_frames * CHANNELS);
        match decoder.decode(payload, &mut pcm) {
            Ok(_) => self.put_packet(seq, timestamp, &pcm),
            Err(e) => Err(self.reject(seq, e)),
        }
    }

    /// Flush the sink and drop buffered frames before `target_timestamp`.
    pub fn request_flush(&self, target_timestamp: u32) {
        let mut guard = self.shared.lock_buffer();
        tracing::info!(target_ts = target_timestamp, "Flush requested");
        guard.flush.requested = true;
        guard.flush.target = target_timestamp;
        self.shared.flow.notify_all();
    }

    /// Feed a timing reference to the clock bridge.
    pub fn set_reference(&self, reference: TimingReference) {
        self.shared.lock_clock().set_reference(reference);
        self.shared.flow.notify_all();
    }

    /// Request an AirPlay volume (0.0 loudest, -30.0 quietest, -144.0 mute).
    pub fn set_volume(&self, airplay_volume: f64) {
        let mut guard = self.shared.lock_buffer();
        guard.pending_volume = Some(airplay_volume);
        self.shared.flow.notify_all();
    }

    /// Forward a player activity signal to the monitor, if any.
    pub fn signal_activity(&self, active: bool) {
        if let Some(monitor) = &self.activity {
            monitor.signal_activity(active);
        }
    }

    /// Statistics as of the playback thread's last iteration
    #[must_use]
    pub fn stats(&self) -> PlaybackStats {
        let guard = self.shared.lock_buffer();
        let mut stats = guard.published;
        stats.counters = guard.counters;
        stats.occupancy = guard.ring.occupancy();
        stats
    }

    /// Whether the session has been stopped
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A running playback session
///
/// Dropping the player stops the playback thread and releases the sink.
pub struct Player {
    handle: PlayerHandle,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Player {
    /// Validate `config`, open `sink` and start the playback thread.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is inconsistent, a sink
    /// error if the sink cannot start, or `SyncError::ThreadSpawn`.
    pub fn start(
        config: PlayerConfig,
        sink: Box<dyn AudioSink>,
        context: SessionContext,
    ) -> Result<Self> {
        let (mut engine, handle) = Self::prepare(config, sink, context)?;
        engine.start()?;

        let cancel = handle.cancel.clone();
        let thread = thread::Builder::new()
            .name("airsync-player".into())
            .spawn(move || {
                tracing::debug!("Playback thread started");
                while !cancel.is_cancelled() {
                    engine.run_once();
                }
                engine.shutdown();
                tracing::debug!("Playback thread finished");
            })
            .map_err(|e| SyncError::ThreadSpawn {
                name: "airsync-player",
                message: e.to_string(),
            })?;

        handle.signal_activity(true);
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Build the engine and handle without starting a thread.
    ///
    /// The caller drives the engine with [`PlaybackEngine::tick`]; used for
    /// deterministic tests and for embedding in an existing loop.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is inconsistent.
    pub fn prepare(
        config: PlayerConfig,
        sink: Box<dyn AudioSink>,
        context: SessionContext,
    ) -> Result<(PlaybackEngine, PlayerHandle)> {
        config.validate()?;
        let shared = Arc::new(SharedState::new(&config));
        let handle = PlayerHandle {
            shared: Arc::clone(&shared),
            resend: ResendPolicy::new(&config),
            resender: context.resender,
            activity: context.activity,
            cancel: CancellationToken::new(),
            max_frames: config.frames_per_packet as usize,
        };
        tracing::info!(
            latency = config.latency_frames,
            capacity = config.buffer_frames,
            rate = config.input_rate,
            "Playback session prepared"
        );
        let engine = PlaybackEngine::new(config, shared, context.clock, sink, context.hooks);
        Ok((engine, handle))
    }

    /// Producer handle for this session
    #[must_use]
    pub fn handle(&self) -> PlayerHandle {
        self.handle.clone()
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> PlaybackStats {
        self.handle.stats()
    }

    /// Stop the playback thread and release the sink. Idempotent.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.handle.cancel.cancel();
        {
            let _guard = self.handle.shared.lock_buffer();
            self.handle.shared.flow.notify_all();
        }
        if thread.join().is_err() {
            tracing::error!("Playback thread panicked");
        }
        self.handle.signal_activity(false);
        tracing::info!("Playback session stopped");
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}
