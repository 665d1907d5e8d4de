//! In-memory audio sink
//!
//! Clones share state, so a test can keep one copy while the engine owns the
//! other. With a clock attached the queue drains at the sink rate in virtual
//! time; without one it only changes when frames are played or drained by
//! hand.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::ManualClock;
use crate::audio::format::OutputFormat;
use crate::audio::output::{AudioSink, SinkCapabilities, SinkError, VolumeRange};
use crate::time::LocalClock;

#[derive(Debug, Default)]
struct MockSinkState {
    queued: i64,
    drained_at: u64,
    played_frames: u64,
    play_calls: u64,
    flush_count: u32,
    started: Option<(u32, OutputFormat)>,
    stopped: bool,
    stalled: bool,
    volume_db: Option<f64>,
    muted: bool,
    audio: Vec<u8>,
    record_audio: bool,
}

/// Sink double for tests
#[derive(Clone)]
pub struct MockSink {
    caps: SinkCapabilities,
    range: Option<VolumeRange>,
    rate: u32,
    clock: Option<Arc<ManualClock>>,
    state: Arc<Mutex<MockSinkState>>,
}

impl std::fmt::Debug for MockSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSink")
            .field("caps", &self.caps)
            .field("queued", &self.lock().queued)
            .finish_non_exhaustive()
    }
}

impl MockSink {
    fn with_caps(caps: SinkCapabilities) -> Self {
        Self {
            caps,
            range: None,
            rate: 44100,
            clock: None,
            state: Arc::new(Mutex::new(MockSinkState::default())),
        }
    }

    /// Sink that can only play
    #[must_use]
    pub fn play_only() -> Self {
        Self::with_caps(SinkCapabilities::play_only())
    }

    /// Sink that reports its queue and can be flushed
    #[must_use]
    pub fn with_delay() -> Self {
        Self::with_caps(SinkCapabilities::with_delay())
    }

    /// Drain the queue at `rate` frames per second of `clock` time
    #[must_use]
    pub fn draining(mut self, clock: Arc<ManualClock>, rate: u32) -> Self {
        self.lock().drained_at = clock.now();
        self.clock = Some(clock);
        self.rate = rate;
        self
    }

    /// Add a hardware mixer with the given range
    #[must_use]
    pub fn with_mixer(mut self, min_db: f64, max_db: f64) -> Self {
        self.caps.volume = true;
        self.caps.mute = true;
        self.caps.parameters = true;
        self.range = Some(VolumeRange { min_db, max_db });
        self
    }

    /// Keep a copy of every byte played
    #[must_use]
    pub fn recording(self) -> Self {
        self.start_recording();
        self
    }

    /// Keep a copy of every byte played from now on; shared by all clones
    pub fn start_recording(&self) {
        self.lock().record_audio = true;
    }

    fn lock(&self) -> MutexGuard<'_, MockSinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        reason = "Test spans are short"
    )]
    fn drain(&self, state: &mut MockSinkState) {
        let Some(clock) = &self.clock else {
            return;
        };
        let now = clock.now();
        let elapsed = now.saturating_sub(state.drained_at);
        let frames = (u128::from(elapsed) * u128::from(self.rate) / 1_000_000_000) as i64;
        if frames > 0 {
            state.queued = (state.queued - frames).max(0);
            let consumed_ns = frames as u128 * 1_000_000_000 / u128::from(self.rate);
            state.drained_at += consumed_ns as u64;
        }
        if state.queued == 0 {
            state.drained_at = now;
        }
    }

    /// Pretend `frames` more frames were queued
    pub fn queue_frames(&self, frames: usize) {
        self.lock().queued += i64::try_from(frames).unwrap_or(i64::MAX);
    }

    /// Remove `frames` frames from the queue
    pub fn drain_frames(&self, frames: usize) {
        let mut state = self.lock();
        state.queued = (state.queued - i64::try_from(frames).unwrap_or(i64::MAX)).max(0);
    }

    /// Make `delay` report a stalled device
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// Frames currently queued
    #[must_use]
    pub fn queued(&self) -> i64 {
        let mut state = self.lock();
        self.drain(&mut state);
        state.queued
    }

    /// Frames played in total
    #[must_use]
    pub fn played_frames(&self) -> u64 {
        self.lock().played_frames
    }

    /// Calls to `play`
    #[must_use]
    pub fn play_calls(&self) -> u64 {
        self.lock().play_calls
    }

    /// Calls to `flush`
    #[must_use]
    pub fn flush_count(&self) -> u32 {
        self.lock().flush_count
    }

    /// Rate and format passed to `start`
    #[must_use]
    pub fn started(&self) -> Option<(u32, OutputFormat)> {
        self.lock().started
    }

    /// Whether `stop` was called
    #[must_use]
    pub fn stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Last hardware volume set
    #[must_use]
    pub fn volume_db(&self) -> Option<f64> {
        self.lock().volume_db
    }

    /// Whether the hardware mute is on
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.lock().muted
    }

    /// Bytes played, if recording
    #[must_use]
    pub fn audio(&self) -> Vec<u8> {
        self.lock().audio.clone()
    }
}

impl AudioSink for MockSink {
    fn capabilities(&self) -> SinkCapabilities {
        self.caps
    }

    fn start(&mut self, rate: u32, format: OutputFormat) -> Result<(), SinkError> {
        let mut state = self.lock();
        state.started = Some((rate, format));
        state.stopped = false;
        Ok(())
    }

    fn play(&mut self, buf: &[u8], frames: usize) -> Result<(), SinkError> {
        let mut state = self.lock();
        self.drain(&mut state);
        let frames_i64 = i64::try_from(frames).unwrap_or(i64::MAX);
        if state.queued == 0 {
            if let Some(clock) = &self.clock {
                state.drained_at = clock.now();
            }
        }
        state.queued += frames_i64;
        state.played_frames += frames as u64;
        state.play_calls += 1;
        if state.record_audio {
            state.audio.extend_from_slice(buf);
        }
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.lock();
        state.stopped = true;
        state.queued = 0;
    }

    fn flush(&mut self) {
        let mut state = self.lock();
        state.flush_count += 1;
        state.queued = 0;
    }

    fn delay(&mut self) -> Result<i64, SinkError> {
        if !self.caps.delay {
            return Err(SinkError::Unsupported);
        }
        let mut state = self.lock();
        if state.stalled {
            return Err(SinkError::Stalled);
        }
        self.drain(&mut state);
        Ok(state.queued)
    }

    fn volume(&mut self, db: f64) {
        self.lock().volume_db = Some(db);
    }

    fn mute(&mut self, mute: bool) -> bool {
        if !self.caps.mute {
            return false;
        }
        self.lock().muted = mute;
        true
    }

    fn parameters(&self) -> Option<VolumeRange> {
        self.range
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_queue_drains_in_virtual_time() {
        let clock = Arc::new(ManualClock::new(0));
        let mut sink = MockSink::with_delay().draining(Arc::clone(&clock), 44100);
        sink.play(&[0; 4 * 4410], 4410).unwrap();
        assert_eq!(sink.delay().unwrap(), 4410);
        clock.advance(Duration::from_millis(50));
        assert_eq!(sink.delay().unwrap(), 2205);
        clock.advance(Duration::from_secs(1));
        assert_eq!(sink.delay().unwrap(), 0);
    }

    #[test]
    fn test_stall_and_flush() {
        let mut sink = MockSink::with_delay();
        sink.queue_frames(100);
        sink.set_stalled(true);
        assert_eq!(sink.delay(), Err(SinkError::Stalled));
        sink.set_stalled(false);
        sink.flush();
        assert_eq!(sink.delay(), Ok(0));
        assert_eq!(sink.flush_count(), 1);
    }
}
