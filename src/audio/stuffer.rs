//! Single-frame insertion and removal
//!
//! Two ways of lengthening or shortening a packet by exactly one frame:
//! a cheap interpolation at a random interior position, and a resample of the
//! whole packet to one frame more or less using `rubato`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rubato::{FftFixedInOut, Resampler};
use serde::{Deserialize, Serialize};

/// Packets shorter than this are never stuffed.
pub const MIN_STUFF_FRAMES: usize = 100;

/// Frames at each edge copied verbatim after resampling.
const EDGE_FRAMES: usize = 5;

const CHANNELS: usize = 2;

/// Distinct packet shapes kept planned at once.
const MAX_CACHED_RESAMPLERS: usize = 8;

/// How the corrector adds or removes a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StuffingMode {
    /// Always interpolate at one position
    Basic,
    /// Always resample the whole packet
    Resample,
    /// Resample when the sink queue and the CPU allow it, else interpolate
    #[default]
    Auto,
}

/// Errors from resample stuffing
#[derive(Debug, thiserror::Error)]
pub enum StuffingError {
    /// The resampler could not be built for this packet length
    #[error("resampler construction failed: {0}")]
    Construction(String),

    /// Resampling the packet failed
    #[error("resampling failed: {0}")]
    Resample(String),
}

/// Planned resamplers keyed by `(input frames, output frames)`
#[derive(Default)]
struct ResamplerCache {
    entries: HashMap<(usize, usize), FftFixedInOut<f64>>,
}

impl std::fmt::Debug for ResamplerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResamplerCache")
            .field("shapes", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ResamplerCache {
    /// A resampler from `length` to `target` frames, cleared of earlier input.
    fn get(
        &mut self,
        length: usize,
        target: usize,
    ) -> Result<&mut FftFixedInOut<f64>, StuffingError> {
        let key = (length, target);
        if self.entries.len() >= MAX_CACHED_RESAMPLERS && !self.entries.contains_key(&key) {
            self.entries.clear();
        }
        match self.entries.entry(key) {
            Entry::Occupied(entry) => {
                let resampler = entry.into_mut();
                resampler.reset();
                Ok(resampler)
            }
            Entry::Vacant(entry) => {
                tracing::debug!(length, target, "Planning stuffing resampler");
                let resampler = FftFixedInOut::<f64>::new(length, target, length, CHANNELS)
                    .map_err(|e| StuffingError::Construction(e.to_string()))?;
                Ok(entry.insert(resampler))
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Frame stuffer with its own random source and timing record
#[derive(Debug)]
pub struct Stuffer {
    rng: StdRng,
    resamplers: ResamplerCache,
    planar_in: Vec<Vec<f64>>,
    planar_out: Vec<Vec<f64>>,
    resample_count: u32,
    resample_mean_us: f64,
    resample_longest_us: f64,
}

impl Stuffer {
    /// Stuffer seeded from the operating system
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic stuffer
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            resamplers: ResamplerCache::default(),
            planar_in: vec![Vec::new(); CHANNELS],
            planar_out: vec![Vec::new(); CHANNELS],
            resample_count: 0,
            resample_mean_us: 0.0,
            resample_longest_us: 0.0,
        }
    }

    /// Copy `input` (interleaved stereo) into `out`, inserting (`stuff == 1`)
    /// or removing (`stuff == -1`) one frame at a random interior position.
    ///
    /// Returns the number of frames actually added, which is zero when the
    /// packet is too short or `stuff` is out of range.
    pub fn stuff_basic(&mut self, input: &[i32], stuff: i32, out: &mut Vec<i32>) -> i32 {
        let length = input.len() / CHANNELS;
        out.clear();
        if !(-1..=1).contains(&stuff) || stuff == 0 || length < MIN_STUFF_FRAMES {
            out.extend_from_slice(input);
            return 0;
        }

        let pos = self.rng.gen_range(1..length - 1);
        let split = pos * CHANNELS;
        out.extend_from_slice(&input[..split]);
        if stuff == 1 {
            for ch in 0..CHANNELS {
                out.push(mean(input[split - CHANNELS + ch], input[split + ch]));
            }
            out.extend_from_slice(&input[split..]);
        } else {
            out.extend_from_slice(&input[split + CHANNELS..]);
        }
        stuff
    }

    /// Resample `input` (interleaved stereo) to exactly one frame more or less.
    ///
    /// The first and last few frames are copied from the input to hide edge
    /// ringing. Resamplers are planned once per packet shape and reused; only
    /// the resampling itself is timed. Returns the number of frames added.
    ///
    /// # Errors
    ///
    /// Returns `StuffingError` if the resampler cannot be built or run.
    #[allow(
        clippy::cast_sign_loss,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        reason = "Stuff is -1 or 1 and packet lengths are small"
    )]
    pub fn stuff_resample(
        &mut self,
        input: &[i32],
        stuff: i32,
        out: &mut Vec<i32>,
    ) -> Result<i32, StuffingError> {
        let length = input.len() / CHANNELS;
        if !(-1..=1).contains(&stuff) || stuff == 0 || length < MIN_STUFF_FRAMES {
            out.clear();
            out.extend_from_slice(input);
            return Ok(0);
        }
        let target = (length as i64 + i64::from(stuff)) as usize;
        let resampler = self.resamplers.get(length, target)?;
        let started = Instant::now();
        let chunk = resampler.input_frames_next();

        for (ch, planar) in self.planar_in.iter_mut().enumerate() {
            planar.clear();
            planar.extend(input.iter().skip(ch).step_by(CHANNELS).map(|&s| f64::from(s)));
            planar.resize(chunk, 0.0);
        }
        for planar in &mut self.planar_out {
            planar.clear();
        }

        let first = resampler
            .process(&self.planar_in, None)
            .map_err(|e| StuffingError::Resample(e.to_string()))?;
        for (dst, src) in self.planar_out.iter_mut().zip(&first) {
            dst.extend_from_slice(src);
        }
        for planar in &mut self.planar_in {
            planar.clear();
            planar.resize(chunk, 0.0);
        }
        let tail = resampler
            .process(&self.planar_in, None)
            .map_err(|e| StuffingError::Resample(e.to_string()))?;
        for (dst, src) in self.planar_out.iter_mut().zip(&tail) {
            dst.extend_from_slice(src);
        }

        let delay = resampler.output_delay();
        out.clear();
        out.reserve(target * CHANNELS);
        for frame in 0..target {
            for ch in 0..CHANNELS {
                let value = self.planar_out[ch].get(delay + frame).copied().unwrap_or(0.0);
                out.push(value.round().clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32);
            }
        }

        let edge = EDGE_FRAMES * CHANNELS;
        out[..edge].copy_from_slice(&input[..edge]);
        let out_len = out.len();
        out[out_len - edge..].copy_from_slice(&input[input.len() - edge..]);

        self.record_resample_time(started.elapsed());
        Ok(stuff)
    }

    fn record_resample_time(&mut self, elapsed: Duration) {
        let us = elapsed.as_secs_f64() * 1e6;
        self.resample_count = self.resample_count.saturating_add(1);
        self.resample_mean_us += (us - self.resample_mean_us) / f64::from(self.resample_count);
        if us > self.resample_longest_us {
            self.resample_longest_us = us;
        }
    }

    /// Whether resampling has so far cost less than `budget` on average.
    ///
    /// Always true until the first measurement.
    #[must_use]
    pub fn resample_affordable(&self, budget: Duration) -> bool {
        self.resample_count == 0 || self.resample_mean_us < budget.as_secs_f64() * 1e6
    }

    /// Mean and longest resample time in microseconds
    #[must_use]
    pub fn resample_timing(&self) -> (f64, f64) {
        (self.resample_mean_us, self.resample_longest_us)
    }

    /// Uniform random value in `[0, 1)` from the stuffer's source
    pub fn random_unit(&mut self) -> f64 {
        self.rng.r#gen::<f64>()
    }
}

impl Default for Stuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_possible_truncation, reason = "Mean of two i32 fits in i32")]
fn mean(a: i32, b: i32) -> i32 {
    ((i64::from(a) + i64::from(b)) / 2) as i32
}
