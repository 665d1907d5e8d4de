use crate::audio::format::{OutputFormat, PlaybackMode};
use crate::audio::stuffer::StuffingMode;
use crate::audio::volume::VolumeProfile;
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Slots kept free beyond the latency so a burst of resends still fits.
const RING_HEADROOM_SLOTS: usize = 10;

/// Configuration for a playback session
///
/// Time values are in seconds unless the field name says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Source frame rate (default: 44100)
    pub input_rate: u32,

    /// Sink frame rate, an integer multiple of the input rate (default: 44100)
    pub output_rate: u32,

    /// Frames per packet (default: 352)
    pub frames_per_packet: u32,

    /// Frame ring capacity in slots, a power of two (default: 1024)
    pub buffer_frames: usize,

    /// End-to-end latency in input frames (default: 88200 = 2 seconds)
    pub latency_frames: u32,

    /// Extra latency added for the backend, may be negative (default: 0)
    pub backend_latency_offset: f64,

    /// Sink queue length the scheduler aims to keep (default: 0.15)
    pub backend_buffer_desired_length: f64,

    /// Longest stretch of silence played before the first frame (default: whole latency)
    pub silent_lead_in_time: Option<f64>,

    /// Sync error beyond which a hard correction is made; 0 disables (default: 0.05)
    pub resync_threshold: f64,

    /// Sync error tolerated before stuffing (default: 0.002)
    pub tolerance: f64,

    /// How frames are inserted or removed
    pub stuffing: StuffingMode,

    /// Sink queue below which resample stuffing falls back to basic (default: 0.1)
    pub interpolation_threshold: f64,

    /// Time after the first frame during which soft correction is suppressed (default: 5)
    pub correction_holdoff: f64,

    /// Retransmission requests
    pub resend: ResendConfig,

    /// Never correct; play frames as they are released
    pub no_sync: bool,

    /// A timing reference older than this no longer drives correction (default: 10)
    pub max_reference_age: f64,

    /// Minimum source-time span between references used for drift (default: 5)
    pub drift_sample_interval: f64,

    /// Channel mapping applied to every frame
    pub playback_mode: PlaybackMode,

    /// Sample layout handed to the sink
    pub output_format: OutputFormat,

    /// Log a statistics line every window
    pub statistics: bool,

    /// Volume mapping
    pub volume: VolumeConfig,

    /// External commands
    pub hooks: HookConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            input_rate: 44100,
            output_rate: 44100,
            frames_per_packet: 352,
            buffer_frames: 1024,
            latency_frames: 88200,
            backend_latency_offset: 0.0,
            backend_buffer_desired_length: 0.15,
            silent_lead_in_time: None,
            resync_threshold: 0.05,
            tolerance: 0.002,
            stuffing: StuffingMode::Auto,
            interpolation_threshold: 0.1,
            correction_holdoff: 5.0,
            resend: ResendConfig::default(),
            no_sync: false,
            max_reference_age: 10.0,
            drift_sample_interval: 5.0,
            playback_mode: PlaybackMode::Stereo,
            output_format: OutputFormat::S16Le,
            statistics: false,
            volume: VolumeConfig::default(),
            hooks: HookConfig::default(),
        }
    }
}

/// Retransmission request settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResendConfig {
    /// Scan passes per missing frame (default: 8)
    pub attempts: u32,
    /// Growth of the look-back between passes (default: 2.0, quadratic)
    pub step_exponent: f64,
    /// Shortest look-back, in seconds (default: 0.25)
    pub min_interval: f64,
    /// Never ask for retransmission
    pub disabled: bool,
}

impl Default for ResendConfig {
    fn default() -> Self {
        Self {
            attempts: 8,
            step_exponent: 2.0,
            min_interval: 0.25,
            disabled: false,
        }
    }
}

/// Volume mapping settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Transfer function shape
    pub profile: VolumeProfile,
    /// Ceiling of the attenuation range in dB
    pub max_db: Option<f64>,
    /// Width of the attenuation range in dB
    pub range_db: Option<f64>,
    /// Spend hardware attenuation before software when both are used
    pub hw_priority: bool,
    /// Keep the volume at the top of the range regardless of requests
    pub ignore_volume_control: bool,
}

/// External command settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Run when the player becomes active
    pub on_active_start: Option<String>,
    /// Run when the player has been idle for the timeout
    pub on_active_stop: Option<String>,
    /// Run once per session when the output device stalls
    pub on_unfixable: Option<String>,
    /// Wait for hook commands to exit
    pub wait_for_completion: bool,
    /// Idle time before the active-stop hook runs, in seconds (default: 10)
    pub active_state_timeout: f64,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            on_active_start: None,
            on_active_stop: None,
            on_unfixable: None,
            wait_for_completion: false,
            active_state_timeout: 10.0,
        }
    }
}

impl HookConfig {
    /// Idle time before the active-stop hook runs
    #[must_use]
    pub fn active_timeout(&self) -> Duration {
        seconds(self.active_state_timeout)
    }
}

impl PlayerConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> PlayerConfigBuilder {
        PlayerConfigBuilder::default()
    }

    /// Parse a JSON configuration; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::ConfigParse` on malformed JSON, or a configuration
    /// error if the values are inconsistent.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Io` if the file cannot be read, otherwise as
    /// [`PlayerConfig::from_json`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Check that the values describe a playable session.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidConfig` for inconsistent values and
    /// `SyncError::LatencyExceedsCapacity` if the ring cannot hold the latency.
    pub fn validate(&self) -> Result<()> {
        if self.input_rate == 0 || self.output_rate == 0 {
            return Err(SyncError::invalid_config("frame rates must be non-zero"));
        }
        if self.output_rate < self.input_rate || self.output_rate % self.input_rate != 0 {
            return Err(SyncError::invalid_config(format!(
                "output rate {} is not an integer multiple of input rate {}",
                self.output_rate, self.input_rate
            )));
        }
        if self.frames_per_packet == 0 {
            return Err(SyncError::invalid_config("frames per packet must be non-zero"));
        }
        if !self.buffer_frames.is_power_of_two() || self.buffer_frames > 1 << 15 {
            return Err(SyncError::invalid_config(format!(
                "ring capacity {} must be a power of two no larger than 32768",
                self.buffer_frames
            )));
        }
        for (name, value) in [
            ("tolerance", self.tolerance),
            ("resync_threshold", self.resync_threshold),
            ("backend_buffer_desired_length", self.backend_buffer_desired_length),
            ("interpolation_threshold", self.interpolation_threshold),
            ("correction_holdoff", self.correction_holdoff),
            ("max_reference_age", self.max_reference_age),
            ("drift_sample_interval", self.drift_sample_interval),
            ("hooks.active_state_timeout", self.hooks.active_state_timeout),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SyncError::invalid_config(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if let Some(lead_in) = self.silent_lead_in_time {
            if !lead_in.is_finite() || lead_in < 0.0 {
                return Err(SyncError::invalid_config("silent lead-in time must be non-negative"));
            }
        }

        let required_slots = self.required_slots();
        if required_slots > self.buffer_frames {
            return Err(SyncError::LatencyExceedsCapacity {
                latency_frames: self.latency_frames,
                required_slots,
                capacity: self.buffer_frames,
            });
        }
        Ok(())
    }

    /// Slots needed to hold the latency plus headroom
    #[must_use]
    pub fn required_slots(&self) -> usize {
        let packets = self.latency_frames.div_ceil(self.frames_per_packet.max(1));
        usize::try_from(packets).unwrap_or(usize::MAX) + RING_HEADROOM_SLOTS
    }

    /// Output frames per input frame
    #[must_use]
    pub fn output_ratio(&self) -> u32 {
        (self.output_rate / self.input_rate.max(1)).max(1)
    }

    /// Interleaved samples one ring slot holds
    #[must_use]
    pub fn samples_per_slot(&self) -> usize {
        usize::try_from(self.frames_per_packet).unwrap_or(usize::MAX) * 2
    }

    /// Backend latency offset in input frames
    #[must_use]
    #[allow(clippy::cast_possible_truncation, reason = "Offsets are seconds, far below i64")]
    pub fn backend_offset_frames(&self) -> i64 {
        (self.backend_latency_offset * f64::from(self.input_rate)).round() as i64
    }

    /// Desired sink queue in input frames
    #[must_use]
    #[allow(clippy::cast_possible_truncation, reason = "Lengths are seconds, far below i64")]
    pub fn desired_buffer_frames(&self) -> i64 {
        (self.backend_buffer_desired_length * f64::from(self.input_rate)).round() as i64
    }

    /// Timing reference age limit
    #[must_use]
    pub fn reference_age_limit(&self) -> Duration {
        seconds(self.max_reference_age)
    }

    /// Minimum span for a drift measurement
    #[must_use]
    pub fn drift_interval(&self) -> Duration {
        seconds(self.drift_sample_interval)
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Builder for `PlayerConfig`
#[derive(Debug, Clone, Default)]
pub struct PlayerConfigBuilder {
    config: PlayerConfig,
}

impl PlayerConfigBuilder {
    /// Set source and sink frame rates
    #[must_use]
    pub fn rates(mut self, input_rate: u32, output_rate: u32) -> Self {
        self.config.input_rate = input_rate;
        self.config.output_rate = output_rate;
        self
    }

    /// Set frames per packet
    #[must_use]
    pub fn frames_per_packet(mut self, frames: u32) -> Self {
        self.config.frames_per_packet = frames;
        self
    }

    /// Set ring capacity in slots
    #[must_use]
    pub fn buffer_frames(mut self, slots: usize) -> Self {
        self.config.buffer_frames = slots;
        self
    }

    /// Set latency in input frames
    #[must_use]
    pub fn latency_frames(mut self, frames: u32) -> Self {
        self.config.latency_frames = frames;
        self
    }

    /// Set backend latency offset in seconds
    #[must_use]
    pub fn backend_latency_offset(mut self, seconds: f64) -> Self {
        self.config.backend_latency_offset = seconds;
        self
    }

    /// Set desired sink queue length in seconds
    #[must_use]
    pub fn backend_buffer_desired_length(mut self, seconds: f64) -> Self {
        self.config.backend_buffer_desired_length = seconds;
        self
    }

    /// Limit the silent lead-in before the first frame
    #[must_use]
    pub fn silent_lead_in_time(mut self, seconds: f64) -> Self {
        self.config.silent_lead_in_time = Some(seconds);
        self
    }

    /// Set the hard-correction threshold in seconds (0 disables)
    #[must_use]
    pub fn resync_threshold(mut self, seconds: f64) -> Self {
        self.config.resync_threshold = seconds;
        self
    }

    /// Set the soft-correction tolerance in seconds
    #[must_use]
    pub fn tolerance(mut self, seconds: f64) -> Self {
        self.config.tolerance = seconds;
        self
    }

    /// Set the stuffing mode
    #[must_use]
    pub fn stuffing(mut self, mode: StuffingMode) -> Self {
        self.config.stuffing = mode;
        self
    }

    /// Set the correction hold-off after the first frame, in seconds
    #[must_use]
    pub fn correction_holdoff(mut self, seconds: f64) -> Self {
        self.config.correction_holdoff = seconds;
        self
    }

    /// Set retransmission request settings
    #[must_use]
    pub fn resend(mut self, resend: ResendConfig) -> Self {
        self.config.resend = resend;
        self
    }

    /// Disable all timing correction
    #[must_use]
    pub fn no_sync(mut self, no_sync: bool) -> Self {
        self.config.no_sync = no_sync;
        self
    }

    /// Set the channel mapping
    #[must_use]
    pub fn playback_mode(mut self, mode: PlaybackMode) -> Self {
        self.config.playback_mode = mode;
        self
    }

    /// Set the sink sample layout
    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    /// Enable periodic statistics logging
    #[must_use]
    pub fn statistics(mut self, enable: bool) -> Self {
        self.config.statistics = enable;
        self
    }

    /// Set volume mapping
    #[must_use]
    pub fn volume(mut self, volume: VolumeConfig) -> Self {
        self.config.volume = volume;
        self
    }

    /// Set external commands
    #[must_use]
    pub fn hooks(mut self, hooks: HookConfig) -> Self {
        self.config.hooks = hooks;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> PlayerConfig {
        self.config
    }
}
