//! Audio sink abstraction
//!
//! The engine pushes formatted PCM into a sink. Only `play` is mandatory;
//! everything else is an optional capability that the engine queries once at
//! session start through [`AudioSink::capabilities`].

use super::format::OutputFormat;

/// Errors from an audio sink
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The sink does not implement the requested capability
    #[error("operation not supported by sink")]
    Unsupported,

    /// The output device has stopped consuming frames
    #[error("output device stalled")]
    Stalled,

    /// Device-level failure
    #[error("device error: {0}")]
    Device(String),

    /// The requested output format cannot be rendered
    #[error("unsupported output format: {0:?}")]
    Format(OutputFormat),

    /// The sink has been closed
    #[error("sink closed")]
    Closed,
}

/// Optional operations a sink supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SinkCapabilities {
    /// `delay` reports the frames queued ahead of the DAC
    pub delay: bool,
    /// `flush` discards queued frames
    pub flush: bool,
    /// `volume` sets a hardware attenuation
    pub volume: bool,
    /// `mute` switches a hardware mute
    pub mute: bool,
    /// `parameters` reports the hardware attenuation range
    pub parameters: bool,
}

impl SinkCapabilities {
    /// A sink that can only play
    #[must_use]
    pub fn play_only() -> Self {
        Self::default()
    }

    /// A sink that reports delay and can be flushed
    #[must_use]
    pub fn with_delay() -> Self {
        Self {
            delay: true,
            flush: true,
            ..Self::default()
        }
    }
}

/// Hardware attenuation range in dB
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeRange {
    /// Lowest attenuation the mixer can apply
    pub min_db: f64,
    /// Highest (usually 0 dB)
    pub max_db: f64,
}

/// Audio output backend
pub trait AudioSink: Send {
    /// Which optional operations this sink implements
    fn capabilities(&self) -> SinkCapabilities;

    /// Prepare the device for `rate` frames per second in `format`
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if the device cannot be opened in that format.
    fn start(&mut self, rate: u32, format: OutputFormat) -> Result<(), SinkError> {
        let _ = (rate, format);
        Ok(())
    }

    /// Queue `frames` frames of formatted audio
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if the device rejects the write.
    fn play(&mut self, buf: &[u8], frames: usize) -> Result<(), SinkError>;

    /// Release the device
    fn stop(&mut self) {}

    /// Discard everything queued
    fn flush(&mut self) {}

    /// Frames queued ahead of the DAC
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Stalled` if the device has stopped draining, or
    /// `SinkError::Unsupported` if the sink cannot tell.
    fn delay(&mut self) -> Result<i64, SinkError> {
        Err(SinkError::Unsupported)
    }

    /// Set hardware attenuation in dB
    fn volume(&mut self, db: f64) {
        let _ = db;
    }

    /// Switch hardware mute, returning whether the sink handled it
    fn mute(&mut self, mute: bool) -> bool {
        let _ = mute;
        false
    }

    /// Hardware attenuation range, if the sink has a mixer
    fn parameters(&self) -> Option<VolumeRange> {
        None
    }
}

impl<T: AudioSink + ?Sized> AudioSink for Box<T> {
    fn capabilities(&self) -> SinkCapabilities {
        (**self).capabilities()
    }

    fn start(&mut self, rate: u32, format: OutputFormat) -> Result<(), SinkError> {
        (**self).start(rate, format)
    }

    fn play(&mut self, buf: &[u8], frames: usize) -> Result<(), SinkError> {
        (**self).play(buf, frames)
    }

    fn stop(&mut self) {
        (**self).stop();
    }

    fn flush(&mut self) {
        (**self).flush();
    }

    fn delay(&mut self) -> Result<i64, SinkError> {
        (**self).delay()
    }

    fn volume(&mut self, db: f64) {
        (**self).volume(db);
    }

    fn mute(&mut self, mute: bool) -> bool {
        (**self).mute(mute)
    }

    fn parameters(&self) -> Option<VolumeRange> {
        (**self).parameters()
    }
}

/// Create the default sink for the current platform
///
/// # Errors
///
/// Returns `SinkError` if no backend is compiled in or the device cannot be opened.
pub fn create_default_sink() -> Result<Box<dyn AudioSink>, SinkError> {
    #[cfg(feature = "audio-cpal")]
    {
        Ok(Box::new(super::output_cpal::CpalSink::new()?))
    }

    #[cfg(not(feature = "audio-cpal"))]
    {
        Err(SinkError::Device(
            "No audio backend enabled. Enable the audio-cpal feature.".into(),
        ))
    }
}
