//! Audio output path
//!
//! Everything between a released frame and the sink: widening and channel
//! mapping, software volume with dither, drift-correcting stuffing, and the
//! sink abstraction itself.

pub mod convert;
pub mod dither;
pub mod format;
pub mod output;
pub mod output_cpal;
pub mod stuffer;
pub mod volume;

pub use convert::{UNITY_VOLUME, generate_zero_frames, process_samples, widen_frames};
pub use dither::Dither;
pub use format::{OutputFormat, PlaybackMode};
pub use output::{AudioSink, SinkCapabilities, SinkError, VolumeRange, create_default_sink};
#[cfg(feature = "audio-cpal")]
pub use output_cpal::CpalSink;
pub use stuffer::{Stuffer, StuffingError, StuffingMode};
pub use volume::{VolumeDecision, VolumeProfile, resolve_volume};
