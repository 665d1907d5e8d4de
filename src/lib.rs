//! # airsync
//!
//! Jitter buffer and clock synchronisation engine for `AirPlay` audio
//! receivers.
//!
//! ## Features
//!
//! - Sequence-indexed frame ring tolerant of loss, reordering and duplicates
//! - Retransmission scheduling with exponential back-off
//! - Source-to-local clock bridge with drift estimation
//! - Pre-roll silence so the first frame starts on time
//! - Drift correction by single-frame stuffing or resampling
//! - Software volume with dither, and hardware mixer control
//! - Activity hooks for external commands
//!
//! ## Example
//!
//! ```rust,no_run
//! use airsync::prelude::*;
//!
//! # fn example() -> Result<(), SyncError> {
//! let config = PlayerConfig::builder()
//!     .latency_frames(88200)
//!     .build();
//! let sink = airsync::audio::create_default_sink()?;
//! let player = Player::start(config, sink, SessionContext::default())?;
//!
//! let handle = player.handle();
//! handle.set_reference(TimingReference {
//!     remote_timestamp: 0,
//!     remote_time: 0,
//!     local_time: 0,
//! });
//! handle.put_packet(0, 0, &[0; 704])?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Producers** hold a [`PlayerHandle`] and insert packets, timing
//!   references, flushes and volume changes
//! - **The playback thread** runs a [`PlaybackEngine`] that releases frames
//!   to an [`AudioSink`](audio::AudioSink) on schedule
//! - **The activity monitor** runs hooks when the player starts and stops

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Player activity tracking and hooks
pub mod activity;
pub mod audio;
pub mod decoder;
/// Error types
pub mod error;
pub mod player;
/// Testing utilities
pub mod testing;
pub mod time;
/// Configuration types
pub mod types;

// Re-exports
pub use activity::{ActivityMonitor, ActivityState, CommandHookRunner, HookRunner};
pub use decoder::{Decoder, PcmDecoder};
pub use error::{Result, SyncError};
pub use player::{
    PlaybackEngine, PlaybackStats, Player, PlayerHandle, PutOutcome, ResendRequester,
    SessionContext, Step, TimingReference,
};
pub use time::{LocalClock, MonotonicClock};
pub use types::{HookConfig, PlayerConfig, PlayerConfigBuilder, ResendConfig, VolumeConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
///
/// Convenient re-exports
pub mod prelude {
    pub use crate::audio::{AudioSink, OutputFormat, PlaybackMode, StuffingMode};
    pub use crate::{
        PlaybackStats, Player, PlayerConfig, PlayerHandle, SessionContext, SyncError,
        TimingReference,
    };
}
