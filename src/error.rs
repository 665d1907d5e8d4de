//! Error types for the playback engine

use thiserror::Error;

pub use crate::audio::output::SinkError;
pub use crate::decoder::DecodeError;

/// Errors that can occur while running a synchronised playback session
#[derive(Debug, Error)]
pub enum SyncError {
    // ===== Configuration Errors =====
    /// Configuration values are inconsistent
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem
        message: String,
    },

    /// Configured latency cannot be held by the frame ring
    #[error(
        "latency of {latency_frames} frames needs {required_slots} slots but the ring holds {capacity}"
    )]
    LatencyExceedsCapacity {
        /// Requested latency in frames
        latency_frames: u32,
        /// Slots needed to hold that latency plus headroom
        required_slots: usize,
        /// Slots available
        capacity: usize,
    },

    /// Configuration text could not be parsed
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Data Path Errors =====
    /// Audio sink failure
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Packet decoding failure
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    // ===== Lifecycle Errors =====
    /// External hook command could not be started
    #[error("hook command '{command}' failed: {message}")]
    HookFailed {
        /// The command line that was run
        command: String,
        /// Description of the failure
        message: String,
    },

    /// A worker thread could not be started
    #[error("failed to spawn {name} thread: {message}")]
    ThreadSpawn {
        /// Name of the thread
        name: &'static str,
        /// Description of the failure
        message: String,
    },

    /// The session has already been stopped
    #[error("session stopped")]
    Stopped,
}

impl SyncError {
    /// Check if this error is recoverable (the session can continue)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Sink(_) | Self::Decode(_) | Self::HookFailed { .. }
        )
    }

    /// Check if this error belongs to the fatal configuration class
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::LatencyExceedsCapacity { .. } | Self::ConfigParse(_)
        )
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Result type alias for synchronisation operations
pub type Result<T> = std::result::Result<T, SyncError>;
