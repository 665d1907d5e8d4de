//! Configuration types

mod config;

pub use config::{HookConfig, PlayerConfig, PlayerConfigBuilder, ResendConfig, VolumeConfig};
