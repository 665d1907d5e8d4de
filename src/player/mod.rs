//! Jitter buffer, clock bridge and synchronised playback
//!
//! Producers insert decoded packets through a [`PlayerHandle`]; a single
//! playback thread releases them to the sink at the instant the clock
//! mapping says they are due, correcting for drift as it goes.

pub mod clock;
pub mod corrector;
pub mod engine;
pub mod resend;
pub mod ring;
pub mod scheduler;
pub mod seq;
pub mod session;
pub mod stats;


pub use clock::{ClockBridge, ClockMapping, TimingReference};
pub use corrector::{Correction, DriftCorrector};
pub use engine::PlaybackEngine;
pub use resend::{ResendPolicy, ResendRequester};
pub use ring::{Fetched, FrameRing, Head, PutOutcome};
pub use scheduler::{FlushRequest, PlaybackScheduler, Step};
pub use session::{Player, PlayerHandle, SessionContext};
pub use stats::{PlaybackStats, PlayerCounters, StatisticsWindow};
