//! Test doubles for driving the engine deterministically

mod clock;
mod mock_sink;
mod network_sim;
mod recorders;

pub use clock::ManualClock;
pub use mock_sink::MockSink;
pub use network_sim::NetworkSimulator;
pub use recorders::{RecordingHooks, RecordingResender};
