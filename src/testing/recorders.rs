//! Collaborators that record what they were asked to do

use std::sync::{Mutex, PoisonError};

use crate::activity::HookRunner;
use crate::error::Result;
use crate::player::ResendRequester;

/// Resend requester that keeps every request
#[derive(Debug, Default)]
pub struct RecordingResender {
    requests: Mutex<Vec<(u16, u16)>>,
}

impl RecordingResender {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(seq, count)` requested so far
    #[must_use]
    pub fn requests(&self) -> Vec<(u16, u16)> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `seq` was requested
    #[must_use]
    pub fn count_for(&self, seq: u16) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(s, _)| *s == seq)
            .count()
    }
}

impl ResendRequester for RecordingResender {
    fn request_resend(&self, seq: u16, count: u16) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((seq, count));
    }
}

/// Hook runner that records command lines instead of running them
#[derive(Debug, Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<(String, bool)>>,
}

impl RecordingHooks {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(command, blocking)` run so far
    #[must_use]
    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Command lines only
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|(c, _)| c).collect()
    }
}

impl HookRunner for RecordingHooks {
    fn run(&self, command: &str, blocking: bool) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((command.to_string(), blocking));
        Ok(())
    }
}
