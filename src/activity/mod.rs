//! Player activity monitor
//!
//! Tracks whether the player has been active recently and runs the
//! active-start and active-stop hooks on the transitions
//! `Idle -> Active` and `TimingOut -> Idle`. A short gap in activity only
//! moves the monitor to `TimingOut`; the stop hook runs once the configured
//! timeout has passed without the player going active again.

mod hooks;

pub use hooks::{CommandHookRunner, HookRunner};
pub(crate) use hooks::run_configured;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Result, SyncError};
use crate::types::HookConfig;

/// Activity state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    /// No recent activity
    Idle,
    /// The player is active
    Active,
    /// The player stopped; waiting out the timeout
    TimingOut,
}

#[derive(Debug)]
struct MonitorState {
    state: ActivityState,
    player_active: bool,
    deadline: Option<Instant>,
}

struct Inner {
    state: Mutex<MonitorState>,
    wake: Condvar,
    hooks: Arc<dyn HookRunner>,
    config: HookConfig,
    cancel: CancellationToken,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn going_active(&self, blocking: bool) {
        tracing::info!("Player going active");
        run_configured(
            self.hooks.as_ref(),
            self.config.on_active_start.as_deref(),
            "",
            blocking,
        );
    }

    fn going_inactive(&self, blocking: bool) {
        tracing::info!("Player going inactive");
        run_configured(
            self.hooks.as_ref(),
            self.config.on_active_stop.as_deref(),
            "",
            blocking,
        );
    }

    fn run(&self) {
        tracing::debug!("Activity monitor started");
        let mut guard = self.lock();
        while !self.cancel.is_cancelled() {
            let timeout = match (guard.state, guard.deadline) {
                (ActivityState::TimingOut, Some(deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        guard.state = ActivityState::Idle;
                        guard.deadline = None;
                        drop(guard);
                        self.going_inactive(false);
                        guard = self.lock();
                        continue;
                    }
                    deadline - now
                }
                _ => Duration::from_secs(1),
            };
            guard = self
                .wake
                .wait_timeout(guard, timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        tracing::debug!("Activity monitor finished");
    }
}

/// Activity state machine with its own timing thread
pub struct ActivityMonitor {
    inner: Arc<Inner>,
    handle: Option<JoinHandle<()>>,
}

impl ActivityMonitor {
    /// Start the monitor in the `Idle` state.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::ThreadSpawn` if the timing thread cannot be started.
    pub fn start(config: HookConfig, hooks: Arc<dyn HookRunner>) -> Result<Self> {
        let inner = Arc::new(Inner {
            state: Mutex::new(MonitorState {
                state: ActivityState::Idle,
                player_active: false,
                deadline: None,
            }),
            wake: Condvar::new(),
            hooks,
            config,
            cancel: CancellationToken::new(),
        });
        let thread_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("activity-monitor".into())
            .spawn(move || thread_inner.run())
            .map_err(|e| SyncError::ThreadSpawn {
                name: "activity-monitor",
                message: e.to_string(),
            })?;
        Ok(Self {
            inner,
            handle: Some(handle),
        })
    }

    /// Report whether the player is currently active.
    ///
    /// Runs the active-start hook when leaving `Idle`, and the active-stop hook
    /// immediately when the timeout is zero. Hooks run on the caller's thread
    /// without the monitor lock held.
    pub fn signal_activity(&self, active: bool) {
        enum Fire {
            Nothing,
            GoingActive,
            GoingInactive,
        }

        let timeout = self.inner.config.active_timeout();
        let fire = {
            let mut guard = self.inner.lock();
            guard.player_active = active;
            let fire = match (guard.state, active) {
                (ActivityState::Idle, true) => {
                    guard.state = ActivityState::Active;
                    Fire::GoingActive
                }
                (ActivityState::TimingOut, true) => {
                    tracing::debug!("Player active again before the timeout");
                    guard.state = ActivityState::Active;
                    guard.deadline = None;
                    Fire::Nothing
                }
                (ActivityState::Active, false) if timeout.is_zero() => {
                    guard.state = ActivityState::Idle;
                    Fire::GoingInactive
                }
                (ActivityState::Active, false) => {
                    tracing::debug!(timeout_ms = timeout.as_millis(), "Player stopped, timing out");
                    guard.state = ActivityState::TimingOut;
                    guard.deadline = Some(Instant::now() + timeout);
                    Fire::Nothing
                }
                _ => Fire::Nothing,
            };
            self.inner.wake.notify_all();
            fire
        };

        let blocking = self.inner.config.wait_for_completion;
        match fire {
            Fire::GoingActive => self.inner.going_active(blocking),
            Fire::GoingInactive => self.inner.going_inactive(blocking),
            Fire::Nothing => {}
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ActivityState {
        self.inner.lock().state
    }

    /// Whether the last signal said the player is active
    #[must_use]
    pub fn player_active(&self) -> bool {
        self.inner.lock().player_active
    }
}

impl Drop for ActivityMonitor {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
        {
            let _guard = self.inner.lock();
            self.inner.wake.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Activity monitor thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for ActivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityMonitor")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
