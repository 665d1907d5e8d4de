//! External hook commands

use std::process::Command;
use std::thread;

use crate::error::{Result, SyncError};

/// Runs configured hook commands
pub trait HookRunner: Send + Sync {
    /// Run `command`, waiting for it to exit when `blocking` is set.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::HookFailed` if the command cannot be started.
    fn run(&self, command: &str, blocking: bool) -> Result<()>;
}

/// Spawns hooks as child processes without a shell
///
/// The command line is split on whitespace; the first word is the program.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandHookRunner;

impl HookRunner for CommandHookRunner {
    fn run(&self, command: &str, blocking: bool) -> Result<()> {
        let mut words = command.split_whitespace();
        let Some(program) = words.next() else {
            return Err(SyncError::HookFailed {
                command: command.to_string(),
                message: "empty command".into(),
            });
        };
        let mut child = Command::new(program)
            .args(words)
            .spawn()
            .map_err(|e| SyncError::HookFailed {
                command: command.to_string(),
                message: e.to_string(),
            })?;
        tracing::debug!(command, blocking, pid = child.id(), "Hook started");

        if blocking {
            match child.wait() {
                Ok(status) if !status.success() => {
                    tracing::warn!(command, %status, "Hook exited unsuccessfully");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(command, error = %e, "Waiting for hook failed"),
            }
        } else {
            // Reap in the background so the child does not linger as a zombie.
            let command = command.to_string();
            let reaper = thread::Builder::new()
                .name("hook-reaper".into())
                .spawn(move || {
                    if let Ok(status) = child.wait() {
                        if !status.success() {
                            tracing::debug!(command, %status, "Hook exited unsuccessfully");
                        }
                    }
                });
            if let Err(e) = reaper {
                tracing::debug!(error = %e, "Could not spawn hook reaper thread");
            }
        }
        Ok(())
    }
}

/// Run an optional hook, logging instead of failing.
pub(crate) fn run_configured(
    runner: &dyn HookRunner,
    command: Option<&str>,
    extra_args: &str,
    blocking: bool,
) {
    let Some(command) = command else {
        return;
    };
    let line = if extra_args.is_empty() {
        command.to_string()
    } else {
        format!("{command} {extra_args}")
    };
    if let Err(e) = runner.run(&line, blocking) {
        tracing::warn!(error = %e, "Hook could not be run");
    }
}
