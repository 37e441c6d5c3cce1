//! Game process supervision.

use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::timeout;

use crate::error::{io_err, SessionError};

/// How the child process ended up after a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited on its own or after the terminate request.
    Stopped(ExitStatus),
    /// Exited only after a forced kill.
    ForceKilled(ExitStatus),
    /// Still running (or unobservable) after both grace periods.
    Unresponsive,
}

impl StopOutcome {
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            StopOutcome::Stopped(status) | StopOutcome::ForceKilled(status) => Some(*status),
            StopOutcome::Unresponsive => None,
        }
    }
}

/// The wrapped game, launched with inherited stdio.
#[derive(Debug)]
pub struct GameProcess {
    child: Child,
    program: String,
}

impl GameProcess {
    pub fn spawn(command: &[OsString]) -> Result<Self, SessionError> {
        let (program, args) = command.split_first().ok_or(SessionError::EmptyCommand)?;
        let program_label = program.to_string_lossy().into_owned();
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| SessionError::Spawn {
                program: program_label.clone(),
                source,
            })?;
        tracing::info!(program = %program_label, pid = ?child.id(), "child process started");
        Ok(Self {
            child,
            program: program_label,
        })
    }

    /// Non-blocking liveness check.
    pub fn try_exit(&mut self) -> Result<Option<ExitStatus>, SessionError> {
        self.child.try_wait().map_err(|e| io_err(&self.program, e))
    }

    /// Ask the child to stop, escalating to a kill after `grace`.
    ///
    /// Never fails: every outcome, including a child that survives the kill,
    /// is reported so the caller can go on restoring directories.
    pub async fn terminate(&mut self, grace: Duration, kill_grace: Duration) -> StopOutcome {
        if let Ok(Some(status)) = self.child.try_wait() {
            return StopOutcome::Stopped(status);
        }
        let pid = self.child.id();

        match send_terminate(&mut self.child) {
            Ok(()) => {
                tracing::info!(pid = ?pid, "sent terminate request to child");
                if let Ok(Ok(status)) = timeout(grace, self.child.wait()).await {
                    return StopOutcome::Stopped(status);
                }
                tracing::warn!(pid = ?pid, grace = ?grace, "child ignored terminate request");
            }
            Err(err) => tracing::warn!(pid = ?pid, error = %err, "terminate request failed"),
        }

        if let Err(err) = self.child.start_kill() {
            tracing::warn!(pid = ?pid, error = %err, "kill failed");
        }
        match timeout(kill_grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::warn!(pid = ?pid, "child force-killed");
                StopOutcome::ForceKilled(status)
            }
            _ => {
                let err = SessionError::ChildUnresponsive {
                    pid: pid.unwrap_or_default(),
                };
                tracing::error!(error = %err, "giving up on child process");
                StopOutcome::Unresponsive
            }
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // SAFETY: `pid` belongs to a child we have not yet reaped.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<OsString> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            GameProcess::spawn(&[]),
            Err(SessionError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn missing_program_reports_spawn_error() {
        let err = GameProcess::spawn(&["/nonexistent/cloudsaver-game".into()]).unwrap_err();
        assert!(matches!(err, SessionError::Spawn { .. }));
    }

    #[tokio::test]
    async fn exited_child_is_observed_without_blocking() {
        let mut game = GameProcess::spawn(&sh("exit 3")).unwrap();
        let status = loop {
            if let Some(status) = game.try_exit().unwrap() {
                break status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn terminate_stops_cooperative_child() {
        let mut game = GameProcess::spawn(&sh("sleep 30")).unwrap();
        let outcome = game
            .terminate(Duration::from_secs(5), Duration::from_secs(5))
            .await;
        assert!(matches!(outcome, StopOutcome::Stopped(_)), "got {outcome:?}");
    }

    #[tokio::test]
    async fn terminate_escalates_to_kill() {
        let mut game =
            GameProcess::spawn(&sh("trap '' TERM; while true; do sleep 1; done")).unwrap();
        // Give the shell a moment to install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let outcome = game
            .terminate(Duration::from_millis(300), Duration::from_secs(5))
            .await;
        assert!(matches!(outcome, StopOutcome::ForceKilled(_)), "got {outcome:?}");
    }
}
