//! Teardown coordinator.
//!
//! Releases everything a [`ServerInstance`] holds. Each step runs regardless of
//! how the previous one went, a target that is already gone counts as success,
//! and failures are logged instead of returned.

use crate::instance::{InstanceState, ServerInstance};
use crate::workspace::Workspace;
use config::MongodConfig;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tokio::process::Child;

/// Result of one teardown step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// The target no longer existed.
    AlreadyGone,
    /// The grace period elapsed and the process was killed.
    Killed,
    /// Nothing to do for this instance.
    Skipped,
    Failed(String)
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Per-step outcome of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub terminate: StepOutcome,
    pub wait: StepOutcome,
    pub workspace: StepOutcome,
    pub endpoint: StepOutcome
}

impl TeardownReport {
    /// No step failed.
    pub fn is_clean(&self) -> bool {
        !(self.terminate.is_failure()
            || self.wait.is_failure()
            || self.workspace.is_failure()
            || self.endpoint.is_failure())
    }
}

#[derive(Debug, Clone)]
pub struct TeardownCoordinator {
    grace: Duration
}

impl Default for TeardownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl TeardownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn from_config(config: &MongodConfig) -> Self {
        Self::new(config.shutdown_grace())
    }

    /// Stops the process and removes the workspace and socket file.
    pub async fn release(&self, mut instance: ServerInstance) -> TeardownReport {
        let endpoint = instance.endpoint().clone();
        tracing::debug!(endpoint = %endpoint, pid = ?instance.pid(), "Releasing mongod instance");

        let (terminate, wait) = match instance.child.take() {
            Some(mut child) => match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(endpoint = %endpoint, status = ?status.code(), "mongod already exited");
                    (StepOutcome::AlreadyGone, StepOutcome::AlreadyGone)
                }
                _ => {
                    let terminate = terminate(&mut child);
                    let wait = self.wait_or_kill(&mut child).await;
                    (terminate, wait)
                }
            },
            None => (StepOutcome::AlreadyGone, StepOutcome::AlreadyGone)
        };

        let workspace = match instance.workspace.take() {
            Some(workspace) => remove_workspace(workspace).await,
            None => StepOutcome::Skipped
        };

        let endpoint_outcome = match endpoint.socket_path() {
            Some(path) => remove_socket(path).await,
            None => StepOutcome::Skipped
        };

        instance.set_state(InstanceState::Terminated);

        let report = TeardownReport {
            terminate,
            wait,
            workspace,
            endpoint: endpoint_outcome
        };
        if report.is_clean() {
            tracing::info!(endpoint = %endpoint, "mongod released");
        } else {
            tracing::warn!(endpoint = %endpoint, report = ?report, "mongod released with errors");
        }
        report
    }

    async fn wait_or_kill(&self, child: &mut Child) -> StepOutcome {
        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(_)) => StepOutcome::Done,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to wait for mongod exit");
                StepOutcome::Failed(e.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    grace_ms = self.grace.as_millis() as u64,
                    "mongod did not exit within grace period, killing"
                );
                match child.kill().await {
                    Ok(()) => StepOutcome::Killed,
                    Err(e) if e.kind() == ErrorKind::InvalidInput => StepOutcome::AlreadyGone,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to kill mongod");
                        StepOutcome::Failed(e.to_string())
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> StepOutcome {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return StepOutcome::AlreadyGone;
    };

    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => StepOutcome::Done,
        Err(Errno::ESRCH) => StepOutcome::AlreadyGone,
        Err(e) => {
            tracing::warn!(pid, error = %e, "Failed to signal mongod");
            StepOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> StepOutcome {
    match child.start_kill() {
        Ok(()) => StepOutcome::Done,
        Err(e) if e.kind() == ErrorKind::InvalidInput => StepOutcome::AlreadyGone,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to terminate mongod");
            StepOutcome::Failed(e.to_string())
        }
    }
}

async fn remove_workspace(workspace: Workspace) -> StepOutcome {
    let path = workspace.path().to_path_buf();
    match tokio::task::spawn_blocking(move || workspace.remove()).await {
        Ok(Ok(())) => StepOutcome::Done,
        Ok(Err(e)) if e.kind() == ErrorKind::NotFound => StepOutcome::AlreadyGone,
        Ok(Err(e)) => {
            tracing::warn!(workspace = %path.display(), error = %e, "Failed to remove workspace");
            StepOutcome::Failed(e.to_string())
        }
        Err(e) => {
            tracing::warn!(workspace = %path.display(), error = %e, "Workspace removal task failed");
            StepOutcome::Failed(e.to_string())
        }
    }
}

async fn remove_socket(path: &Path) -> StepOutcome {
    match tokio::fs::remove_file(path).await {
        Ok(()) => StepOutcome::Done,
        Err(e) if e.kind() == ErrorKind::NotFound => StepOutcome::AlreadyGone,
        Err(e) => {
            tracing::warn!(socket = %path.display(), error = %e, "Failed to remove socket file");
            StepOutcome::Failed(e.to_string())
        }
    }
}
