//! A running server process together with the resources allocated for it.

use crate::endpoint::Endpoint;
use crate::workspace::Workspace;
use errors::{MongodError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Child;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;

/// Lifecycle of a [`ServerInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Process spawned, endpoint not yet reachable.
    Starting,
    /// Endpoint accepts connections.
    AcceptingConnections,
    /// Single-member replica set initiated and defaults applied.
    ReplicaSetInitialized,
    /// Client handle confirmed, instance handed to the caller.
    Ready,
    /// Released by the teardown coordinator.
    Terminated
}

/// The server process plus its endpoint and workspace.
///
/// Exclusively owned by the caller that provisioned it. Release it through
/// [`TeardownCoordinator::release`](crate::teardown::TeardownCoordinator::release);
/// dropping an unreleased instance falls back to killing the process and
/// removing its files synchronously.
#[derive(Debug)]
pub struct ServerInstance {
    pub(crate) child: Option<Child>,
    pid: Option<u32>,
    endpoint: Endpoint,
    pub(crate) workspace: Option<Workspace>,
    workspace_path: PathBuf,
    replica_set: Option<String>,
    state: InstanceState
}

impl ServerInstance {
    pub(crate) fn new(
        child: Child,
        endpoint: Endpoint,
        workspace: Workspace,
        replica_set: Option<String>
    ) -> Self {
        Self {
            pid: child.id(),
            child: Some(child),
            endpoint,
            workspace_path: workspace.path().to_path_buf(),
            workspace: Some(workspace),
            replica_set,
            state: InstanceState::Starting
        }
    }

    /// OS process id captured at launch.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    /// Replica-set name, `None` for standalone instances.
    pub fn replica_set(&self) -> Option<&str> {
        self.replica_set.as_deref()
    }

    pub fn is_replica_set(&self) -> bool {
        self.replica_set.is_some()
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: InstanceState) {
        tracing::trace!(endpoint = %self.endpoint, from = ?self.state, to = ?state, "Instance state change");
        self.state = state;
    }

    /// Whether the process has exited on its own.
    pub fn has_exited(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => true
        }
    }

    /// Waits until the endpoint accepts connections.
    ///
    /// Polls with a raw connect under exponential backoff, bounded by
    /// `timeout`. Fails early with [`MongodError::UnexpectedExit`] if the
    /// process exits while we wait.
    pub async fn wait_for_ready(&mut self, timeout: Duration) -> Result<()> {
        enum Outcome {
            Accepting,
            TimedOut,
            Exited(Option<i32>),
            WaitFailed(std::io::Error)
        }

        let endpoint = self.endpoint.clone();
        let start = std::time::Instant::now();
        let Some(child) = self.child.as_mut() else {
            return Err(MongodError::UnexpectedExit { status: None });
        };

        tracing::debug!(
            endpoint = %endpoint,
            timeout_secs = timeout.as_secs(),
            "Waiting for mongod to accept connections"
        );

        let readiness = tokio::time::timeout(
            timeout,
            Retry::spawn(readiness_backoff(), || connect_endpoint(&endpoint))
        );

        let outcome = tokio::select! {
            result = readiness => match result {
                Ok(Ok(())) => Outcome::Accepting,
                Ok(Err(_)) | Err(_) => Outcome::TimedOut
            },
            status = child.wait() => match status {
                Ok(status) => Outcome::Exited(status.code()),
                Err(e) => Outcome::WaitFailed(e)
            }
        };

        match outcome {
            Outcome::Accepting => {
                tracing::debug!(
                    endpoint = %endpoint,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "mongod is accepting connections"
                );
                self.set_state(InstanceState::AcceptingConnections);
                Ok(())
            }
            Outcome::TimedOut => Err(MongodError::StartupTimeout {
                endpoint: endpoint.to_string(),
                timeout_secs: timeout.as_secs()
            }),
            Outcome::Exited(status) => {
                tracing::error!(endpoint = %endpoint, status = ?status, "mongod exited during startup");
                Err(MongodError::UnexpectedExit { status })
            }
            Outcome::WaitFailed(e) => Err(MongodError::LaunchFailed {
                binary: "mongod".to_string(),
                reason: e.to_string()
            })
        }
    }
}

impl Drop for ServerInstance {
    fn drop(&mut self) {
        if self.state == InstanceState::Terminated {
            return;
        }

        tracing::warn!(
            endpoint = %self.endpoint,
            pid = ?self.pid,
            "mongod instance dropped without release, cleaning up"
        );
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
        if let Some(path) = self.endpoint.socket_path() {
            let _ = std::fs::remove_file(path);
        }
        // The workspace guard removes the data directory when it drops.
    }
}

/// 50ms, 100ms, 200ms, 400ms, then every 500ms.
fn readiness_backoff() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(25)
        .max_delay(Duration::from_millis(500))
}

async fn connect_endpoint(endpoint: &Endpoint) -> std::io::Result<()> {
    match endpoint {
        Endpoint::Tcp { host, port } => {
            tokio::net::TcpStream::connect((host.as_str(), *port)).await?;
        }
        #[cfg(unix)]
        Endpoint::Socket { path } => {
            tokio::net::UnixStream::connect(path).await?;
        }
        #[cfg(not(unix))]
        Endpoint::Socket { .. } => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform"
            ));
        }
    }
    Ok(())
}
