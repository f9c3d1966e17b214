//! # Mongod Fixture Errors
//!
//! Error handling for the ephemeral mongod lifecycle.
//!
//! Every setup failure is fatal to the instance being created and is reported
//! through [`MongodError`]. Teardown never produces a `MongodError`: cleanup
//! problems are logged by the teardown coordinator instead.
//!
//! - Uses `thiserror` for structured error definitions
//! - Named fields on every variant
//! - [`ErrorKind`] groups variants into the stages of the lifecycle

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, MongodError>;

/// Lifecycle stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Binary could not be made available locally.
    Provisioning,
    /// Endpoint or workspace could not be created.
    Allocation,
    /// Server process could not be started or never became reachable.
    Launch,
    /// Administrative command failed while bootstrapping the replica set.
    Bootstrap,
    /// Client could not reach the server.
    Connectivity,
    /// Invalid configuration supplied by the caller.
    Configuration
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Provisioning => "provisioning",
            Self::Allocation => "allocation",
            Self::Launch => "launch",
            Self::Bootstrap => "bootstrap",
            Self::Connectivity => "connectivity",
            Self::Configuration => "configuration"
        };
        f.write_str(name)
    }
}

/// Errors raised while creating an ephemeral mongod instance.
#[derive(Debug, Error)]
pub enum MongodError {
    #[error("Download of {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Archive from {url} has no member matching {member}")]
    ArchiveMemberMissing { url: String, member: String },

    #[error("Binary unavailable at {path}: {reason}")]
    BinaryUnavailable { path: String, reason: String },

    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("Endpoint allocation failed: {reason}")]
    EndpointAllocation { reason: String },

    #[error("Socket path {path} is {length} bytes, limit is {max}")]
    SocketPathTooLong {
        path: String,
        length: usize,
        max: usize
    },

    #[error("Workspace allocation failed: {reason}")]
    WorkspaceAllocation { reason: String },

    #[error("Failed to launch {binary}: {reason}")]
    LaunchFailed { binary: String, reason: String },

    #[error("Server at {endpoint} not accepting connections after {timeout_secs}s")]
    StartupTimeout { endpoint: String, timeout_secs: u64 },

    #[error("Server process exited unexpectedly with status {status:?}")]
    UnexpectedExit { status: Option<i32> },

    #[error("Bootstrap command {command} failed: {reason}")]
    BootstrapFailed { command: String, reason: String },

    #[error("Connection to {endpoint} failed: {reason}")]
    Connectivity { endpoint: String, reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String }
}

impl MongodError {
    /// Lifecycle stage this error was raised in.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DownloadFailed { .. }
            | Self::ArchiveMemberMissing { .. }
            | Self::BinaryUnavailable { .. }
            | Self::UnsupportedPlatform { .. } => ErrorKind::Provisioning,
            Self::EndpointAllocation { .. }
            | Self::SocketPathTooLong { .. }
            | Self::WorkspaceAllocation { .. } => ErrorKind::Allocation,
            Self::LaunchFailed { .. } | Self::StartupTimeout { .. } | Self::UnexpectedExit { .. } => {
                ErrorKind::Launch
            }
            Self::BootstrapFailed { .. } => ErrorKind::Bootstrap,
            Self::Connectivity { .. } => ErrorKind::Connectivity,
            Self::Configuration { .. } => ErrorKind::Configuration
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Only connectivity failures qualify; they occur while the server is
    /// still starting up.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_display() {
        let err = MongodError::DownloadFailed {
            url: "https://example.com/mongodb.tgz".to_string(),
            reason: "404 Not Found".to_string()
        };
        assert_eq!(
            err.to_string(),
            "Download of https://example.com/mongodb.tgz failed: 404 Not Found"
        );
        assert_eq!(err.kind(), ErrorKind::Provisioning);
    }

    #[test]
    fn test_kind_classification() {
        let allocation = MongodError::WorkspaceAllocation {
            reason: "No space left on device".to_string()
        };
        assert_eq!(allocation.kind(), ErrorKind::Allocation);

        let launch = MongodError::UnexpectedExit { status: Some(48) };
        assert_eq!(launch.kind(), ErrorKind::Launch);

        let bootstrap = MongodError::BootstrapFailed {
            command: "replSetInitiate".to_string(),
            reason: "already initialized".to_string()
        };
        assert_eq!(bootstrap.kind(), ErrorKind::Bootstrap);
        assert!(!bootstrap.is_transient());
    }

    #[test]
    fn test_connectivity_is_transient() {
        let err = MongodError::Connectivity {
            endpoint: "127.0.0.1:27017".to_string(),
            reason: "connection refused".to_string()
        };
        assert!(err.is_transient());
        assert_eq!(err.kind().to_string(), "connectivity");
    }

    #[test]
    fn test_socket_path_too_long_display() {
        let err = MongodError::SocketPathTooLong {
            path: "/tmp/x.sock".to_string(),
            length: 120,
            max: 103
        };
        assert_eq!(
            err.to_string(),
            "Socket path /tmp/x.sock is 120 bytes, limit is 103"
        );
    }
}
