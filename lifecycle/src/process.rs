//! Server process controller.
//!
//! Spawns `mongod` with a fixed argument set pointed at the allocated endpoint
//! and workspace. Launching returns as soon as the process exists; use
//! [`ServerInstance::wait_for_ready`] before issuing commands.
//!
//! ```text
//! mongod --port <port> --bind_ip <host>                         (tcp)
//! mongod --bind_ip <socket> --unixSocketPrefix <workspace>      (socket)
//!        --storageEngine <engine> --dbpath <workspace>
//!        --logpath /dev/null --quiet [--replSet <name>]
//! ```
//!
//! | Flag                 | Purpose                                                 |
//! |----------------------|---------------------------------------------------------|
//! | `--port`/`--bind_ip` | Listen on the allocated TCP endpoint or socket path     |
//! | `--unixSocketPrefix` | Keep the server's auxiliary socket inside the workspace |
//! | `--storageEngine`    | Non-durable engine, test data never needs to survive    |
//! | `--dbpath`           | Workspace directory owned by this instance              |
//! | `--logpath`          | Discard the server log                                  |
//! | `--replSet`          | Only for single-node replica sets                       |

use crate::binary::BinaryHandle;
use crate::endpoint::Endpoint;
use crate::instance::ServerInstance;
use crate::workspace::Workspace;
use config::{MongodConfig, StorageEngine};
use errors::{MongodError, Result};
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

/// Launch-time settings derived from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub storage_engine: StorageEngine,
    pub replica_set: Option<String>
}

impl LaunchOptions {
    pub fn from_config(config: &MongodConfig) -> Self {
        Self {
            storage_engine: config.storage_engine,
            replica_set: config.replica_set().map(str::to_string)
        }
    }
}

/// Command-line arguments for one instance.
pub fn server_args(endpoint: &Endpoint, dbpath: &Path, options: &LaunchOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();

    match endpoint {
        Endpoint::Tcp { host, port } => {
            args.push("--port".into());
            args.push(port.to_string().into());
            args.push("--bind_ip".into());
            args.push(host.into());
        }
        Endpoint::Socket { path } => {
            args.push("--bind_ip".into());
            args.push(path.into());
            args.push("--unixSocketPrefix".into());
            args.push(dbpath.into());
        }
    }

    args.push("--storageEngine".into());
    args.push(options.storage_engine.as_arg().into());
    args.push("--dbpath".into());
    args.push(dbpath.into());
    args.push("--logpath".into());
    args.push(NULL_DEVICE.into());
    args.push("--quiet".into());

    if let Some(name) = &options.replica_set {
        args.push("--replSet".into());
        args.push(name.into());
    }

    args
}

/// Spawns `mongod` for the given endpoint and workspace.
///
/// Does not wait for the server to accept connections. Output the server
/// writes before its log is redirected is forwarded to tracing under the
/// `mongod` target.
pub async fn launch(
    binary: &BinaryHandle,
    endpoint: Endpoint,
    workspace: Workspace,
    options: &LaunchOptions
) -> Result<ServerInstance> {
    let launch_failed = |reason: String| MongodError::LaunchFailed {
        binary: binary.path().display().to_string(),
        reason
    };

    let metadata = tokio::fs::metadata(binary.path())
        .await
        .map_err(|e| launch_failed(e.to_string()))?;
    if !metadata.is_file() {
        return Err(launch_failed("not a file".to_string()));
    }

    let args = server_args(&endpoint, workspace.path(), options);

    tracing::info!(
        binary = %binary.path().display(),
        endpoint = %endpoint,
        workspace = %workspace.path().display(),
        storage_engine = %options.storage_engine,
        replica_set = ?options.replica_set,
        "Starting mongod"
    );

    let mut child = Command::new(binary.path())
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| launch_failed(e.to_string()))?;

    // Forwarding tasks end on their own at EOF when the child exits.
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "mongod", "{}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(target: "mongod", "{}", line);
            }
        });
    }

    tracing::debug!(pid = ?child.id(), endpoint = %endpoint, "mongod spawned");
    Ok(ServerInstance::new(
        child,
        endpoint,
        workspace,
        options.replica_set.clone()
    ))
}
