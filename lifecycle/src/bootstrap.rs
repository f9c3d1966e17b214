//! Cluster bootstrapper.
//!
//! Turns a freshly started `mongod --replSet <name>` into a writable
//! single-member replica set and installs baseline read/write concern
//! defaults. Standalone instances skip all of it.
//!
//! ```text
//! replSetInitiate      { _id: <name>, members: [{ _id: 0, host: <endpoint> }] }
//! replSetGetConfig     must echo <name>
//! hello                polled until isWritablePrimary
//! setDefaultRWConcern  { w: 1, wtimeout } / { level: "local" }
//! ```

use crate::endpoint::Endpoint;
use async_trait::async_trait;
use config::MongodConfig;
use errors::{MongodError, Result};
use mongodb::bson::{Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, error::ErrorKind};
use std::time::Duration;
use tokio_retry::strategy::{ExponentialBackoff, FixedInterval};
use tokio_retry::RetryIf;

/// Attempts for the first administrative command while the server settles.
const INITIATE_ATTEMPTS: usize = 10;

/// Interval between `hello` polls while waiting for a primary.
const PRIMARY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs commands against the `admin` database of one server.
#[async_trait]
pub trait AdminCommands: Send + Sync {
    async fn run_admin(&self, command: Document) -> Result<Document>;
}

/// Short-lived direct connection used for administrative commands.
pub struct AdminConnection {
    client: Client,
    endpoint: Endpoint
}

impl AdminConnection {
    /// Builds a direct-connection client. No I/O happens until the first
    /// command.
    pub fn open(endpoint: &Endpoint, server_selection_timeout: Duration) -> Result<Self> {
        let mut options = ClientOptions::default();
        options.hosts = vec![endpoint.server_address()?];
        options.direct_connection = Some(true);
        options.server_selection_timeout = Some(server_selection_timeout);
        options.app_name = Some(format!("{}-admin", crate::client::APP_NAME));

        let client = Client::with_options(options).map_err(|e| MongodError::Connectivity {
            endpoint: endpoint.to_string(),
            reason: e.to_string()
        })?;

        Ok(Self {
            client,
            endpoint: endpoint.clone()
        })
    }

    pub async fn close(self) {
        self.client.shutdown().await;
    }
}

#[async_trait]
impl AdminCommands for AdminConnection {
    async fn run_admin(&self, command: Document) -> Result<Document> {
        let name = command
            .keys()
            .next()
            .cloned()
            .unwrap_or_default();

        self.client
            .database("admin")
            .run_command(command)
            .await
            .map_err(|e| classify(&self.endpoint, &name, &e))
    }
}

/// Splits driver failures into connectivity problems (worth retrying) and
/// command failures.
pub(crate) fn classify(endpoint: &Endpoint, command: &str, err: &mongodb::error::Error) -> MongodError {
    match *err.kind {
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. } => {
            MongodError::Connectivity {
                endpoint: endpoint.to_string(),
                reason: err.to_string()
            }
        }
        _ => MongodError::BootstrapFailed {
            command: command.to_string(),
            reason: err.to_string()
        }
    }
}

/// Configures a single-member replica set on a running server.
#[derive(Debug, Clone)]
pub struct ClusterBootstrapper {
    replica_set: Option<String>,
    write_concern_timeout_ms: u64,
    ready_timeout: Duration
}

impl ClusterBootstrapper {
    pub fn new(replica_set: Option<String>) -> Self {
        Self {
            replica_set,
            write_concern_timeout_ms: 2000,
            ready_timeout: Duration::from_secs(30)
        }
    }

    pub fn from_config(config: &MongodConfig) -> Self {
        Self {
            replica_set: config.replica_set().map(str::to_string),
            write_concern_timeout_ms: config.default_write_concern_timeout_ms,
            ready_timeout: config.startup_timeout()
        }
    }

    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.replica_set.is_some()
    }

    /// Initiates the replica set and applies default concerns.
    ///
    /// Does nothing for standalone servers. Socket endpoints cannot host a
    /// replica set member and are rejected before any command is sent.
    /// Connection failures are retried; any other command failure aborts the
    /// bootstrap.
    pub async fn bootstrap(&self, endpoint: &Endpoint, admin: &dyn AdminCommands) -> Result<()> {
        let Some(name) = self.replica_set.as_deref() else {
            tracing::debug!(endpoint = %endpoint, "Standalone mode, skipping replica set bootstrap");
            return Ok(());
        };
        if let Some(path) = endpoint.socket_path() {
            return Err(MongodError::BootstrapFailed {
                command: "replSetInitiate".to_string(),
                reason: format!("replica set member needs a TCP host, got socket {}", path.display())
            });
        }

        tracing::info!(endpoint = %endpoint, replica_set = name, "Initiating replica set");

        let initiate = doc! {
            "replSetInitiate": {
                "_id": name,
                "members": [{ "_id": 0, "host": endpoint.to_string() }]
            }
        };
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(25)
            .max_delay(Duration::from_millis(500))
            .take(INITIATE_ATTEMPTS);
        RetryIf::spawn(
            strategy,
            || admin.run_admin(initiate.clone()),
            |e: &MongodError| {
                if e.is_transient() {
                    tracing::debug!(endpoint = %endpoint, error = %e, "replSetInitiate not reachable yet, retrying");
                }
                e.is_transient()
            }
        )
        .await?;

        let reply = admin.run_admin(doc! { "replSetGetConfig": 1 }).await?;
        let echoed = reply
            .get_document("config")
            .and_then(|config| config.get_str("_id"))
            .map_err(|e| MongodError::BootstrapFailed {
                command: "replSetGetConfig".to_string(),
                reason: format!("malformed reply: {e}")
            })?;
        if echoed != name {
            return Err(MongodError::BootstrapFailed {
                command: "replSetGetConfig".to_string(),
                reason: format!("expected replica set {name}, server reports {echoed}")
            });
        }

        self.wait_for_primary(endpoint, admin).await?;

        admin
            .run_admin(doc! {
                "setDefaultRWConcern": 1,
                "defaultWriteConcern": {
                    "w": 1,
                    "wtimeout": self.write_concern_timeout_ms as i64
                },
                "defaultReadConcern": { "level": "local" },
                "writeConcern": { "w": 1 }
            })
            .await?;

        tracing::info!(endpoint = %endpoint, replica_set = name, "Replica set ready");
        Ok(())
    }

    async fn wait_for_primary(&self, endpoint: &Endpoint, admin: &dyn AdminCommands) -> Result<()> {
        tracing::debug!(endpoint = %endpoint, "Waiting for writable primary");
        let poll = RetryIf::spawn(
            FixedInterval::new(PRIMARY_POLL_INTERVAL),
            || async move {
                let reply = admin
                    .run_admin(doc! { "hello": 1 })
                    .await
                    .map_err(PrimaryPoll::Failed)?;
                if reply.get_bool("isWritablePrimary").unwrap_or(false) {
                    Ok(())
                } else {
                    Err(PrimaryPoll::NotPrimary)
                }
            },
            |outcome: &PrimaryPoll| match outcome {
                PrimaryPoll::NotPrimary => true,
                PrimaryPoll::Failed(e) => {
                    if e.is_transient() {
                        tracing::debug!(endpoint = %endpoint, error = %e, "hello not reachable yet, retrying");
                    }
                    e.is_transient()
                }
            }
        );

        match tokio::time::timeout(self.ready_timeout, poll).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(PrimaryPoll::Failed(e))) => Err(e),
            Ok(Err(PrimaryPoll::NotPrimary)) | Err(_) => Err(MongodError::BootstrapFailed {
                command: "hello".to_string(),
                reason: format!(
                    "no writable primary after {}s",
                    self.ready_timeout.as_secs()
                )
            })
        }
    }
}

/// Result of a `hello` poll that found no writable primary.
enum PrimaryPoll {
    NotPrimary,
    Failed(MongodError)
}

/// Bootstraps `endpoint` over a fresh admin connection, then closes it.
pub async fn bootstrap(endpoint: &Endpoint, config: &MongodConfig) -> Result<()> {
    let bootstrapper = ClusterBootstrapper::from_config(config);
    if !bootstrapper.is_enabled() {
        return Ok(());
    }

    let admin = AdminConnection::open(endpoint, config.server_selection_timeout())?;
    let result = bootstrapper.bootstrap(endpoint, &admin).await;
    admin.close().await;
    result
}
