//! # Mongod Manager
//!
//! Composes the lifecycle stages into one entry point:
//!
//! ```text
//! binary → endpoint + workspace → launch → ready → bootstrap → client → body → release
//! ```
//!
//! Any setup failure after launch releases the half-built instance before the
//! error is returned.

use crate::binary::{ArchiveFetcher, BinaryHandle, BinaryProvider};
use crate::bootstrap::{AdminConnection, ClusterBootstrapper};
use crate::client::{ClientFactory, ClientHandle};
use crate::endpoint::{Endpoint, EndpointAllocator};
use crate::instance::{InstanceState, ServerInstance};
use crate::process::{self, LaunchOptions};
use crate::teardown::{TeardownCoordinator, TeardownReport};
use crate::workspace::WorkspaceAllocator;
use config::MongodConfig;
use errors::{MongodError, Result};
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// An instance that finished setup, plus its client.
#[derive(Debug)]
pub struct RunningMongod {
    instance: ServerInstance,
    client: ClientHandle
}

impl RunningMongod {
    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    pub fn instance(&self) -> &ServerInstance {
        &self.instance
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.instance.endpoint()
    }

    pub fn connection_string(&self) -> String {
        self.client.connection_string()
    }
}

/// Provisions and releases ephemeral `mongod` instances.
pub struct MongodManager {
    config: MongodConfig,
    provider: BinaryProvider,
    endpoints: EndpointAllocator,
    workspaces: WorkspaceAllocator,
    launch: LaunchOptions,
    bootstrapper: ClusterBootstrapper,
    clients: ClientFactory,
    teardown: TeardownCoordinator
}

impl MongodManager {
    pub fn new(config: MongodConfig) -> Result<Self> {
        let config = config.validated()?;
        Ok(Self {
            provider: BinaryProvider::from_config(&config),
            endpoints: EndpointAllocator::from_config(&config),
            workspaces: WorkspaceAllocator::from_config(&config),
            launch: LaunchOptions::from_config(&config),
            bootstrapper: ClusterBootstrapper::from_config(&config),
            clients: ClientFactory::from_config(&config),
            teardown: TeardownCoordinator::from_config(&config),
            config
        })
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        self.provider = self.provider.with_fetcher(fetcher);
        self
    }

    pub fn config(&self) -> &MongodConfig {
        &self.config
    }

    /// The configured binary, or the cached download.
    pub async fn binary(&self) -> Result<BinaryHandle> {
        let Some(path) = &self.config.binary_path else {
            return self.provider.ensure().await;
        };

        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => Ok(BinaryHandle::new(path)),
            Ok(_) => Err(MongodError::BinaryUnavailable {
                path: path.display().to_string(),
                reason: "not a file".to_string()
            }),
            Err(e) => Err(MongodError::BinaryUnavailable {
                path: path.display().to_string(),
                reason: e.to_string()
            })
        }
    }

    /// Starts a new instance and returns once a client can reach it.
    pub async fn provision(&self) -> Result<RunningMongod> {
        let binary = self.binary().await?;
        let endpoint = self.endpoints.allocate().await?;
        let workspace = self.workspaces.allocate()?;

        let mut instance = process::launch(&binary, endpoint, workspace, &self.launch).await?;

        match self.prepare(&mut instance).await {
            Ok(client) => {
                tracing::info!(
                    endpoint = %instance.endpoint(),
                    pid = ?instance.pid(),
                    workspace = %instance.workspace_path().display(),
                    "mongod ready"
                );
                Ok(RunningMongod { instance, client })
            }
            Err(e) => {
                tracing::error!(endpoint = %instance.endpoint(), error = %e, "mongod setup failed, releasing");
                self.teardown.release(instance).await;
                Err(e)
            }
        }
    }

    async fn prepare(&self, instance: &mut ServerInstance) -> Result<ClientHandle> {
        instance.wait_for_ready(self.config.startup_timeout()).await?;

        if self.bootstrapper.is_enabled() {
            let admin = AdminConnection::open(instance.endpoint(), self.config.server_selection_timeout())?;
            let result = self.bootstrapper.bootstrap(instance.endpoint(), &admin).await;
            admin.close().await;
            result?;
            instance.set_state(InstanceState::ReplicaSetInitialized);
        }

        let client = self
            .clients
            .connect(instance.endpoint(), instance.replica_set())
            .await?;
        instance.set_state(InstanceState::Ready);
        Ok(client)
    }

    /// Tears the instance down. Never fails; see [`TeardownReport`].
    pub async fn release(&self, running: RunningMongod) -> TeardownReport {
        let RunningMongod { instance, client } = running;
        drop(client);
        self.teardown.release(instance).await
    }

    /// Runs `body` against a fresh instance and releases it afterwards.
    ///
    /// The instance is released whether `body` returns or panics; a panic is
    /// resumed once cleanup has finished.
    pub async fn scoped<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(ClientHandle) -> Fut,
        Fut: Future<Output = T>
    {
        let running = self.provision().await?;
        let outcome = AssertUnwindSafe(body(running.client().clone()))
            .catch_unwind()
            .await;

        self.release(running).await;

        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic)
        }
    }
}
