//! # Mongod Lifecycle
//!
//! Ephemeral `mongod` instances for tests: one process per test, each with
//! its own endpoint and data directory, optionally running as a single-member
//! replica set.
//!
//! ```text
//! ┌─────────────────┐   ┌──────────────────────┐   ┌──────────────────┐
//! │ BinaryProvider  │──▶│ EndpointAllocator    │──▶│ process::launch  │
//! │ (.mongod cache) │   │ WorkspaceAllocator   │   │ wait_for_ready   │
//! └─────────────────┘   └──────────────────────┘   └────────┬─────────┘
//!                                                           ▼
//! ┌─────────────────────┐   ┌───────────────┐   ┌──────────────────────┐
//! │ TeardownCoordinator │◀──│ ClientFactory │◀──│ ClusterBootstrapper  │
//! └─────────────────────┘   └───────────────┘   └──────────────────────┘
//! ```
//!
//! [`MongodManager`] wires the stages together:
//!
//! ```no_run
//! # async fn example() -> errors::Result<()> {
//! use lifecycle::MongodManager;
//! use mongodb::bson::doc;
//!
//! let manager = MongodManager::new(config::MongodConfig::default())?;
//! let inserted = manager
//!     .scoped(|client| async move {
//!         let items = client.database("test").collection::<mongodb::bson::Document>("items");
//!         items.insert_one(doc! { "n": 1 }).await
//!     })
//!     .await?;
//! assert!(inserted.is_ok());
//! # Ok(())
//! # }
//! ```

pub mod binary;
pub mod bootstrap;
pub mod client;
pub mod endpoint;
pub mod instance;
pub mod manager;
pub mod process;
pub mod teardown;
pub mod workspace;

pub use binary::{ArchiveFetcher, BinaryHandle, BinaryProvider, BinarySource, HttpFetcher, Platform};
pub use bootstrap::{AdminCommands, AdminConnection, ClusterBootstrapper};
pub use client::{ClientFactory, ClientHandle};
pub use endpoint::{Endpoint, EndpointAllocator};
pub use instance::{InstanceState, ServerInstance};
pub use manager::{MongodManager, RunningMongod};
pub use process::{LaunchOptions, launch};
pub use teardown::{StepOutcome, TeardownCoordinator, TeardownReport};
pub use workspace::{Workspace, WorkspaceAllocator};
