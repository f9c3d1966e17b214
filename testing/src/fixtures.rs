use config::MongodConfig;
use errors::{ErrorKind, MongodError};
use lifecycle::{ClientHandle, MongodManager, RunningMongod, TeardownReport};
use mongodb::Client;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::sync::atomic::{AtomicU32, Ordering};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);
static TRACING: Once = Once::new();

/// Databases owned by the server itself.
const SYSTEM_DATABASES: [&str; 3] = ["admin", "config", "local"];

pub fn unique_id(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}", prefix, id)
}

pub fn unique_database() -> String {
    unique_id("test_db").replace('-', "_")
}

/// Installs a test-writer subscriber filtered by `RUST_LOG`. Safe to call
/// from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Root of this cargo workspace.
pub fn workspace_root() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest
        .parent()
        .unwrap_or(manifest)
        .to_path_buf()
}

/// Configuration from `MONGOD_*` variables, rooted at the workspace root
/// unless `MONGOD_ROOT_DIR` says otherwise.
pub fn mongod_config() -> errors::Result<MongodConfig> {
    let mut config = config::load_from_env()?;
    if config.root_dir == Path::new(".") {
        config.root_dir = workspace_root();
    }
    Ok(config)
}

/// Whether `err` means no server can run on this host, so a test may skip.
///
/// Only a binary that cannot be provisioned or spawned counts. A server that
/// starts and then exits or never accepts connections is a real failure.
pub fn is_unavailable(err: &MongodError) -> bool {
    err.kind() == ErrorKind::Provisioning || matches!(err, MongodError::LaunchFailed { .. })
}

/// A provisioned instance owned by one test.
pub struct MongodFixture {
    manager: MongodManager,
    running: RunningMongod
}

impl MongodFixture {
    pub fn client(&self) -> &ClientHandle {
        self.running.client()
    }

    pub fn connection_string(&self) -> String {
        self.running.connection_string()
    }

    pub fn running(&self) -> &RunningMongod {
        &self.running
    }

    pub fn config(&self) -> &MongodConfig {
        self.manager.config()
    }

    pub async fn release(self) -> TeardownReport {
        self.manager.release(self.running).await
    }
}

/// Fresh instance configured from the environment.
pub async fn mongod() -> Option<MongodFixture> {
    match mongod_config() {
        Ok(config) => mongod_with(config).await,
        Err(e) => {
            tracing::warn!("Invalid mongod configuration: {}", e);
            None
        }
    }
}

/// Fresh instance with an explicit configuration.
///
/// Returns `None` when the binary cannot be provisioned or spawned. Other
/// setup failures panic, they indicate a broken fixture rather than a
/// missing server.
pub async fn mongod_with(config: MongodConfig) -> Option<MongodFixture> {
    init_tracing();

    let manager = match MongodManager::new(config) {
        Ok(manager) => manager,
        Err(e) => {
            tracing::warn!("Invalid mongod configuration: {}", e);
            return None;
        }
    };

    match manager.provision().await {
        Ok(running) => {
            tracing::info!("mongod fixture started at {}", running.endpoint());
            Some(MongodFixture { manager, running })
        }
        Err(e) if is_unavailable(&e) => {
            tracing::warn!("mongod unavailable: {:?}", e);
            None
        }
        Err(e) => panic!("mongod fixture setup failed: {e}")
    }
}

/// Drops every collection in every non-system database.
pub async fn drop_user_databases(client: &Client) -> mongodb::error::Result<()> {
    for name in client.list_database_names().await? {
        if SYSTEM_DATABASES.contains(&name.as_str()) {
            continue;
        }

        let database = client.database(&name);
        for collection in database.list_collection_names().await? {
            tracing::debug!(database = %name, collection = %collection, "Dropping collection");
            database
                .collection::<mongodb::bson::Document>(&collection)
                .drop()
                .await?;
        }
    }
    Ok(())
}
