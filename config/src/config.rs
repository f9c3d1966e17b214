//! # Configuration Structures
//!
//! Everything the lifecycle manager needs to know about one kind of fixture
//! instance: where the binary lives, how the server is addressed, whether it
//! runs as a single-node replica set, and the timeouts applied around it.
//!
//! All structures:
//! - Use `serde` for serialization/deserialization
//! - Use `validator` for input validation
//! - Default to the values the fixtures use when nothing is configured

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

/// Directory under `root_dir` holding downloaded binaries.
pub const BINARY_CACHE_DIR: &str = ".mongod";

/// Directory under `root_dir` holding socket files in socket mode.
pub const SOCKETS_DIR: &str = ".mongod-sockets";

/// How a server instance is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AddressingMode {
    /// Loopback TCP port assigned by the OS.
    #[default]
    Tcp,
    /// Unix domain socket file under the shared sockets directory.
    Socket
}

impl std::fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Socket => f.write_str("socket")
        }
    }
}

impl FromStr for AddressingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "socket" | "unix" => Ok(Self::Socket),
            other => Err(format!("unknown addressing mode: {other}"))
        }
    }
}

/// Replication topology of a server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Plain standalone server, no replica-set commands are issued.
    Standalone,
    /// Replica set with exactly one member.
    #[default]
    SingleNodeReplicaSet
}

impl ReplicationMode {
    /// Maps the legacy "as replica set" toggle onto a mode.
    pub fn from_flag(as_replica_set: bool) -> Self {
        if as_replica_set {
            Self::SingleNodeReplicaSet
        } else {
            Self::Standalone
        }
    }
}

impl std::fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standalone => f.write_str("standalone"),
            Self::SingleNodeReplicaSet => f.write_str("single_node_replica_set")
        }
    }
}

impl FromStr for ReplicationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standalone" => Ok(Self::Standalone),
            "single_node_replica_set" | "replica_set" | "rs" => Ok(Self::SingleNodeReplicaSet),
            other => Err(format!("unknown replication mode: {other}"))
        }
    }
}

/// Storage engine passed to `--storageEngine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageEngine {
    /// Non-durable test engine shipped with community builds.
    #[default]
    EphemeralForTest,
    /// Enterprise in-memory engine.
    InMemory,
    /// Default durable engine.
    WiredTiger
}

impl StorageEngine {
    /// Value of the `--storageEngine` argument.
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::EphemeralForTest => "ephemeralForTest",
            Self::InMemory => "inMemory",
            Self::WiredTiger => "wiredTiger"
        }
    }
}

impl std::fmt::Display for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_arg())
    }
}

impl FromStr for StorageEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "ephemeralfortest" => Ok(Self::EphemeralForTest),
            "inmemory" => Ok(Self::InMemory),
            "wiredtiger" => Ok(Self::WiredTiger),
            other => Err(format!("unknown storage engine: {other}"))
        }
    }
}

/// Configuration of ephemeral mongod instances.
///
/// ## Fields
/// - `root_dir`: base directory for the binary cache and the sockets directory
/// - `version`: server version to download
/// - `distribution`: Linux distribution component of the download URL
/// - `download_url`: full archive URL, overrides URL resolution
/// - `binary_path`: existing binary to use instead of downloading
/// - `addressing`/`replication`/`storage_engine`: instance shape
/// - timeouts in milliseconds or seconds as named
///
/// Socket addressing only supports standalone servers: a replica set member
/// must be reachable at a TCP `host:port`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[validate(schema(function = "validate_topology"))]
pub struct MongodConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    #[serde(default = "default_version")]
    #[validate(length(min = 1))]
    pub version: String,

    #[serde(default = "default_distribution")]
    #[validate(length(min = 1))]
    pub distribution: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_download_url"))]
    pub download_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,

    #[serde(default)]
    pub addressing: AddressingMode,

    #[serde(default)]
    pub replication: ReplicationMode,

    #[serde(default = "default_replica_set_name")]
    #[validate(length(min = 1))]
    pub replica_set_name: String,

    #[serde(default)]
    pub storage_engine: StorageEngine,

    #[serde(default = "default_bind_host")]
    #[validate(length(min = 1))]
    pub bind_host: String,

    /// Parent of per-instance data directories, system temp dir when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_parent: Option<PathBuf>,

    #[serde(default = "default_server_selection_timeout_ms")]
    #[validate(range(min = 1))]
    pub server_selection_timeout_ms: u64,

    #[serde(default = "default_startup_timeout_secs")]
    #[validate(range(min = 1))]
    pub startup_timeout_secs: u64,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default = "default_write_concern_timeout_ms")]
    #[validate(range(min = 1))]
    pub default_write_concern_timeout_ms: u64
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_version() -> String {
    "5.0.26".to_string()
}

fn default_distribution() -> String {
    "ubuntu2004".to_string()
}

fn default_replica_set_name() -> String {
    "rs0".to_string()
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_selection_timeout_ms() -> u64 {
    3000
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

fn default_write_concern_timeout_ms() -> u64 {
    2000
}

fn validate_download_url(value: &str) -> Result<(), validator::ValidationError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(validator::ValidationError::new(
            "download_url must be an http(s) URL"
        ))
    }
}

fn validate_topology(config: &MongodConfig) -> Result<(), validator::ValidationError> {
    if config.addressing == AddressingMode::Socket
        && config.replication == ReplicationMode::SingleNodeReplicaSet
    {
        let mut error = validator::ValidationError::new("socket_replica_set");
        error.message = Some("socket addressing requires standalone replication".into());
        return Err(error);
    }
    Ok(())
}

impl Default for MongodConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            version: default_version(),
            distribution: default_distribution(),
            download_url: None,
            binary_path: None,
            addressing: AddressingMode::default(),
            replication: ReplicationMode::default(),
            replica_set_name: default_replica_set_name(),
            storage_engine: StorageEngine::default(),
            bind_host: default_bind_host(),
            workspace_parent: None,
            server_selection_timeout_ms: default_server_selection_timeout_ms(),
            startup_timeout_secs: default_startup_timeout_secs(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            default_write_concern_timeout_ms: default_write_concern_timeout_ms()
        }
    }
}

impl MongodConfig {
    /// Creates a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> MongodConfigBuilder {
        MongodConfigBuilder::default()
    }

    /// Directory the binary provider downloads into.
    pub fn binary_cache_dir(&self) -> PathBuf {
        self.root_dir.join(BINARY_CACHE_DIR)
    }

    /// Shared directory for socket files.
    pub fn sockets_dir(&self) -> PathBuf {
        self.root_dir.join(SOCKETS_DIR)
    }

    /// Replica-set name when running as a single-node replica set.
    pub fn replica_set(&self) -> Option<&str> {
        match self.replication {
            ReplicationMode::Standalone => None,
            ReplicationMode::SingleNodeReplicaSet => Some(&self.replica_set_name)
        }
    }

    pub fn server_selection_timeout(&self) -> Duration {
        Duration::from_millis(self.server_selection_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Runs validation and converts failures into a configuration error.
    pub fn validated(self) -> errors::Result<Self> {
        self.validate()
            .map_err(|e| errors::MongodError::Configuration {
                message: e.to_string()
            })?;
        Ok(self)
    }
}

/// Builder for call-site overrides of [`MongodConfig`].
#[derive(Debug, Clone, Default)]
pub struct MongodConfigBuilder {
    config: MongodConfig
}

impl MongodConfigBuilder {
    /// Starts from an existing configuration, e.g. one loaded from env.
    #[must_use]
    pub fn from_config(config: MongodConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.root_dir = dir.into();
        self
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    #[must_use]
    pub fn distribution(mut self, distribution: impl Into<String>) -> Self {
        self.config.distribution = distribution.into();
        self
    }

    #[must_use]
    pub fn download_url(mut self, url: impl Into<String>) -> Self {
        self.config.download_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.binary_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn addressing(mut self, mode: AddressingMode) -> Self {
        self.config.addressing = mode;
        self
    }

    #[must_use]
    pub fn replication(mut self, mode: ReplicationMode) -> Self {
        self.config.replication = mode;
        self
    }

    #[must_use]
    pub fn replica_set_name(mut self, name: impl Into<String>) -> Self {
        self.config.replica_set_name = name.into();
        self
    }

    #[must_use]
    pub fn storage_engine(mut self, engine: StorageEngine) -> Self {
        self.config.storage_engine = engine;
        self
    }

    #[must_use]
    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.config.bind_host = host.into();
        self
    }

    #[must_use]
    pub fn workspace_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.workspace_parent = Some(dir.into());
        self
    }

    #[must_use]
    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.config.server_selection_timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.config.startup_timeout_secs = timeout.as_millis().div_ceil(1000) as u64;
        self
    }

    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> errors::Result<MongodConfig> {
        self.config.validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = MongodConfig::default();
        assert_eq!(config.version, "5.0.26");
        assert_eq!(config.addressing, AddressingMode::Tcp);
        assert_eq!(config.replication, ReplicationMode::SingleNodeReplicaSet);
        assert_eq!(config.replica_set(), Some("rs0"));
        assert_eq!(config.storage_engine, StorageEngine::EphemeralForTest);
        assert_eq!(config.server_selection_timeout(), Duration::from_millis(3000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_standalone_has_no_replica_set() {
        let config = MongodConfig::builder()
            .replication(ReplicationMode::Standalone)
            .build()
            .unwrap();
        assert_eq!(config.replica_set(), None);
    }

    #[test]
    fn test_layout_dirs() {
        let config = MongodConfig::builder().root_dir("/work").build().unwrap();
        assert_eq!(config.binary_cache_dir(), PathBuf::from("/work/.mongod"));
        assert_eq!(config.sockets_dir(), PathBuf::from("/work/.mongod-sockets"));
    }

    #[test]
    fn test_builder_rejects_zero_selection_timeout() {
        let result = MongodConfig::builder()
            .server_selection_timeout(Duration::ZERO)
            .build();
        assert!(matches!(
            result,
            Err(errors::MongodError::Configuration { .. })
        ));
    }

    #[test]
    fn test_builder_rejects_non_http_download_url() {
        let result = MongodConfig::builder()
            .download_url("ftp://example.com/mongodb.tgz")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_storage_engine_parsing() {
        assert_eq!(
            "ephemeralForTest".parse::<StorageEngine>().unwrap(),
            StorageEngine::EphemeralForTest
        );
        assert_eq!(
            "in-memory".parse::<StorageEngine>().unwrap(),
            StorageEngine::InMemory
        );
        assert_eq!(StorageEngine::WiredTiger.as_arg(), "wiredTiger");
        assert!("mmapv1".parse::<StorageEngine>().is_err());
    }

    #[test]
    fn test_replication_from_flag() {
        assert_eq!(
            ReplicationMode::from_flag(true),
            ReplicationMode::SingleNodeReplicaSet
        );
        assert_eq!(ReplicationMode::from_flag(false), ReplicationMode::Standalone);
    }

    #[test]
    fn test_addressing_parsing() {
        assert_eq!("TCP".parse::<AddressingMode>().unwrap(), AddressingMode::Tcp);
        assert_eq!(
            "unix".parse::<AddressingMode>().unwrap(),
            AddressingMode::Socket
        );
    }

    #[test]
    fn test_builder_rejects_socket_replica_set() {
        let result = MongodConfig::builder()
            .addressing(AddressingMode::Socket)
            .build();
        assert!(matches!(
            result,
            Err(errors::MongodError::Configuration { ref message }) if message.contains("standalone")
        ));
    }

    #[test]
    fn test_builder_accepts_socket_standalone() {
        let config = MongodConfig::builder()
            .addressing(AddressingMode::Socket)
            .replication(ReplicationMode::Standalone)
            .build()
            .unwrap();
        assert_eq!(config.replica_set(), None);
    }

    #[test]
    fn test_builder_rounds_sub_second_startup_timeout_up() {
        let config = MongodConfig::builder()
            .startup_timeout(Duration::from_millis(300))
            .build()
            .unwrap();
        assert_eq!(config.startup_timeout(), Duration::from_secs(1));

        let config = MongodConfig::builder()
            .startup_timeout(Duration::from_millis(2500))
            .build()
            .unwrap();
        assert_eq!(config.startup_timeout_secs, 3);
    }

    #[test]
    fn test_builder_rejects_zero_startup_timeout() {
        let result = MongodConfig::builder()
            .startup_timeout(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }
}
