//! # Environment Variable Loader
//!
//! Loads configuration from `MONGOD_*` environment variables. Unset variables
//! keep their default; set but malformed variables are a configuration error.
//!
//! This is the only place in the workspace that reads the process
//! environment for fixture settings.

use crate::config::{AddressingMode, MongodConfig, ReplicationMode, StorageEngine};
use errors::MongodError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Load configuration from environment variables.
///
/// ## Environment Variables
/// - `MONGOD_ROOT_DIR`: base directory for binary cache and sockets (default: ".")
/// - `MONGOD_VERSION`: server version (default: "5.0.26")
/// - `MONGOD_DISTRIBUTION`: Linux distribution in the download URL (default: "ubuntu2004")
/// - `MONGOD_DOWNLOAD_URL`: full archive URL override
/// - `MONGOD_BINARY`: existing mongod binary, skips downloading
/// - `MONGOD_ADDRESSING`: `tcp` or `socket` (default: tcp)
/// - `MONGOD_AS_REPLICA_SET`: run as single-node replica set (default: true)
/// - `MONGOD_REPLICA_SET_NAME`: replica set name (default: "rs0")
/// - `MONGOD_STORAGE_ENGINE`: `ephemeralForTest`, `inMemory` or `wiredTiger`
/// - `MONGOD_BIND_HOST`: TCP bind host (default: "127.0.0.1")
/// - `MONGOD_WORKSPACE_PARENT`: parent of per-instance data directories
/// - `MONGOD_SERVER_SELECTION_TIMEOUT_MS` (default: 3000)
/// - `MONGOD_STARTUP_TIMEOUT_SECS` (default: 30)
/// - `MONGOD_SHUTDOWN_GRACE_MS` (default: 5000)
/// - `MONGOD_WRITE_CONCERN_TIMEOUT_MS` (default: 2000)
pub fn load_from_env() -> errors::Result<MongodConfig> {
    let mut config = MongodConfig::default();

    if let Ok(dir) = env::var("MONGOD_ROOT_DIR") {
        config.root_dir = PathBuf::from(dir);
    }
    if let Ok(version) = env::var("MONGOD_VERSION") {
        config.version = version;
    }
    if let Ok(distribution) = env::var("MONGOD_DISTRIBUTION") {
        config.distribution = distribution;
    }
    config.download_url = env::var("MONGOD_DOWNLOAD_URL").ok();
    config.binary_path = env::var("MONGOD_BINARY").ok().map(PathBuf::from);
    config.workspace_parent = env::var("MONGOD_WORKSPACE_PARENT").ok().map(PathBuf::from);

    if let Some(mode) = parse_env::<AddressingMode>("MONGOD_ADDRESSING")? {
        config.addressing = mode;
    }
    if let Some(flag) = parse_bool_env("MONGOD_AS_REPLICA_SET")? {
        config.replication = ReplicationMode::from_flag(flag);
    }
    if let Ok(name) = env::var("MONGOD_REPLICA_SET_NAME") {
        config.replica_set_name = name;
    }
    if let Some(engine) = parse_env::<StorageEngine>("MONGOD_STORAGE_ENGINE")? {
        config.storage_engine = engine;
    }
    if let Ok(host) = env::var("MONGOD_BIND_HOST") {
        config.bind_host = host;
    }
    if let Some(ms) = parse_env("MONGOD_SERVER_SELECTION_TIMEOUT_MS")? {
        config.server_selection_timeout_ms = ms;
    }
    if let Some(secs) = parse_env("MONGOD_STARTUP_TIMEOUT_SECS")? {
        config.startup_timeout_secs = secs;
    }
    if let Some(ms) = parse_env("MONGOD_SHUTDOWN_GRACE_MS")? {
        config.shutdown_grace_ms = ms;
    }
    if let Some(ms) = parse_env("MONGOD_WRITE_CONCERN_TIMEOUT_MS")? {
        config.default_write_concern_timeout_ms = ms;
    }

    tracing::debug!(
        addressing = %config.addressing,
        replication = %config.replication,
        version = %config.version,
        "Loaded mongod configuration from environment"
    );

    config.validated()
}

fn parse_env<T>(key: &str) -> errors::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| MongodError::Configuration {
                message: format!("{key}: {e}")
            }),
        Err(_) => Ok(None)
    }
}

fn parse_bool_env(key: &str) -> errors::Result<Option<bool>> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
            other => Err(MongodError::Configuration {
                message: format!("{key}: expected a boolean, got {other}")
            })
        },
        Err(_) => Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "MONGOD_ROOT_DIR",
        "MONGOD_VERSION",
        "MONGOD_DISTRIBUTION",
        "MONGOD_DOWNLOAD_URL",
        "MONGOD_BINARY",
        "MONGOD_WORKSPACE_PARENT",
        "MONGOD_ADDRESSING",
        "MONGOD_AS_REPLICA_SET",
        "MONGOD_REPLICA_SET_NAME",
        "MONGOD_STORAGE_ENGINE",
        "MONGOD_BIND_HOST",
        "MONGOD_SERVER_SELECTION_TIMEOUT_MS",
        "MONGOD_STARTUP_TIMEOUT_SECS",
        "MONGOD_SHUTDOWN_GRACE_MS",
        "MONGOD_WRITE_CONCERN_TIMEOUT_MS",
    ];

    fn clear_env() {
        for key in KEYS {
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_load_from_env_defaults() {
        clear_env();
        let config = load_from_env().unwrap();
        assert_eq!(config, MongodConfig::default());
    }

    #[test]
    #[serial]
    fn test_load_from_env_overrides() {
        clear_env();
        unsafe {
            env::set_var("MONGOD_ROOT_DIR", "/srv/project");
            env::set_var("MONGOD_ADDRESSING", "socket");
            env::set_var("MONGOD_AS_REPLICA_SET", "false");
            env::set_var("MONGOD_STORAGE_ENGINE", "wiredTiger");
            env::set_var("MONGOD_SERVER_SELECTION_TIMEOUT_MS", "1500");
            env::set_var("MONGOD_BINARY", "/usr/bin/mongod");
        }

        let config = load_from_env().unwrap();
        clear_env();

        assert_eq!(config.root_dir, PathBuf::from("/srv/project"));
        assert_eq!(config.addressing, AddressingMode::Socket);
        assert_eq!(config.replication, ReplicationMode::Standalone);
        assert_eq!(config.storage_engine, StorageEngine::WiredTiger);
        assert_eq!(config.server_selection_timeout_ms, 1500);
        assert_eq!(config.binary_path, Some(PathBuf::from("/usr/bin/mongod")));
    }

    #[test]
    #[serial]
    fn test_load_from_env_rejects_malformed_number() {
        clear_env();
        unsafe {
            env::set_var("MONGOD_SERVER_SELECTION_TIMEOUT_MS", "soon");
        }

        let result = load_from_env();
        clear_env();

        assert!(matches!(result, Err(MongodError::Configuration { .. })));
    }

    #[test]
    #[serial]
    fn test_load_from_env_rejects_malformed_flag() {
        clear_env();
        unsafe {
            env::set_var("MONGOD_AS_REPLICA_SET", "maybe");
        }

        let result = load_from_env();
        clear_env();

        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_env_rejects_socket_replica_set() {
        clear_env();
        unsafe {
            env::set_var("MONGOD_ADDRESSING", "socket");
        }

        let result = load_from_env();
        clear_env();

        assert!(matches!(result, Err(MongodError::Configuration { .. })));
    }
}
