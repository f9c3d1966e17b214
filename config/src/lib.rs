//! # Configuration System
//!
//! Configuration for ephemeral mongod fixtures.
//!
//! This crate provides:
//! - [`MongodConfig`] and the addressing/replication/storage enums
//! - Environment variable loading (`MONGOD_*`)
//! - Configuration file loading (TOML/YAML)
//! - Validation through the `validator` crate
//!
//! The lifecycle crate never reads the process environment itself. Callers
//! load a configuration here, at the edge, and pass it in explicitly.

pub mod config;
pub mod file_loader;
pub mod loader;

pub use config::{
    AddressingMode, MongodConfig, MongodConfigBuilder, ReplicationMode, StorageEngine,
};
pub use file_loader::{ConfigFileError, load_from_file, load_from_toml, load_from_yaml};
pub use loader::load_from_env;
pub use validator::Validate;
