//! # Configuration File Loading
//!
//! Loads [`MongodConfig`] from TOML or YAML files.
//!
//! Supports automatic format detection based on file extension. Missing keys
//! fall back to their defaults, so a file only needs the settings it changes.

use crate::config::MongodConfig;
use std::path::Path;
use validator::Validate;

/// Configuration file loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(String),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(String),

    #[error("Config file has no extension")]
    NoExtension,

    #[error("Unsupported config file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigFileError> for errors::MongodError {
    fn from(err: ConfigFileError) -> Self {
        errors::MongodError::Configuration {
            message: err.to_string(),
        }
    }
}

/// Load configuration from a TOML file.
///
/// ```rust,no_run
/// use config::load_from_toml;
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_toml(Path::new("mongod.toml"))?;
///     println!("mongod version: {}", config.version);
///     Ok(())
/// }
/// ```
pub fn load_from_toml(path: &Path) -> Result<MongodConfig, ConfigFileError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_e| ConfigFileError::FileNotFound(path.display().to_string()))?;

    let config: MongodConfig =
        toml::from_str(&contents).map_err(|e| ConfigFileError::TomlParse(e.to_string()))?;

    validate(config)
}

/// Load configuration from a YAML file.
pub fn load_from_yaml(path: &Path) -> Result<MongodConfig, ConfigFileError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_e| ConfigFileError::FileNotFound(path.display().to_string()))?;

    let config: MongodConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigFileError::YamlParse(e.to_string()))?;

    validate(config)
}

/// Load configuration from file, detecting the format from its extension.
///
/// ## Supported Formats
/// - `.toml`: TOML format
/// - `.yaml`: YAML format
/// - `.yml`: YAML format
pub fn load_from_file(path: &Path) -> Result<MongodConfig, ConfigFileError> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or(ConfigFileError::NoExtension)?;

    match extension.to_lowercase().as_str() {
        "toml" => load_from_toml(path),
        "yaml" | "yml" => load_from_yaml(path),
        other => Err(ConfigFileError::UnsupportedFormat(other.to_string())),
    }
}

fn validate(config: MongodConfig) -> Result<MongodConfig, ConfigFileError> {
    config
        .validate()
        .map_err(|e| ConfigFileError::Invalid(e.to_string()))?;
    Ok(config)
}
