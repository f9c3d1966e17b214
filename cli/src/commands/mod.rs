pub mod fetch;
pub mod run;
pub mod show_config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::MongodConfig;
use std::path::Path;

#[derive(Parser)]
#[command(
    name = "mongod-fixture",
    author,
    version,
    about = "Ephemeral mongod instances for tests",
    long_about = "Downloads a mongod binary into a local cache and runs throwaway instances \
                  backed by a non-durable storage engine.\n\nSettings come from --config or \
                  MONGOD_* environment variables."
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "MONGOD_CONFIG",
        help = "Configuration file (.toml, .yaml or .yml)"
    )]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Download the mongod binary if missing and print its path")]
    Fetch(fetch::FetchArgs),

    #[command(about = "Start an instance and keep it running until Ctrl-C")]
    Run(run::RunArgs),

    #[command(about = "Print the effective configuration")]
    Config(show_config::ConfigArgs)
}

/// Configuration from `path`, or from the environment when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<MongodConfig> {
    match path {
        Some(path) => config::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => config::load_from_env().context("Invalid MONGOD_* environment")
    }
}
