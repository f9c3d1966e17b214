//! Per-instance data directories.

use config::MongodConfig;
use errors::{MongodError, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Prefix of every workspace directory name.
pub const WORKSPACE_PREFIX: &str = "mongod-";

/// Data directory owned by exactly one server instance.
///
/// Dropping a workspace removes the directory, so an instance that is never
/// released still does not leak its data.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the directory and everything under it.
    pub fn remove(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Creates fresh, empty, uniquely named workspaces.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceAllocator {
    parent: Option<PathBuf>
}

impl WorkspaceAllocator {
    /// Allocates under `parent`, or the system temp dir when `None`.
    pub fn new(parent: Option<PathBuf>) -> Self {
        Self { parent }
    }

    pub fn from_config(config: &MongodConfig) -> Self {
        Self::new(config.workspace_parent.clone())
    }

    pub fn allocate(&self) -> Result<Workspace> {
        let failed = |e: std::io::Error| MongodError::WorkspaceAllocation {
            reason: e.to_string()
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);

        let dir = match &self.parent {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(failed)?;
                builder.tempdir_in(parent).map_err(failed)?
            }
            None => builder.tempdir().map_err(failed)?
        };

        tracing::debug!(workspace = %dir.path().display(), "Allocated workspace");
        Ok(Workspace { dir })
    }
}
