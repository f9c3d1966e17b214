//! Fixture behaviour when the server binary starts but cannot run.
//!
//! Kept in its own test binary: the script is written and executed in the
//! same process, and no other test here forks concurrently.

#![cfg(unix)]

use config::{MongodConfig, ReplicationMode};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

fn failing_binary(dir: &Path) -> std::path::PathBuf {
    let binary = dir.join("mongod");
    std::fs::write(&binary, "#!/bin/sh\necho \"unrecognised option\" >&2\nexit 2\n").unwrap();
    std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
    binary
}

#[tokio::test]
#[should_panic(expected = "mongod fixture setup failed")]
async fn test_server_exiting_at_startup_fails_instead_of_skipping() {
    let dir = tempfile::TempDir::new().unwrap();
    let binary = failing_binary(dir.path());
    let config = MongodConfig::builder()
        .root_dir(dir.path())
        .binary_path(&binary)
        .workspace_parent(dir.path().join("workspaces"))
        .replication(ReplicationMode::Standalone)
        .build()
        .unwrap();

    let _ = testing::mongod_with(config).await;
}

#[tokio::test]
async fn test_missing_binary_skips() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = MongodConfig::builder()
        .root_dir(dir.path())
        .binary_path(dir.path().join("missing"))
        .replication(ReplicationMode::Standalone)
        .build()
        .unwrap();

    assert!(testing::mongod_with(config).await.is_none());
}
