//! Shared test fixtures for the mongod fixture workspace.
//!
//! Every call to [`mongod`] starts a fresh, isolated instance:
//! - Binary cached under `<workspace root>/.mongod`
//! - Single-member replica set `rs0` unless `MONGOD_AS_REPLICA_SET=false`
//! - Data kept in a throwaway directory removed on release
//!
//! Fixtures return `None` when the binary cannot be provisioned or spawned on
//! this host so tests can skip instead of fail. A server that starts and then
//! dies fails the test.

mod fixtures;

pub use fixtures::*;
