//! Remote store boundary.
//!
//! The core only ever talks to a `RemoteStore`. Without a configured remote the kasse
//! uses `DisabledRemoteStore` and runs in local-only mode, which is a supported
//! operating mode rather than a degraded one.

/// HTTP client for a remote ledger service
mod http;
/// Authoritative in-memory remote used for tests and local simulation
mod memory;
/// The `RemoteStore` trait and the disabled stub
mod store;
/// Wire and outcome types
mod types;

pub use http::HttpRemoteStore;
pub use memory::{Fault, InMemoryRemoteStore};
pub use store::{DisabledRemoteStore, RemoteStore, from_config};
pub use types::*;
