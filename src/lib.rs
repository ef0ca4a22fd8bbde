//! Offline-first ledger synchronization for the Vereins-Kasse.
//!
//! Cashier actions are committed to a local ledger and an append-only operation log
//! first, and reconciled against an optional remote store whenever connectivity is
//! confirmed. The remote store is an injected capability; without one the kasse runs
//! permanently in local-only mode.

/// Cashier-facing intents and conflict acknowledgement
pub mod cashier;
/// File and environment configuration
pub mod config;
/// Online/offline detection with debounce and liveness probing
pub mod connectivity;
/// Member accounts, operation log and their persistence
pub mod ledger;
/// Remote store boundary and its implementations
pub mod remote;
/// Reconciliation of pending operations with the remote store
pub mod sync;
/// Formatting and identifier helpers
pub mod utils;
