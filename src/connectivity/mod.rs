//! Connectivity detection.
//!
//! The host environment reports raw transport online/offline signals, which are not proof
//! that the remote store is reachable. The `ConnectivityMonitor` debounces those signals,
//! confirms an online transition with a liveness probe, and only then asks for a sync.

/// Connectivity states, transport signals and sync requests
pub mod events;
/// The debouncing, probe-confirmed state machine
pub mod monitor;

pub use events::*;
pub use monitor::{ConnectivityConfig, ConnectivityMonitor};
