//! Synchronization of the local operation log with the remote store.
//!
//! - `reconciler`: drains pending operations in log order and records the remote's decisions.
//! - `cursor`: the durable position of the last decided operation.
//! - `events`: event types and handlers notified during a run.
//! - `progress_tracker`: per-run counters and summaries.
//! - `scheduler`: background task turning sync requests into reconcile runs.
//!
//! The local log is authoritative for what the cashier intended, the remote store is
//! authoritative for whether it was accepted.

/// Durable reconciliation cursor
pub mod cursor;
/// Event system for observers of a sync run
pub mod events;
/// Tracks per-run progress and statistics
pub mod progress_tracker;
/// Drains the operation log against the remote store
pub mod reconciler;
/// Background task triggering reconcile runs
pub mod scheduler;

pub use cursor::{CursorRepository, FileCursorRepository, InMemoryCursorRepository, SyncCursor};
pub use events::{EventDispatcher, SyncEvent, SyncEventHandler};
pub use progress_tracker::{SyncProgressTracker, SyncStats};
pub use reconciler::{
    ReconcilerConfig, ShutdownHandle, SyncOutcome, SyncReconciler, SyncReport,
};
pub use scheduler::SyncScheduler;

use crate::ledger::{LedgerError, LogError, PersistenceError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Operation log error: {0}")]
    Log(#[from] LogError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Event handler error: {0}")]
    HandlerError(String),
}
