//! State persistence service for the kasse.
//!
//! This module provides the `LedgerPersistence` service, which bundles the repositories
//! for ledger state, the operation journal and the sync cursor. The file-backed variant
//! keeps everything in one data directory; the in-memory variant is used by tests and by
//! callers that keep several "process lifetimes" in one run.

use crate::ledger::error::PersistenceError;
use crate::ledger::repositories::{
    FileJournalRepository, FileLedgerStateRepository, InMemoryJournalRepository,
    InMemoryLedgerStateRepository, JournalRepository, LedgerState, LedgerStateRepository,
};
use crate::sync::cursor::{CursorRepository, FileCursorRepository, InMemoryCursorRepository};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Service for managing state persistence operations.
///
/// Cloning is cheap; clones share the same repositories.
#[derive(Clone)]
pub struct LedgerPersistence {
    data_dir: Option<PathBuf>,
    state_repo: Arc<dyn LedgerStateRepository>,
    journal_repo: Arc<dyn JournalRepository>,
    cursor_repo: Arc<dyn CursorRepository>,
}

impl LedgerPersistence {
    /// Create a file-backed persistence service for the given data directory.
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            state_repo: Arc::new(FileLedgerStateRepository::new(data_dir.clone())),
            journal_repo: Arc::new(FileJournalRepository::new(data_dir.clone())),
            cursor_repo: Arc::new(FileCursorRepository::new(data_dir.clone())),
            data_dir: Some(data_dir),
        }
    }

    /// Create a persistence service that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            state_repo: Arc::new(InMemoryLedgerStateRepository::new()),
            journal_repo: Arc::new(InMemoryJournalRepository::new()),
            cursor_repo: Arc::new(InMemoryCursorRepository::new()),
        }
    }

    /// Create a persistence service from explicit repositories.
    pub fn from_repositories(
        state_repo: Arc<dyn LedgerStateRepository>,
        journal_repo: Arc<dyn JournalRepository>,
        cursor_repo: Arc<dyn CursorRepository>,
    ) -> Self {
        Self {
            data_dir: None,
            state_repo,
            journal_repo,
            cursor_repo,
        }
    }

    /// Creates the data directory if this service is file-backed.
    pub async fn prepare(&self) -> Result<(), PersistenceError> {
        if let Some(dir) = &self.data_dir {
            tokio::fs::create_dir_all(dir).await?;
            info!("Using data directory {:?}", dir);
        }
        Ok(())
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub async fn save_state(&self, state: &LedgerState) -> Result<(), PersistenceError> {
        self.state_repo.save(state).await
    }

    pub async fn load_state(&self) -> Result<Option<LedgerState>, PersistenceError> {
        self.state_repo.load().await
    }

    pub fn journal(&self) -> Arc<dyn JournalRepository> {
        self.journal_repo.clone()
    }

    pub fn cursor(&self) -> Arc<dyn CursorRepository> {
        self.cursor_repo.clone()
    }
}
