use crate::ledger::error::PersistenceError;
use crate::ledger::repositories::write_atomically;
use crate::ledger::types::OperationId;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Last operation the remote store has decided on (accepted or rejected).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
	pub last_confirmed: Option<OperationId>,
	#[serde(default)]
	pub updated_at: Option<DateTime<Utc>>,
}

impl SyncCursor {
	pub fn at(id: OperationId) -> Self {
		Self {
			last_confirmed: Some(id),
			updated_at: Some(Utc::now()),
		}
	}

	/// Sequence number of the last confirmed operation, 0 if none.
	pub fn position(&self) -> u64 {
		self.last_confirmed.as_ref().map(|id| id.seq).unwrap_or(0)
	}

	/// Moves past `id`; never moves backwards.
	pub fn advance(&mut self, id: &OperationId) {
		if id.seq > self.position() {
			self.last_confirmed = Some(id.clone());
			self.updated_at = Some(Utc::now());
		}
	}
}

/// Repository for sync cursor persistence
#[async_trait::async_trait]
pub trait CursorRepository: Send + Sync {
	async fn save(&self, cursor: &SyncCursor) -> Result<(), PersistenceError>;
	async fn load(&self) -> Result<Option<SyncCursor>, PersistenceError>;
}

/// File-based implementation of CursorRepository
pub struct FileCursorRepository {
	data_dir: PathBuf,
}

impl FileCursorRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn cursor_filename(&self) -> PathBuf {
		self.data_dir.join("sync_cursor.json")
	}
}

#[async_trait::async_trait]
impl CursorRepository for FileCursorRepository {
	async fn save(&self, cursor: &SyncCursor) -> Result<(), PersistenceError> {
		let content = serde_json::to_vec_pretty(cursor)?;
		write_atomically(&self.cursor_filename(), &content).await?;
		debug!("Saved sync cursor at position {}", cursor.position());
		Ok(())
	}

	async fn load(&self) -> Result<Option<SyncCursor>, PersistenceError> {
		match tokio::fs::read(self.cursor_filename()).await {
			Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}
}

/// In-memory implementation of CursorRepository
#[derive(Default)]
pub struct InMemoryCursorRepository {
	cursor: Mutex<Option<SyncCursor>>,
}

impl InMemoryCursorRepository {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait::async_trait]
impl CursorRepository for InMemoryCursorRepository {
	async fn save(&self, cursor: &SyncCursor) -> Result<(), PersistenceError> {
		*self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = Some(cursor.clone());
		Ok(())
	}

	async fn load(&self) -> Result<Option<SyncCursor>, PersistenceError> {
		Ok(self
			.cursor
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_cursor_never_moves_backwards() {
		let mut cursor = SyncCursor::default();
		assert_eq!(cursor.position(), 0);
		cursor.advance(&OperationId::new("dev", 4));
		cursor.advance(&OperationId::new("dev", 2));
		assert_eq!(cursor.position(), 4);
	}

	#[tokio::test]
	async fn test_file_cursor_round_trip() {
		let dir = TempDir::new().unwrap();
		let repo = FileCursorRepository::new(dir.path().to_path_buf());
		assert!(repo.load().await.unwrap().is_none());

		let cursor = SyncCursor::at(OperationId::new("dev", 9));
		repo.save(&cursor).await.unwrap();
		assert_eq!(repo.load().await.unwrap(), Some(cursor));
	}
}
