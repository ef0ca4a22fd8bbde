use crate::ledger::error::PersistenceError;
use crate::ledger::types::{MemberAccount, Operation, OperationId, Rejection, SyncStatus};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Ledger state that cannot be derived from the operation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
	/// Identifier of this installation, prefix of every operation id
	pub device_id: String,
	/// Highest sequence number whose effect is folded into settled balances
	#[serde(default)]
	pub compacted_through: Option<u64>,
	pub accounts: Vec<MemberAccount>,
}

/// One line of the operation journal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum JournalRecord {
	Appended { operation: Operation },
	Status {
		id: OperationId,
		status: SyncStatus,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		rejection: Option<Rejection>,
	},
	Acknowledged { id: OperationId },
}

/// Repository for ledger state persistence
#[async_trait::async_trait]
pub trait LedgerStateRepository: Send + Sync {
	async fn save(&self, state: &LedgerState) -> Result<(), PersistenceError>;
	async fn load(&self) -> Result<Option<LedgerState>, PersistenceError>;
}

/// Repository for the append-only operation journal
#[async_trait::async_trait]
pub trait JournalRepository: Send + Sync {
	/// Durably appends one record; returns only after the record is on stable storage.
	async fn append(&self, record: &JournalRecord) -> Result<(), PersistenceError>;
	/// Loads the journal folded into the current list of operations, oldest first.
	async fn load(&self) -> Result<Vec<Operation>, PersistenceError>;
	/// Atomically replaces the journal with the given operations.
	async fn rewrite(&self, operations: &[Operation]) -> Result<(), PersistenceError>;
}

/// Folds journal records into operations, applying status records to earlier appends.
pub fn fold_records(records: impl IntoIterator<Item = JournalRecord>) -> Vec<Operation> {
	let mut operations: Vec<Operation> = Vec::new();
	for record in records {
		match record {
			JournalRecord::Appended { operation } => operations.push(operation),
			JournalRecord::Status {
				id,
				status,
				rejection,
			} => match operations.iter_mut().rev().find(|op| op.id() == &id) {
				Some(op) => op.set_status(status, rejection),
				None => warn!("Journal status record for unknown operation {}", id),
			},
			JournalRecord::Acknowledged { id } => {
				match operations.iter_mut().rev().find(|op| op.id() == &id) {
					Some(op) => op.set_acknowledged(),
					None => warn!("Journal acknowledgement for unknown operation {}", id),
				}
			}
		}
	}
	operations
}

/// Writes `bytes` next to `path` and renames it into place so readers never see a torn file.
pub(crate) async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
	let file_name = path
		.file_name()
		.and_then(|f| f.to_str())
		.ok_or_else(|| PersistenceError::Corrupt(format!("Invalid state path {:?}", path)))?;
	let tmp_path = path.with_file_name(format!("{}.tmp", file_name));

	let mut file = tokio::fs::File::create(&tmp_path).await?;
	file.write_all(bytes).await?;
	file.sync_all().await?;
	drop(file);

	tokio::fs::rename(&tmp_path, path).await?;
	Ok(())
}

/// File-based implementation of LedgerStateRepository
pub struct FileLedgerStateRepository {
	data_dir: PathBuf,
}

impl FileLedgerStateRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn state_filename(&self) -> PathBuf {
		self.data_dir.join("ledger_state.json")
	}
}

#[async_trait::async_trait]
impl LedgerStateRepository for FileLedgerStateRepository {
	async fn save(&self, state: &LedgerState) -> Result<(), PersistenceError> {
		let content = serde_json::to_vec_pretty(state)?;
		let filename = self.state_filename();
		write_atomically(&filename, &content).await?;

		info!(
			"Saved ledger state with {} accounts to {:?}",
			state.accounts.len(),
			filename
		);
		Ok(())
	}

	async fn load(&self) -> Result<Option<LedgerState>, PersistenceError> {
		let filename = self.state_filename();
		let content = match tokio::fs::read(&filename).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e.into()),
		};

		let state: LedgerState = serde_json::from_slice(&content)?;
		info!(
			"Loaded ledger state with {} accounts from {:?}",
			state.accounts.len(),
			filename
		);
		Ok(Some(state))
	}
}

/// File-based implementation of JournalRepository using one JSON record per line
pub struct FileJournalRepository {
	data_dir: PathBuf,
	/// Serializes appends and rewrites on this file
	write_lock: tokio::sync::Mutex<()>,
}

impl FileJournalRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self {
			data_dir,
			write_lock: tokio::sync::Mutex::new(()),
		}
	}

	fn journal_filename(&self) -> PathBuf {
		self.data_dir.join("operations.log")
	}

	/// Parses journal content. A final line without its newline is a torn write and dropped.
	///
	/// Only the torn line may be cut inside a multi-byte character; any complete line that
	/// is not valid UTF-8 is corruption.
	fn parse(content: &[u8]) -> Result<(Vec<JournalRecord>, bool), PersistenceError> {
		let mut records = Vec::new();
		let mut torn = false;
		let mut rest = content;
		let mut line_no = 0usize;

		while !rest.is_empty() {
			line_no += 1;
			let Some(pos) = rest.iter().position(|b| *b == b'\n') else {
				warn!(
					"Discarding torn journal record at line {} ({} bytes)",
					line_no,
					rest.len()
				);
				torn = true;
				break;
			};
			let line = &rest[..pos];
			rest = &rest[pos + 1..];

			let line = std::str::from_utf8(line).map_err(|e| {
				PersistenceError::Corrupt(format!("Journal line {} is not UTF-8: {}", line_no, e))
			})?;
			if line.trim().is_empty() {
				continue;
			}

			let record = serde_json::from_str::<JournalRecord>(line).map_err(|e| {
				PersistenceError::Corrupt(format!("Journal line {} is unreadable: {}", line_no, e))
			})?;
			records.push(record);
		}

		Ok((records, torn))
	}

	fn encode(record: &JournalRecord) -> Result<Vec<u8>, PersistenceError> {
		let mut line = serde_json::to_vec(record)?;
		line.push(b'\n');
		Ok(line)
	}
}

#[async_trait::async_trait]
impl JournalRepository for FileJournalRepository {
	async fn append(&self, record: &JournalRecord) -> Result<(), PersistenceError> {
		let line = Self::encode(record)?;
		let _guard = self.write_lock.lock().await;

		let mut file = tokio::fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(self.journal_filename())
			.await?;
		file.write_all(&line).await?;
		file.sync_data().await?;
		Ok(())
	}

	async fn load(&self) -> Result<Vec<Operation>, PersistenceError> {
		let filename = self.journal_filename();
		let bytes = match tokio::fs::read(&filename).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};

		let (records, torn) = Self::parse(&bytes)?;
		let record_count = records.len();
		let operations = fold_records(records);

		if torn {
			// Drop the torn tail so the next append starts on a fresh line.
			self.rewrite(&operations).await?;
		}

		info!(
			"Loaded {} operations ({} journal records) from {:?}",
			operations.len(),
			record_count,
			filename
		);
		Ok(operations)
	}

	async fn rewrite(&self, operations: &[Operation]) -> Result<(), PersistenceError> {
		let mut content = Vec::new();
		for operation in operations {
			content.extend(Self::encode(&JournalRecord::Appended {
				operation: operation.clone(),
			})?);
		}

		let _guard = self.write_lock.lock().await;
		write_atomically(&self.journal_filename(), &content).await?;
		info!("Rewrote journal with {} operations", operations.len());
		Ok(())
	}
}

/// In-memory implementation of LedgerStateRepository
#[derive(Default)]
pub struct InMemoryLedgerStateRepository {
	state: Mutex<Option<LedgerState>>,
}

impl InMemoryLedgerStateRepository {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait::async_trait]
impl LedgerStateRepository for InMemoryLedgerStateRepository {
	async fn save(&self, state: &LedgerState) -> Result<(), PersistenceError> {
		*self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
		Ok(())
	}

	async fn load(&self) -> Result<Option<LedgerState>, PersistenceError> {
		Ok(self
			.state
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone())
	}
}

/// In-memory implementation of JournalRepository
#[derive(Default)]
pub struct InMemoryJournalRepository {
	records: Mutex<Vec<JournalRecord>>,
}

impl InMemoryJournalRepository {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of raw records written so far, including status records.
	pub fn record_count(&self) -> usize {
		self.records
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.len()
	}
}

#[async_trait::async_trait]
impl JournalRepository for InMemoryJournalRepository {
	async fn append(&self, record: &JournalRecord) -> Result<(), PersistenceError> {
		self.records
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.push(record.clone());
		Ok(())
	}

	async fn load(&self) -> Result<Vec<Operation>, PersistenceError> {
		let records = self
			.records
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone();
		Ok(fold_records(records))
	}

	async fn rewrite(&self, operations: &[Operation]) -> Result<(), PersistenceError> {
		let records = operations
			.iter()
			.cloned()
			.map(|operation| JournalRecord::Appended { operation })
			.collect();
		*self.records.lock().unwrap_or_else(PoisonError::into_inner) = records;
		Ok(())
	}
}
