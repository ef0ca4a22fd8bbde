//! Append-only log of cashier operations awaiting synchronization.
//!
//! Operations are kept in the order they were appended, which is also strictly increasing
//! sequence order. Every mutation is journaled through a `JournalRepository` before it
//! becomes visible in memory, so a process restart always reloads a prefix of what callers
//! were told succeeded.

use crate::ledger::error::LogError;
use crate::ledger::repositories::{JournalRecord, JournalRepository};
use crate::ledger::types::{Operation, OperationId, Rejection, SyncStatus};
use crate::sync::cursor::SyncCursor;

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

type Entries = Arc<RwLock<Vec<Operation>>>;

fn read(entries: &Entries) -> RwLockReadGuard<'_, Vec<Operation>> {
	entries.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(entries: &Entries) -> RwLockWriteGuard<'_, Vec<Operation>> {
	entries.write().unwrap_or_else(PoisonError::into_inner)
}

/// What a prune with a given cut-off would remove
#[derive(Debug, Clone, Default)]
pub struct PrunePlan {
	/// `Synced` operations that would be removed, oldest first
	pub operations: Vec<Operation>,
	/// Highest sequence number covered by the scan; everything at or below it is terminal
	pub watermark: Option<u64>,
}

pub struct OperationLog {
	entries: Entries,
	journal: Arc<dyn JournalRepository>,
	/// Serializes journal writes so the journal order matches the in-memory order
	writer: tokio::sync::Mutex<()>,
}

impl OperationLog {
	/// Opens the log, loading every journaled operation.
	pub async fn open(journal: Arc<dyn JournalRepository>) -> Result<Self, LogError> {
		let mut operations = journal.load().await?;
		operations.sort_by_key(|op| op.seq());

		info!(
			"Opened operation log with {} operations ({} pending)",
			operations.len(),
			operations
				.iter()
				.filter(|op| op.status() == SyncStatus::Pending)
				.count()
		);

		Ok(Self {
			entries: Arc::new(RwLock::new(operations)),
			journal,
			writer: tokio::sync::Mutex::new(()),
		})
	}

	/// Durably appends an operation. Its sequence number must exceed every earlier one.
	pub async fn append(&self, op: Operation) -> Result<(), LogError> {
		let _writer = self.writer.lock().await;

		if let Some(last) = self.last_seq() {
			if op.seq() <= last {
				return Err(LogError::OutOfOrder {
					last,
					got: op.id().clone(),
				});
			}
		}

		self.journal
			.append(&JournalRecord::Appended {
				operation: op.clone(),
			})
			.await?;

		debug!("Appended {} {} for {}", op.kind(), op.id(), op.source());
		write(&self.entries).push(op);
		Ok(())
	}

	/// Pending operations after the cursor, oldest first.
	///
	/// The returned iterator reads the live log on every step, so operations appended
	/// while it is being drained are still yielded.
	pub fn pending_since(&self, cursor: &SyncCursor) -> PendingOperations {
		PendingOperations {
			entries: self.entries.clone(),
			start: cursor.position(),
			position: cursor.position(),
		}
	}

	/// Moves an operation out of `Pending`. Terminal states never change again.
	pub async fn mark_status(&self, id: &OperationId, status: SyncStatus) -> Result<(), LogError> {
		self.record_status(id, status, None).await
	}

	/// Marks an operation `Rejected` and keeps the remote's reason in the same journal record.
	pub async fn mark_rejected(&self, id: &OperationId, rejection: Rejection) -> Result<(), LogError> {
		self.record_status(id, SyncStatus::Rejected, Some(rejection))
			.await
	}

	async fn record_status(
		&self,
		id: &OperationId,
		status: SyncStatus,
		rejection: Option<Rejection>,
	) -> Result<(), LogError> {
		let _writer = self.writer.lock().await;

		let current = self
			.get(id)
			.map(|op| op.status())
			.ok_or_else(|| LogError::UnknownOperation(id.clone()))?;
		if !current.can_transition_to(status) {
			return Err(LogError::InvalidTransition {
				id: id.clone(),
				from: current,
				to: status,
			});
		}

		self.journal
			.append(&JournalRecord::Status {
				id: id.clone(),
				status,
				rejection: rejection.clone(),
			})
			.await?;

		let mut entries = write(&self.entries);
		if let Some(op) = entries.iter_mut().find(|op| op.id() == id) {
			op.set_status(status, rejection);
		}
		debug!("Marked {} as {:?}", id, status);
		Ok(())
	}

	/// Durably closes the conflict of a rejected operation.
	///
	/// Returns `false` if the operation is not an open conflict.
	pub async fn acknowledge(&self, id: &OperationId) -> Result<bool, LogError> {
		let _writer = self.writer.lock().await;

		match self.get(id) {
			Some(op) if op.is_open_conflict() => {}
			Some(_) => return Ok(false),
			None => return Err(LogError::UnknownOperation(id.clone())),
		}

		self.journal
			.append(&JournalRecord::Acknowledged { id: id.clone() })
			.await?;

		let mut entries = write(&self.entries);
		if let Some(op) = entries.iter_mut().find(|op| op.id() == id) {
			op.set_acknowledged();
		}
		debug!("Acknowledged conflict for {}", id);
		Ok(true)
	}

	/// Rejected operations no cashier has acknowledged yet, oldest first.
	pub fn open_conflicts(&self) -> Vec<Operation> {
		read(&self.entries)
			.iter()
			.filter(|op| op.is_open_conflict())
			.cloned()
			.collect()
	}

	/// Computes what `prune(before)` would remove without changing anything.
	///
	/// The scan starts at the oldest entry and stops at the first `Pending` entry or the
	/// first `Synced` entry created at or after `before`. `Rejected` entries are skipped.
	pub fn prune_plan(&self, before: DateTime<Utc>) -> PrunePlan {
		let entries = read(&self.entries);
		let mut plan = PrunePlan::default();

		for op in entries.iter() {
			match op.status() {
				SyncStatus::Pending => break,
				SyncStatus::Rejected => plan.watermark = Some(op.seq()),
				SyncStatus::Synced if op.created_at() < before => {
					plan.watermark = Some(op.seq());
					plan.operations.push(op.clone());
				}
				SyncStatus::Synced => break,
			}
		}

		plan
	}

	/// Removes `Synced` operations older than `before`, returning how many were removed.
	///
	/// `Pending` and `Rejected` entries are never removed.
	pub async fn prune(&self, before: DateTime<Utc>) -> Result<usize, LogError> {
		let _writer = self.writer.lock().await;

		let plan = self.prune_plan(before);
		if plan.operations.is_empty() {
			return Ok(0);
		}

		let removed: HashSet<u64> = plan.operations.iter().map(|op| op.seq()).collect();
		let remaining: Vec<Operation> = read(&self.entries)
			.iter()
			.filter(|op| !removed.contains(&op.seq()))
			.cloned()
			.collect();

		self.journal.rewrite(&remaining).await?;
		*write(&self.entries) = remaining;

		info!(
			"Pruned {} synced operations created before {}",
			removed.len(),
			before.to_rfc3339()
		);
		Ok(removed.len())
	}

	/// All operations currently in the log, oldest first.
	pub fn entries(&self) -> Vec<Operation> {
		read(&self.entries).clone()
	}

	pub fn get(&self, id: &OperationId) -> Option<Operation> {
		read(&self.entries).iter().find(|op| op.id() == id).cloned()
	}

	pub fn len(&self) -> usize {
		read(&self.entries).len()
	}

	pub fn is_empty(&self) -> bool {
		read(&self.entries).is_empty()
	}

	pub fn last_seq(&self) -> Option<u64> {
		read(&self.entries).last().map(|op| op.seq())
	}

	pub fn pending_count(&self) -> usize {
		read(&self.entries)
			.iter()
			.filter(|op| op.status() == SyncStatus::Pending)
			.count()
	}
}

/// Lazy, restartable sequence of pending operations after a cursor.
pub struct PendingOperations {
	entries: Entries,
	start: u64,
	position: u64,
}

impl PendingOperations {
	/// Rewinds to the cursor the sequence was created from.
	pub fn restart(&mut self) {
		self.position = self.start;
	}
}

impl Iterator for PendingOperations {
	type Item = Operation;

	fn next(&mut self) -> Option<Operation> {
		let entries = read(&self.entries);
		let first = entries.partition_point(|op| op.seq() <= self.position);
		let next = entries[first..]
			.iter()
			.find(|op| op.status() == SyncStatus::Pending)
			.cloned()?;
		self.position = next.seq();
		Some(next)
	}
}
