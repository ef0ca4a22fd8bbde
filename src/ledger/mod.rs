//! Local ledger: member accounts, the operation log and the commit path between them.
//!
//! - `store`: member accounts and the materialized balance snapshot.
//! - `operation_log`: append-only, ordered record of cashier operations.
//! - `repositories` / `persistence`: durable storage for both.
//! - `locks`: account-scoped mutual exclusion.
//!
//! `Ledger` is the only place where the store and the log are changed together. A commit
//! validates under the affected accounts' locks, appends durably, and only then applies.
//! Commits on unrelated accounts validate and apply in parallel; only id assignment and
//! the journal append are serialized, by the sequencer.

pub mod error;
pub mod locks;
pub mod operation_log;
pub mod persistence;
pub mod repositories;
pub mod store;
pub mod types;

pub use error::{LedgerError, LogError, PersistenceError};
pub use operation_log::{OperationLog, PendingOperations, PrunePlan};
pub use persistence::LedgerPersistence;
pub use store::{LedgerConfig, LedgerStore};
pub use types::*;

use crate::ledger::locks::AccountLocks;
use crate::ledger::repositories::LedgerState;
use crate::utils::generate_device_id;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub struct Ledger {
	device_id: String,
	store: LedgerStore,
	log: OperationLog,
	persistence: LedgerPersistence,
	locks: AccountLocks,
	/// Next sequence number; held only across id assignment and append
	sequencer: tokio::sync::Mutex<u64>,
	/// Commits hold this shared; rebuild and compaction hold it exclusively
	gate: tokio::sync::RwLock<()>,
}

impl Ledger {
	/// Opens the ledger, generating a device id on first start and rebuilding the snapshot.
	pub async fn open(
		config: LedgerConfig,
		persistence: LedgerPersistence,
	) -> Result<Self, LedgerError> {
		let state = match persistence.load_state().await? {
			Some(state) => state,
			None => {
				let state = LedgerState {
					device_id: generate_device_id(),
					compacted_through: None,
					accounts: Vec::new(),
				};
				persistence.save_state(&state).await?;
				info!("Initialized new ledger for device {}", state.device_id);
				state
			}
		};

		let log = OperationLog::open(persistence.journal()).await?;
		let store = LedgerStore::from_accounts(config, state.accounts, state.compacted_through);
		store.rebuild(&log.entries());

		let last = log.last_seq().max(state.compacted_through).unwrap_or(0);

		info!(
			"Opened ledger for device {} with {} accounts, {} operations",
			state.device_id,
			store.accounts().len(),
			log.len()
		);

		Ok(Self {
			device_id: state.device_id,
			store,
			log,
			persistence,
			locks: AccountLocks::new(),
			sequencer: tokio::sync::Mutex::new(last + 1),
			gate: tokio::sync::RwLock::new(()),
		})
	}

	pub fn device_id(&self) -> &str {
		&self.device_id
	}

	pub fn store(&self) -> &LedgerStore {
		&self.store
	}

	pub fn log(&self) -> &OperationLog {
		&self.log
	}

	pub fn snapshot(&self) -> BTreeMap<AccountId, Balance> {
		self.store.snapshot()
	}

	async fn persist_state(&self) -> Result<(), LedgerError> {
		let state = LedgerState {
			device_id: self.device_id.clone(),
			compacted_through: self.store.compacted_through(),
			accounts: self.store.accounts(),
		};
		self.persistence.save_state(&state).await?;
		Ok(())
	}

	pub async fn register_member(
		&self,
		id: AccountId,
		display_name: impl Into<String>,
	) -> Result<MemberAccount, LedgerError> {
		let _gate = self.gate.read().await;
		let _locks = self.locks.lock_all(std::slice::from_ref(&id)).await;
		let account = self.store.register_member(id, display_name)?;
		self.persist_state().await?;
		Ok(account)
	}

	pub async fn deactivate_member(&self, id: &AccountId) -> Result<(), LedgerError> {
		let _gate = self.gate.read().await;
		let _locks = self.locks.lock_all(std::slice::from_ref(id)).await;
		self.store.deactivate_member(id)?;
		self.persist_state().await
	}

	pub async fn set_credit_limit(
		&self,
		id: &AccountId,
		limit: Option<u64>,
	) -> Result<(), LedgerError> {
		let _gate = self.gate.read().await;
		let _locks = self.locks.lock_all(std::slice::from_ref(id)).await;
		self.store.set_credit_limit(id, limit)?;
		self.persist_state().await
	}

	/// Records a cashier action: validate, append durably, apply.
	///
	/// A validation failure leaves both the log and the snapshot untouched.
	pub async fn commit(&self, intent: OperationIntent) -> Result<Operation, LedgerError> {
		let _gate = self.gate.read().await;

		let mut accounts = vec![intent.source.clone()];
		accounts.extend(intent.target.iter().cloned());
		let _locks = self.locks.lock_all(&accounts).await;

		// Balances of locked accounts cannot move until we release them, so the check
		// holds without the sequencer.
		let provisional = Operation::new(OperationId::new(&self.device_id, 0), intent, Utc::now());
		self.store.validate(&provisional)?;

		let op = {
			let mut next = self.sequencer.lock().await;
			let op = Operation::new(
				OperationId::new(&self.device_id, *next),
				provisional.intent(),
				Utc::now(),
			);
			self.log.append(op.clone()).await?;
			*next += 1;
			op
		};

		self.store.apply_operation(&op)?;
		info!(
			"Committed {} {} of {} for {}",
			op.kind(),
			op.id(),
			op.amount(),
			op.source()
		);
		Ok(op)
	}

	pub async fn mark_status(&self, id: &OperationId, status: SyncStatus) -> Result<(), LedgerError> {
		let _gate = self.gate.read().await;
		self.log.mark_status(id, status).await?;
		Ok(())
	}

	/// Marks an operation `Rejected` together with the remote's reason.
	pub async fn mark_rejected(
		&self,
		id: &OperationId,
		rejection: Rejection,
	) -> Result<(), LedgerError> {
		let _gate = self.gate.read().await;
		self.log.mark_rejected(id, rejection).await?;
		Ok(())
	}

	/// Durably closes a conflict. Returns `false` if it was not open.
	pub async fn acknowledge_conflict(&self, id: &OperationId) -> Result<bool, LedgerError> {
		let _gate = self.gate.read().await;
		Ok(self.log.acknowledge(id).await?)
	}

	/// Removes a rejected operation's effect by rebuilding the snapshot from the log.
	pub async fn roll_back(&self, id: &OperationId) -> Result<(), LedgerError> {
		let _gate = self.gate.write().await;
		match self.log.get(id).map(|op| op.status()) {
			Some(SyncStatus::Rejected) => {}
			Some(status) => warn!("Rolling back {} which is {:?}, not rejected", id, status),
			None => return Err(LogError::UnknownOperation(id.clone()).into()),
		}
		self.store.rebuild(&self.log.entries());
		info!("Rolled back {} and rebuilt the snapshot", id);
		Ok(())
	}

	/// Rebuilds the snapshot from the full log.
	pub async fn rebuild(&self) {
		let _gate = self.gate.write().await;
		self.store.rebuild(&self.log.entries());
	}

	/// Folds old synced operations into settled balances, then prunes them from the log.
	///
	/// The ledger state (with the new watermark) is persisted before the log is pruned, so
	/// an interruption between the two never counts an operation twice.
	pub async fn compact(&self, before: DateTime<Utc>) -> Result<usize, LedgerError> {
		let _gate = self.gate.write().await;

		let plan = self.log.prune_plan(before);
		if plan.operations.is_empty() {
			return Ok(0);
		}

		self.store.compact(&plan.operations, plan.watermark);
		self.persist_state().await?;
		let removed = self.log.prune(before).await?;
		Ok(removed)
	}

	/// Compacts everything older than the configured retention window.
	pub async fn compact_expired(&self) -> Result<usize, LedgerError> {
		let retention = chrono::Duration::days(self.store.config().retention_days as i64);
		self.compact(Utc::now() - retention).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	async fn ledger_with(members: &[&str]) -> Ledger {
		let ledger = Ledger::open(LedgerConfig::default(), LedgerPersistence::in_memory())
			.await
			.unwrap();
		for member in members {
			ledger
				.register_member(AccountId::from(*member), *member)
				.await
				.unwrap();
		}
		ledger
	}

	#[tokio::test]
	async fn test_validation_failure_is_never_appended() {
		let ledger = ledger_with(&["a", "b"]).await;
		ledger
			.commit(OperationIntent::deposit("a".into(), 2))
			.await
			.unwrap();

		let result = ledger
			.commit(OperationIntent::transfer_tab("a".into(), "b".into(), 5))
			.await;
		assert!(matches!(result, Err(LedgerError::BalanceLimitExceeded { .. })));
		assert_eq!(ledger.log().len(), 1);

		// The failed attempt did not consume a sequence number.
		let next = ledger
			.commit(OperationIntent::deposit("b".into(), 1))
			.await
			.unwrap();
		assert_eq!(next.seq(), 2);
	}

	#[tokio::test]
	async fn test_concurrent_commits_stay_ordered() {
		let ledger = Arc::new(ledger_with(&["a", "b"]).await);
		let mut handles = Vec::new();
		for i in 0..20u64 {
			let ledger = ledger.clone();
			let account = if i % 2 == 0 { "a" } else { "b" };
			handles.push(tokio::spawn(async move {
				ledger
					.commit(OperationIntent::deposit(account.into(), 1))
					.await
					.unwrap()
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}

		let seqs: Vec<u64> = ledger.log().entries().iter().map(|op| op.seq()).collect();
		assert_eq!(seqs, (1..=20).collect::<Vec<_>>());
		assert_eq!(ledger.store().balance(&"a".into()), Some(10));
		assert_eq!(ledger.store().balance(&"b".into()), Some(10));
	}

	#[tokio::test]
	async fn test_commit_on_unrelated_account_is_not_blocked() {
		let ledger = ledger_with(&["a", "b"]).await;
		let _held = ledger.locks.lock_all(&[AccountId::from("a")]).await;

		let committed = tokio::time::timeout(
			std::time::Duration::from_secs(1),
			ledger.commit(OperationIntent::deposit("b".into(), 1)),
		)
		.await
		.expect("commit on b waited for a's lock")
		.unwrap();
		assert_eq!(committed.seq(), 1);
	}

	#[tokio::test]
	async fn test_compaction_preserves_balances_across_reopen() {
		let persistence = LedgerPersistence::in_memory();
		let ledger = Ledger::open(LedgerConfig::default(), persistence.clone())
			.await
			.unwrap();
		ledger.register_member("a".into(), "A").await.unwrap();
		let first = ledger
			.commit(OperationIntent::deposit("a".into(), 5))
			.await
			.unwrap();
		let second = ledger
			.commit(OperationIntent::pay_tab("a".into(), 1))
			.await
			.unwrap();
		ledger.mark_status(first.id(), SyncStatus::Synced).await.unwrap();
		ledger.mark_status(second.id(), SyncStatus::Synced).await.unwrap();
		ledger
			.commit(OperationIntent::deposit("a".into(), 3))
			.await
			.unwrap();

		let removed = ledger
			.compact(Utc::now() + chrono::Duration::seconds(1))
			.await
			.unwrap();
		assert_eq!(removed, 2);
		assert_eq!(ledger.log().len(), 1);
		assert_eq!(ledger.store().balance(&"a".into()), Some(7));
		drop(ledger);

		let reopened = Ledger::open(LedgerConfig::default(), persistence).await.unwrap();
		assert_eq!(reopened.store().balance(&"a".into()), Some(7));
		let next = reopened
			.commit(OperationIntent::deposit("a".into(), 1))
			.await
			.unwrap();
		assert_eq!(next.seq(), 4);
	}

	#[tokio::test]
	async fn test_roll_back_removes_rejected_effect() {
		let ledger = ledger_with(&["a"]).await;
		ledger
			.commit(OperationIntent::deposit("a".into(), 5))
			.await
			.unwrap();
		let pay = ledger
			.commit(OperationIntent::pay_tab("a".into(), 4))
			.await
			.unwrap();
		assert_eq!(ledger.store().balance(&"a".into()), Some(1));

		ledger.mark_status(pay.id(), SyncStatus::Rejected).await.unwrap();
		ledger.roll_back(pay.id()).await.unwrap();
		assert_eq!(ledger.store().balance(&"a".into()), Some(5));
	}
}
