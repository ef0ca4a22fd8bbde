//! Materialized member balances.
//!
//! The store owns every `MemberAccount` and the live snapshot derived from the operation
//! log. `rebuild` must always reproduce what incremental `apply_operation` calls produced.

use crate::ledger::error::LedgerError;
use crate::ledger::types::{
	AccountId, Balance, MemberAccount, Operation, OperationKind, SyncStatus,
};

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Configuration for balance floors and log retention
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
	/// How far below zero a member's balance may go, in units.
	pub credit_limit: u64,
	/// Synced operations older than this are folded into settled balances and pruned.
	pub retention_days: u32,
}

impl Default for LedgerConfig {
	fn default() -> Self {
		Self {
			credit_limit: 0,
			retention_days: 30,
		}
	}
}

#[derive(Debug, Default)]
struct StoreState {
	accounts: BTreeMap<AccountId, MemberAccount>,
	compacted_through: Option<u64>,
}

pub struct LedgerStore {
	config: LedgerConfig,
	state: RwLock<StoreState>,
}

impl LedgerStore {
	pub fn new(config: LedgerConfig) -> Self {
		Self::from_accounts(config, Vec::new(), None)
	}

	/// Restores accounts and the compaction watermark. Call `rebuild` afterwards.
	pub fn from_accounts(
		config: LedgerConfig,
		accounts: Vec<MemberAccount>,
		compacted_through: Option<u64>,
	) -> Self {
		let accounts = accounts
			.into_iter()
			.map(|account| (account.id.clone(), account))
			.collect();
		Self {
			config,
			state: RwLock::new(StoreState {
				accounts,
				compacted_through,
			}),
		}
	}

	fn read(&self) -> RwLockReadGuard<'_, StoreState> {
		self.state.read().unwrap_or_else(PoisonError::into_inner)
	}

	fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
		self.state.write().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn config(&self) -> &LedgerConfig {
		&self.config
	}

	pub fn register_member(
		&self,
		id: AccountId,
		display_name: impl Into<String>,
	) -> Result<MemberAccount, LedgerError> {
		let mut state = self.write();
		if state.accounts.contains_key(&id) {
			return Err(LedgerError::DuplicateAccount(id));
		}
		let account = MemberAccount::new(id.clone(), display_name);
		state.accounts.insert(id, account.clone());
		info!("Registered member {} ({})", account.id, account.display_name);
		Ok(account)
	}

	pub fn deactivate_member(&self, id: &AccountId) -> Result<(), LedgerError> {
		let mut state = self.write();
		let account = state
			.accounts
			.get_mut(id)
			.ok_or_else(|| LedgerError::UnknownAccount(id.clone()))?;
		account.active = false;
		info!("Deactivated member {}", id);
		Ok(())
	}

	pub fn set_credit_limit(&self, id: &AccountId, limit: Option<u64>) -> Result<(), LedgerError> {
		let mut state = self.write();
		let account = state
			.accounts
			.get_mut(id)
			.ok_or_else(|| LedgerError::UnknownAccount(id.clone()))?;
		account.credit_limit = limit;
		Ok(())
	}

	pub fn account(&self, id: &AccountId) -> Option<MemberAccount> {
		self.read().accounts.get(id).cloned()
	}

	pub fn accounts(&self) -> Vec<MemberAccount> {
		self.read().accounts.values().cloned().collect()
	}

	pub fn balance(&self, id: &AccountId) -> Option<Balance> {
		self.read().accounts.get(id).map(|account| account.balance)
	}

	pub fn compacted_through(&self) -> Option<u64> {
		self.read().compacted_through
	}

	/// Lowest balance the account may reach.
	pub fn floor_for(&self, account: &MemberAccount) -> Balance {
		let limit = account.credit_limit.unwrap_or(self.config.credit_limit);
		-(limit.min(Balance::MAX as u64) as Balance)
	}

	/// Runs every check `apply_operation` runs, without changing anything.
	pub fn validate(&self, op: &Operation) -> Result<(), LedgerError> {
		let state = self.read();
		self.check(&state, op)
	}

	/// Validates and applies an operation, returning the source account's new balance.
	///
	/// Both sides of a transfer change together or not at all.
	pub fn apply_operation(&self, op: &Operation) -> Result<Balance, LedgerError> {
		let mut state = self.write();
		self.check(&state, op)?;

		for (account, delta) in op.deltas() {
			if let Some(account) = state.accounts.get_mut(account) {
				account.balance += delta;
			}
		}

		let balance = state
			.accounts
			.get(op.source())
			.map(|account| account.balance)
			.ok_or_else(|| LedgerError::UnknownAccount(op.source().clone()))?;
		debug!(
			"Applied {} {} of {} to {}, balance now {}",
			op.kind(),
			op.id(),
			op.amount(),
			op.source(),
			balance
		);
		Ok(balance)
	}

	fn check(&self, state: &StoreState, op: &Operation) -> Result<(), LedgerError> {
		if op.amount() == 0 || op.amount() > Balance::MAX as u64 {
			return Err(LedgerError::InvalidAmount);
		}
		let amount = op.amount() as Balance;

		let source = state
			.accounts
			.get(op.source())
			.ok_or_else(|| LedgerError::UnknownAccount(op.source().clone()))?;
		if !source.active {
			return Err(LedgerError::AccountInactive(source.id.clone()));
		}

		if op.kind() == OperationKind::TransferTab {
			let target_id = op
				.target()
				.ok_or_else(|| LedgerError::MissingTransferTarget(source.id.clone()))?;
			if target_id == &source.id {
				return Err(LedgerError::SelfTransfer(source.id.clone()));
			}
			let target = state
				.accounts
				.get(target_id)
				.ok_or_else(|| LedgerError::UnknownAccount(target_id.clone()))?;
			if !target.active {
				return Err(LedgerError::AccountInactive(target.id.clone()));
			}
			if target.balance.checked_add(amount).is_none() {
				return Err(LedgerError::InvalidAmount);
			}
		}

		match op.kind() {
			OperationKind::Deposit => {
				if source.balance.checked_add(amount).is_none() {
					return Err(LedgerError::InvalidAmount);
				}
			}
			OperationKind::PayTab | OperationKind::TransferTab => {
				let floor = self.floor_for(source);
				let resulting = source
					.balance
					.checked_sub(amount)
					.ok_or(LedgerError::InvalidAmount)?;
				if resulting < floor {
					return Err(LedgerError::BalanceLimitExceeded {
						account: source.id.clone(),
						balance: source.balance,
						floor,
					});
				}
			}
		}

		Ok(())
	}

	/// Side-effect free view of every account's live balance.
	pub fn snapshot(&self) -> BTreeMap<AccountId, Balance> {
		self.read()
			.accounts
			.iter()
			.map(|(id, account)| (id.clone(), account.balance))
			.collect()
	}

	/// Discards live balances and replays the log on top of the settled balances.
	///
	/// `Rejected` operations and operations at or below the compaction watermark are
	/// skipped. Replay does not re-check floors: the log is the record of what happened.
	pub fn rebuild(&self, log: &[Operation]) {
		let mut state = self.write();
		let watermark = state.compacted_through;

		for account in state.accounts.values_mut() {
			account.balance = account.settled_balance;
		}

		let mut replayed = 0usize;
		for op in log {
			if op.status() == SyncStatus::Rejected {
				continue;
			}
			if watermark.is_some_and(|w| op.seq() <= w) {
				continue;
			}

			let deltas = op.deltas();
			if let Some((missing, _)) = deltas
				.iter()
				.find(|(account, _)| !state.accounts.contains_key(*account))
			{
				warn!(
					"Skipping {} during rebuild: unknown account {}",
					op.id(),
					missing
				);
				continue;
			}
			for (account, delta) in deltas {
				if let Some(account) = state.accounts.get_mut(account) {
					account.balance = account.balance.saturating_add(delta);
				}
			}
			replayed += 1;
		}

		debug!("Rebuilt snapshot from {} operations", replayed);
	}

	/// Folds pruned `Synced` operations into settled balances and raises the watermark.
	///
	/// Live balances do not change.
	pub fn compact(&self, operations: &[Operation], watermark: Option<u64>) {
		let mut state = self.write();
		for op in operations {
			for (account, delta) in op.deltas() {
				if let Some(account) = state.accounts.get_mut(account) {
					account.settled_balance = account.settled_balance.saturating_add(delta);
				}
			}
		}
		state.compacted_through = match (state.compacted_through, watermark) {
			(Some(current), Some(new)) => Some(current.max(new)),
			(current, new) => current.or(new),
		};
		info!(
			"Compacted {} operations, watermark now {:?}",
			operations.len(),
			state.compacted_through
		);
	}
}
