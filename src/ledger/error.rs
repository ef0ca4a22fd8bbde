use crate::ledger::types::{AccountId, Balance, OperationId, SyncStatus};

/// Errors raised while reading or writing the persisted ledger files
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Corrupt state: {0}")]
	Corrupt(String),
}

/// Errors from the operation log
#[derive(Debug, thiserror::Error)]
pub enum LogError {
	#[error("Invalid status transition for {id}: {from:?} -> {to:?}")]
	InvalidTransition {
		id: OperationId,
		from: SyncStatus,
		to: SyncStatus,
	},

	#[error("Unknown operation: {0}")]
	UnknownOperation(OperationId),

	#[error("Operation {got} appended out of order (last sequence {last})")]
	OutOfOrder { last: u64, got: OperationId },

	#[error("Persistence error: {0}")]
	Persistence(#[from] PersistenceError),
}

/// Errors surfaced to the cashier when an action cannot be committed
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("Amount must be a positive number of units")]
	InvalidAmount,

	#[error("Unknown account: {0}")]
	UnknownAccount(AccountId),

	#[error("Account {0} is deactivated")]
	AccountInactive(AccountId),

	#[error("Cannot transfer from {0} to itself")]
	SelfTransfer(AccountId),

	#[error("Transfer from {0} has no target account")]
	MissingTransferTarget(AccountId),

	#[error("Balance limit exceeded for {account}: balance {balance}, floor {floor}")]
	BalanceLimitExceeded {
		account: AccountId,
		balance: Balance,
		floor: Balance,
	},

	#[error("Account already exists: {0}")]
	DuplicateAccount(AccountId),

	#[error("Operation log error: {0}")]
	Log(#[from] LogError),

	#[error("Persistence error: {0}")]
	Persistence(#[from] PersistenceError),
}
