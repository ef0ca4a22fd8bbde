//! Types shared by the ledger store, the operation log and the reconciler.

use crate::remote::RejectReason;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Signed count of units (tally marks or currency minor units).
pub type Balance = i64;

/// Stable identifier of a member account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for AccountId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for AccountId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// Globally unique operation id: the installation's device id plus a local sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId {
	pub device: String,
	pub seq: u64,
}

impl OperationId {
	pub fn new(device: impl Into<String>, seq: u64) -> Self {
		Self {
			device: device.into(),
			seq,
		}
	}
}

impl fmt::Display for OperationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.device, self.seq)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid operation id {0:?}, expected device:seq")]
pub struct ParseOperationIdError(String);

impl FromStr for OperationId {
	type Err = ParseOperationIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (device, seq) = s
			.rsplit_once(':')
			.ok_or_else(|| ParseOperationIdError(s.to_string()))?;
		if device.is_empty() {
			return Err(ParseOperationIdError(s.to_string()));
		}
		let seq = seq
			.parse()
			.map_err(|_| ParseOperationIdError(s.to_string()))?;
		Ok(Self::new(device, seq))
	}
}

/// The cashier action an operation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
	/// Increases the member's prepaid balance
	Deposit,
	/// Settles consumption against the member's balance
	PayTab,
	/// Moves tab balance from one member to another
	TransferTab,
}

impl fmt::Display for OperationKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			OperationKind::Deposit => "deposit",
			OperationKind::PayTab => "pay-tab",
			OperationKind::TransferTab => "transfer-tab",
		};
		f.write_str(name)
	}
}

/// Lifecycle of an operation with respect to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
	Pending,
	Synced,
	Rejected,
}

impl SyncStatus {
	/// `Synced` and `Rejected` are terminal; only `Pending` may move, and only to one of them.
	pub fn can_transition_to(self, next: SyncStatus) -> bool {
		matches!(
			(self, next),
			(SyncStatus::Pending, SyncStatus::Synced) | (SyncStatus::Pending, SyncStatus::Rejected)
		)
	}
}

/// The remote store's refusal of an operation, kept until a cashier has seen it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
	pub reason: RejectReason,
	pub rejected_at: DateTime<Utc>,
	/// Set once a cashier acknowledged or retried the conflict
	#[serde(default)]
	pub acknowledged: bool,
}

impl Rejection {
	pub fn new(reason: RejectReason, rejected_at: DateTime<Utc>) -> Self {
		Self {
			reason,
			rejected_at,
			acknowledged: false,
		}
	}
}

/// What a cashier asked for, before it has an id and a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationIntent {
	pub kind: OperationKind,
	pub source: AccountId,
	pub target: Option<AccountId>,
	pub amount: u64,
}

impl OperationIntent {
	pub fn deposit(account: AccountId, amount: u64) -> Self {
		Self {
			kind: OperationKind::Deposit,
			source: account,
			target: None,
			amount,
		}
	}

	pub fn pay_tab(account: AccountId, amount: u64) -> Self {
		Self {
			kind: OperationKind::PayTab,
			source: account,
			target: None,
			amount,
		}
	}

	pub fn transfer_tab(from: AccountId, to: AccountId, amount: u64) -> Self {
		Self {
			kind: OperationKind::TransferTab,
			source: from,
			target: Some(to),
			amount,
		}
	}
}

/// Immutable record of one cashier action.
///
/// Everything but the sync status is fixed at creation; the status is only changed by
/// the operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
	id: OperationId,
	kind: OperationKind,
	source: AccountId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	target: Option<AccountId>,
	amount: u64,
	created_at: DateTime<Utc>,
	status: SyncStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	rejection: Option<Rejection>,
}

impl Operation {
	/// Creates a new `Pending` operation from a cashier intent.
	pub fn new(id: OperationId, intent: OperationIntent, created_at: DateTime<Utc>) -> Self {
		let target = match intent.kind {
			OperationKind::TransferTab => intent.target,
			_ => None,
		};
		Self {
			id,
			kind: intent.kind,
			source: intent.source,
			target,
			amount: intent.amount,
			created_at,
			status: SyncStatus::Pending,
			rejection: None,
		}
	}

	pub fn id(&self) -> &OperationId {
		&self.id
	}

	pub fn seq(&self) -> u64 {
		self.id.seq
	}

	pub fn kind(&self) -> OperationKind {
		self.kind
	}

	pub fn source(&self) -> &AccountId {
		&self.source
	}

	pub fn target(&self) -> Option<&AccountId> {
		self.target.as_ref()
	}

	pub fn amount(&self) -> u64 {
		self.amount
	}

	pub fn created_at(&self) -> DateTime<Utc> {
		self.created_at
	}

	pub fn status(&self) -> SyncStatus {
		self.status
	}

	/// Why the remote refused this operation, if it did.
	pub fn rejection(&self) -> Option<&Rejection> {
		self.rejection.as_ref()
	}

	/// Rejected and not yet acknowledged by a cashier.
	pub fn is_open_conflict(&self) -> bool {
		self.status == SyncStatus::Rejected
			&& self.rejection.as_ref().is_some_and(|r| !r.acknowledged)
	}

	/// The intent this operation was created from, used to retry rejected actions.
	pub fn intent(&self) -> OperationIntent {
		OperationIntent {
			kind: self.kind,
			source: self.source.clone(),
			target: self.target.clone(),
			amount: self.amount,
		}
	}

	/// Signed balance changes this operation causes, source first.
	pub fn deltas(&self) -> Vec<(&AccountId, Balance)> {
		let amount = self.amount as Balance;
		match (self.kind, &self.target) {
			(OperationKind::Deposit, _) => vec![(&self.source, amount)],
			(OperationKind::PayTab, _) => vec![(&self.source, -amount)],
			(OperationKind::TransferTab, Some(target)) => {
				vec![(&self.source, -amount), (target, amount)]
			}
			(OperationKind::TransferTab, None) => vec![(&self.source, -amount)],
		}
	}

	/// Accounts touched by this operation, in sorted order for lock acquisition.
	pub fn accounts(&self) -> Vec<AccountId> {
		let mut accounts = vec![self.source.clone()];
		if let Some(target) = &self.target {
			if target != &self.source {
				accounts.push(target.clone());
			}
		}
		accounts.sort();
		accounts
	}

	pub(crate) fn set_status(&mut self, status: SyncStatus, rejection: Option<Rejection>) {
		self.status = status;
		if rejection.is_some() {
			self.rejection = rejection;
		}
	}

	pub(crate) fn set_acknowledged(&mut self) {
		if let Some(rejection) = self.rejection.as_mut() {
			rejection.acknowledged = true;
		}
	}
}

/// One tab-holder of the club.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAccount {
	pub id: AccountId,
	pub display_name: String,
	/// Live balance, recomputed on rebuild
	#[serde(default)]
	pub balance: Balance,
	/// Balance folded in from operations that were pruned from the log
	#[serde(default)]
	pub settled_balance: Balance,
	pub active: bool,
	/// Overrides the configured credit limit for this member
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub credit_limit: Option<u64>,
}

impl MemberAccount {
	pub fn new(id: AccountId, display_name: impl Into<String>) -> Self {
		Self {
			id,
			display_name: display_name.into(),
			balance: 0,
			settled_balance: 0,
			active: true,
			credit_limit: None,
		}
	}
}
