//! Cashier-facing boundary.
//!
//! `CashierSession` is what the UI talks to. Every action commits locally and returns at
//! once, whether or not the remote store is reachable. Rejections found later by the
//! reconciler show up as `ConflictNotice`s until someone acknowledges or retries them.
//! Both the rejection and its acknowledgement are journaled, so open conflicts come back
//! after a restart.

pub mod conflicts;

pub use conflicts::{ConflictInbox, ConflictNotice};

use crate::ledger::types::{
	AccountId, Balance, MemberAccount, Operation, OperationId, OperationIntent, OperationKind,
};
use crate::ledger::{Ledger, LedgerError};

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// What the cashier sees after a successful action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashierReceipt {
	pub operation_id: OperationId,
	pub kind: OperationKind,
	pub account: AccountId,
	/// Local balance of `account` right after the action
	pub balance: Balance,
	/// Operations not yet decided by the remote store, this one included
	pub pending_sync: usize,
}

pub struct CashierSession {
	ledger: Arc<Ledger>,
	inbox: ConflictInbox,
}

impl CashierSession {
	/// Opens a session, restoring every conflict the log still holds open.
	pub fn new(ledger: Arc<Ledger>) -> Self {
		let inbox = ConflictInbox::new();
		for op in ledger.log().open_conflicts() {
			if let Some(notice) = ConflictNotice::from_operation(&op) {
				inbox.push(notice);
			}
		}
		Self { ledger, inbox }
	}

	/// Handle to register with the reconciler so rejections reach this session.
	pub fn inbox(&self) -> ConflictInbox {
		self.inbox.clone()
	}

	pub async fn register_member(
		&self,
		id: AccountId,
		display_name: impl Into<String>,
	) -> Result<MemberAccount, LedgerError> {
		self.ledger.register_member(id, display_name).await
	}

	pub async fn request_deposit(
		&self,
		account: AccountId,
		amount: u64,
	) -> Result<CashierReceipt, LedgerError> {
		self.submit(OperationIntent::deposit(account, amount)).await
	}

	pub async fn request_pay_tab(
		&self,
		account: AccountId,
		amount: u64,
	) -> Result<CashierReceipt, LedgerError> {
		self.submit(OperationIntent::pay_tab(account, amount)).await
	}

	pub async fn request_transfer_tab(
		&self,
		from: AccountId,
		to: AccountId,
		amount: u64,
	) -> Result<CashierReceipt, LedgerError> {
		self.submit(OperationIntent::transfer_tab(from, to, amount))
			.await
	}

	async fn submit(&self, intent: OperationIntent) -> Result<CashierReceipt, LedgerError> {
		let op = self.ledger.commit(intent).await?;
		Ok(self.receipt(&op))
	}

	fn receipt(&self, op: &Operation) -> CashierReceipt {
		CashierReceipt {
			operation_id: op.id().clone(),
			kind: op.kind(),
			account: op.source().clone(),
			balance: self.ledger.store().balance(op.source()).unwrap_or(0),
			pending_sync: self.ledger.log().pending_count(),
		}
	}

	/// Unacknowledged conflicts, oldest first.
	pub fn conflicts(&self) -> Vec<ConflictNotice> {
		self.inbox.list()
	}

	/// Discards a conflict. Returns the notice if it was still open.
	///
	/// The acknowledgement is journaled first; if that fails the conflict stays open.
	pub async fn acknowledge(
		&self,
		id: &OperationId,
	) -> Result<Option<ConflictNotice>, LedgerError> {
		if self.inbox.get(id).is_none() {
			return Ok(None);
		}
		self.ledger.acknowledge_conflict(id).await?;
		let notice = self.inbox.take(id);
		info!("Conflict for {} acknowledged", id);
		Ok(notice)
	}

	/// Re-issues a rejected action as a new operation and closes its conflict.
	///
	/// Returns `Ok(None)` if there is no open conflict for `id`. If the new commit fails
	/// validation the conflict stays open.
	pub async fn retry(&self, id: &OperationId) -> Result<Option<CashierReceipt>, LedgerError> {
		let Some(notice) = self.inbox.get(id) else {
			return Ok(None);
		};
		let receipt = self.submit(notice.operation.intent()).await?;
		self.ledger.acknowledge_conflict(id).await?;
		self.inbox.take(id);
		info!("Conflict for {} retried as {}", id, receipt.operation_id);
		Ok(Some(receipt))
	}

	pub fn balances(&self) -> BTreeMap<AccountId, Balance> {
		self.ledger.snapshot()
	}

	pub fn accounts(&self) -> Vec<MemberAccount> {
		self.ledger.store().accounts()
	}

	pub fn pending_sync(&self) -> usize {
		self.ledger.log().pending_count()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::{LedgerConfig, LedgerPersistence, Rejection};
	use crate::remote::RejectReason;
	use chrono::Utc;

	async fn reject(session: &CashierSession, id: &OperationId) {
		let rejection = Rejection::new(
			RejectReason::Invalid {
				message: "test".to_string(),
			},
			Utc::now(),
		);
		session.ledger.mark_rejected(id, rejection.clone()).await.unwrap();
		session.ledger.roll_back(id).await.unwrap();
		let op = session.ledger.log().get(id).unwrap();
		session.inbox().push(ConflictNotice {
			operation: op,
			reason: rejection.reason,
			rejected_at: rejection.rejected_at,
		});
	}

	async fn session() -> CashierSession {
		let ledger = Ledger::open(LedgerConfig::default(), LedgerPersistence::in_memory())
			.await
			.unwrap();
		let session = CashierSession::new(Arc::new(ledger));
		session.register_member("anna".into(), "Anna").await.unwrap();
		session.register_member("ben".into(), "Ben").await.unwrap();
		session
	}

	#[tokio::test]
	async fn test_actions_commit_locally() {
		let session = session().await;
		let receipt = session
			.request_deposit("anna".into(), 500)
			.await
			.unwrap();
		assert_eq!(receipt.balance, 500);
		assert_eq!(receipt.pending_sync, 1);

		let receipt = session
			.request_transfer_tab("anna".into(), "ben".into(), 200)
			.await
			.unwrap();
		assert_eq!(receipt.kind, OperationKind::TransferTab);
		assert_eq!(receipt.balance, 300);
		assert_eq!(session.balances().get(&"ben".into()), Some(&200));
	}

	#[tokio::test]
	async fn test_rejected_validation_is_not_recorded() {
		let session = session().await;
		let result = session.request_pay_tab("anna".into(), 1).await;
		assert!(matches!(result, Err(LedgerError::BalanceLimitExceeded { .. })));
		assert_eq!(session.pending_sync(), 0);

		let result = session.request_deposit("nobody".into(), 1).await;
		assert!(matches!(result, Err(LedgerError::UnknownAccount(_))));
	}

	#[tokio::test]
	async fn test_retry_reissues_and_closes_conflict() {
		let session = session().await;
		session.request_deposit("anna".into(), 500).await.unwrap();
		let pay = session.request_pay_tab("anna".into(), 100).await.unwrap();

		let op = session.ledger.log().get(&pay.operation_id).unwrap();
		reject(&session, op.id()).await;
		assert_eq!(session.conflicts().len(), 1);

		let receipt = session.retry(op.id()).await.unwrap().unwrap();
		assert_ne!(&receipt.operation_id, op.id());
		assert_eq!(receipt.balance, 400);
		assert!(session.conflicts().is_empty());
		assert!(session.retry(op.id()).await.unwrap().is_none());
		assert!(session.acknowledge(op.id()).await.unwrap().is_none());
		assert!(session.ledger.log().open_conflicts().is_empty());
	}

	#[tokio::test]
	async fn test_new_session_restores_open_conflicts() {
		let session = session().await;
		session.request_deposit("anna".into(), 500).await.unwrap();
		let first = session.request_pay_tab("anna".into(), 100).await.unwrap();
		let second = session.request_pay_tab("anna".into(), 50).await.unwrap();
		reject(&session, &first.operation_id).await;
		reject(&session, &second.operation_id).await;
		session
			.acknowledge(&first.operation_id)
			.await
			.unwrap()
			.unwrap();

		let restored = CashierSession::new(session.ledger.clone());
		let open: Vec<OperationId> = restored
			.conflicts()
			.iter()
			.map(|n| n.id().clone())
			.collect();
		assert_eq!(open, vec![second.operation_id]);
		assert_eq!(restored.conflicts()[0].reason.to_string(), "test");
	}
}
