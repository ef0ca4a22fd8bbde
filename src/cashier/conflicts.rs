use crate::ledger::types::{Operation, OperationId};
use crate::remote::RejectReason;
use crate::sync::SyncError;
use crate::sync::events::{SyncEvent, SyncEventHandler};
use crate::utils::format_balance;

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// A rejected operation waiting for a human to acknowledge or retry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictNotice {
	pub operation: Operation,
	pub reason: RejectReason,
	pub rejected_at: DateTime<Utc>,
}

impl ConflictNotice {
	/// Rebuilds the notice of an open conflict from its journaled rejection.
	pub fn from_operation(operation: &Operation) -> Option<Self> {
		if !operation.is_open_conflict() {
			return None;
		}
		let rejection = operation.rejection()?;
		Some(Self {
			operation: operation.clone(),
			reason: rejection.reason.clone(),
			rejected_at: rejection.rejected_at,
		})
	}

	pub fn id(&self) -> &OperationId {
		self.operation.id()
	}

	pub fn describe(&self) -> String {
		let op = &self.operation;
		let target = op
			.target()
			.map(|target| format!(" to {}", target))
			.unwrap_or_default();
		format!(
			"{} {} of {} for {}{} was rejected: {}",
			op.kind(),
			op.id(),
			format_balance(op.amount() as i64, 2),
			op.source(),
			target,
			self.reason
		)
	}
}

/// Collects conflict notices from reconcile runs.
///
/// Clones share the same notices, so one clone can be registered with the reconciler
/// while the cashier session reads another.
#[derive(Debug, Clone, Default)]
pub struct ConflictInbox {
	notices: Arc<Mutex<Vec<ConflictNotice>>>,
}

impl ConflictInbox {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, Vec<ConflictNotice>> {
		self.notices.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn push(&self, notice: ConflictNotice) {
		let mut notices = self.lock();
		if notices.iter().any(|n| n.id() == notice.id()) {
			return;
		}
		info!("Conflict recorded: {}", notice.describe());
		notices.push(notice);
	}

	/// Unacknowledged notices, oldest first.
	pub fn list(&self) -> Vec<ConflictNotice> {
		self.lock().clone()
	}

	pub fn get(&self, id: &OperationId) -> Option<ConflictNotice> {
		self.lock().iter().find(|n| n.id() == id).cloned()
	}

	pub fn take(&self, id: &OperationId) -> Option<ConflictNotice> {
		let mut notices = self.lock();
		let index = notices.iter().position(|n| n.id() == id)?;
		Some(notices.remove(index))
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.lock().is_empty()
	}
}

#[async_trait::async_trait]
impl SyncEventHandler for ConflictInbox {
	async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError> {
		if let SyncEvent::OperationRejected {
			operation,
			reason,
			rejected_at,
		} = event
		{
			self.push(ConflictNotice {
				operation: operation.clone(),
				reason: reason.clone(),
				rejected_at: *rejected_at,
			});
		}
		Ok(())
	}

	fn name(&self) -> &'static str {
		"ConflictInbox"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::types::OperationIntent;

	fn notice(seq: u64) -> ConflictNotice {
		ConflictNotice {
			operation: Operation::new(
				OperationId::new("dev", seq),
				OperationIntent::pay_tab("anna".into(), 250),
				Utc::now(),
			),
			reason: RejectReason::Invalid {
				message: "nope".to_string(),
			},
			rejected_at: Utc::now(),
		}
	}

	#[tokio::test]
	async fn test_rejection_event_lands_in_shared_inbox() {
		let inbox = ConflictInbox::new();
		let mut handler = inbox.clone();
		let n = notice(3);
		handler
			.handle(&SyncEvent::OperationRejected {
				operation: n.operation.clone(),
				reason: n.reason.clone(),
				rejected_at: n.rejected_at,
			})
			.await
			.unwrap();
		handler
			.handle(&SyncEvent::RunStarted { pending: 0 })
			.await
			.unwrap();

		assert_eq!(inbox.list(), vec![n]);
	}

	#[test]
	fn test_duplicate_notice_is_ignored_and_take_removes() {
		let inbox = ConflictInbox::new();
		inbox.push(notice(1));
		inbox.push(notice(1));
		inbox.push(notice(2));
		assert_eq!(inbox.len(), 2);

		assert!(inbox.take(&OperationId::new("dev", 1)).is_some());
		assert!(inbox.take(&OperationId::new("dev", 1)).is_none());
		assert_eq!(inbox.len(), 1);
	}

	#[test]
	fn test_describe_mentions_reason() {
		assert_eq!(
			notice(7).describe(),
			"pay-tab dev:7 of 2.50 for anna was rejected: nope"
		);
	}
}
