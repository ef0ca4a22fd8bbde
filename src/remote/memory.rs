use super::store::RemoteStore;
use super::types::{RejectReason, SubmitOutcome};
use crate::ledger::types::{AccountId, Balance, Operation, OperationId, OperationKind};

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// A one-shot failure to inject into the next submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
	/// Fail before the operation reaches the remote.
	Unreachable,
	/// Apply the operation but lose the answer, as with a connection cut mid-response.
	DropResponse,
	/// Wait before answering, to exercise timeouts and cancellation.
	Delay(Duration),
}

#[derive(Default)]
struct RemoteLedger {
	balances: HashMap<AccountId, Balance>,
	decisions: HashMap<OperationId, SubmitOutcome>,
	applied: Vec<OperationId>,
	submissions: usize,
	faults: VecDeque<Fault>,
	unreachable: bool,
}

/// Authoritative remote ledger kept in memory.
///
/// Balances are checked against a single floor once merged with everything the remote
/// has already applied, including operations from other devices. Decisions are recorded
/// per operation id so a resubmission never applies twice.
pub struct InMemoryRemoteStore {
	floor: Balance,
	inner: Mutex<RemoteLedger>,
}

impl InMemoryRemoteStore {
	pub fn new(credit_limit: u64) -> Self {
		Self {
			floor: -(credit_limit.min(Balance::MAX as u64) as Balance),
			inner: Mutex::new(RemoteLedger::default()),
		}
	}

	fn lock(&self) -> MutexGuard<'_, RemoteLedger> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Simulates another device changing an account directly on the remote.
	pub fn apply_external(&self, account: AccountId, delta: Balance) {
		let mut inner = self.lock();
		*inner.balances.entry(account).or_insert(0) += delta;
	}

	pub fn set_unreachable(&self, unreachable: bool) {
		self.lock().unreachable = unreachable;
	}

	pub fn inject_fault(&self, fault: Fault) {
		self.lock().faults.push_back(fault);
	}

	pub fn balance(&self, account: &AccountId) -> Balance {
		self.lock().balances.get(account).copied().unwrap_or(0)
	}

	/// Ids of the operations the remote has applied, in application order.
	pub fn applied(&self) -> Vec<OperationId> {
		self.lock().applied.clone()
	}

	/// Number of submissions received, including repeats.
	pub fn submissions(&self) -> usize {
		self.lock().submissions
	}

	fn decide(&self, inner: &mut RemoteLedger, op: &Operation) -> SubmitOutcome {
		let Ok(amount) = Balance::try_from(op.amount()) else {
			return SubmitOutcome::Rejected(RejectReason::Invalid {
				message: format!("amount of {} is out of range", op.id()),
			});
		};
		if matches!(op.kind(), OperationKind::PayTab | OperationKind::TransferTab) {
			let current = inner.balances.get(op.source()).copied().unwrap_or(0);
			let below_floor = current
				.checked_sub(amount)
				.is_none_or(|after| after < self.floor);
			if below_floor {
				return SubmitOutcome::Rejected(RejectReason::BalanceFloor {
					account: op.source().clone(),
					remote_balance: current,
					floor: self.floor,
				});
			}
		}
		if op.kind() == OperationKind::TransferTab && op.target().is_none() {
			return SubmitOutcome::Rejected(RejectReason::Invalid {
				message: format!("transfer {} has no target", op.id()),
			});
		}

		for (account, delta) in op.deltas() {
			*inner.balances.entry(account.clone()).or_insert(0) += delta;
		}
		inner.applied.push(op.id().clone());
		SubmitOutcome::Accepted {
			remote_balance: inner.balances.get(op.source()).copied(),
		}
	}
}

#[async_trait::async_trait]
impl RemoteStore for InMemoryRemoteStore {
	async fn submit_operation(&self, op: &Operation) -> SubmitOutcome {
		let fault = {
			let mut inner = self.lock();
			inner.submissions += 1;
			if inner.unreachable {
				return SubmitOutcome::Unreachable("remote offline".to_string());
			}
			inner.faults.pop_front()
		};

		if let Some(Fault::Delay(delay)) = &fault {
			tokio::time::sleep(*delay).await;
		}
		if fault == Some(Fault::Unreachable) {
			return SubmitOutcome::Unreachable("injected transport failure".to_string());
		}

		let outcome = {
			let mut inner = self.lock();
			let previous = inner.decisions.get(op.id()).cloned();
			match previous {
				Some(previous) => {
					debug!("Remote already decided {}, returning recorded outcome", op.id());
					previous
				}
				None => {
					let outcome = self.decide(&mut inner, op);
					inner.decisions.insert(op.id().clone(), outcome.clone());
					outcome
				}
			}
		};

		if fault == Some(Fault::DropResponse) {
			return SubmitOutcome::Unreachable("connection lost before response".to_string());
		}
		outcome
	}

	async fn probe(&self) -> bool {
		!self.lock().unreachable
	}

	fn name(&self) -> &'static str {
		"InMemoryRemoteStore"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::types::OperationIntent;
	use chrono::Utc;

	fn op(seq: u64, intent: OperationIntent) -> Operation {
		Operation::new(OperationId::new("dev", seq), intent, Utc::now())
	}

	#[tokio::test]
	async fn test_resubmission_is_not_applied_twice() {
		let remote = InMemoryRemoteStore::new(0);
		let deposit = op(1, OperationIntent::deposit("a".into(), 5));
		remote.inject_fault(Fault::DropResponse);

		assert!(matches!(
			remote.submit_operation(&deposit).await,
			SubmitOutcome::Unreachable(_)
		));
		assert!(matches!(
			remote.submit_operation(&deposit).await,
			SubmitOutcome::Accepted {
				remote_balance: Some(5)
			}
		));
		assert_eq!(remote.balance(&"a".into()), 5);
		assert_eq!(remote.applied().len(), 1);
		assert_eq!(remote.submissions(), 2);
	}

	#[tokio::test]
	async fn test_pay_far_below_floor_is_rejected_without_overflow() {
		let remote = InMemoryRemoteStore::new(0);
		remote.apply_external("a".into(), -Balance::MAX);
		let pay = op(1, OperationIntent::pay_tab("a".into(), 10));
		assert!(matches!(
			remote.submit_operation(&pay).await,
			SubmitOutcome::Rejected(RejectReason::BalanceFloor { .. })
		));
		assert_eq!(remote.balance(&"a".into()), -Balance::MAX);
		assert!(remote.applied().is_empty());
	}

	#[tokio::test]
	async fn test_floor_includes_external_operations() {
		let remote = InMemoryRemoteStore::new(0);
		remote.apply_external("a".into(), 3);
		let pay = op(1, OperationIntent::pay_tab("a".into(), 4));
		assert!(matches!(
			remote.submit_operation(&pay).await,
			SubmitOutcome::Rejected(RejectReason::BalanceFloor {
				remote_balance: 3,
				..
			})
		));
		assert_eq!(remote.balance(&"a".into()), 3);
	}

	#[tokio::test]
	async fn test_unreachable_store_fails_probe() {
		let remote = InMemoryRemoteStore::new(0);
		assert!(remote.probe().await);
		remote.set_unreachable(true);
		assert!(!remote.probe().await);
	}
}
