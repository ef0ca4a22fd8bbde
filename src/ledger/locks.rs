use crate::ledger::types::AccountId;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// Per-account mutual exclusion, so commits on unrelated accounts never wait on each other.
#[derive(Default)]
pub struct AccountLocks {
	locks: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
}

impl AccountLocks {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock_for(&self, account: &AccountId) -> Arc<tokio::sync::Mutex<()>> {
		self.locks
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.entry(account.clone())
			.or_default()
			.clone()
	}

	/// Locks every given account in sorted order; duplicates are locked once.
	pub async fn lock_all(&self, accounts: &[AccountId]) -> Vec<OwnedMutexGuard<()>> {
		let mut accounts = accounts.to_vec();
		accounts.sort();
		accounts.dedup();

		let mut guards = Vec::with_capacity(accounts.len());
		for account in &accounts {
			guards.push(self.lock_for(account).lock_owned().await);
		}
		guards
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[tokio::test]
	async fn test_unrelated_accounts_do_not_block() {
		let locks = AccountLocks::new();
		let _a = locks.lock_all(&["a".into()]).await;
		let b = tokio::time::timeout(Duration::from_millis(50), locks.lock_all(&["b".into()])).await;
		assert!(b.is_ok());
	}

	#[tokio::test]
	async fn test_same_account_waits() {
		let locks = AccountLocks::new();
		let _guards = locks.lock_all(&["b".into(), "a".into(), "a".into()]).await;
		assert_eq!(_guards.len(), 2);
		let again = tokio::time::timeout(Duration::from_millis(50), locks.lock_all(&["a".into()])).await;
		assert!(again.is_err());
	}
}
