use crate::ledger::types::Operation;
use crate::remote::http::HttpRemoteStore;
use crate::remote::types::{RemoteConfig, RemoteError, SubmitOutcome};

use std::sync::Arc;
use tracing::info;

/// Capability interface of the remote ledger service.
///
/// Implementations must be idempotent per operation id: submitting an id the remote has
/// already decided on returns that decision without applying the operation again.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
	/// Submit one operation. Transport failures are reported as `Unreachable`.
	async fn submit_operation(&self, op: &Operation) -> SubmitOutcome;

	/// Liveness probe; `true` only if the remote is actually reachable.
	async fn probe(&self) -> bool;

	/// Get the name of this store for logging and diagnostics.
	fn name(&self) -> &'static str;
}

/// Remote store used when no remote service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRemoteStore;

#[async_trait::async_trait]
impl RemoteStore for DisabledRemoteStore {
	async fn submit_operation(&self, _op: &Operation) -> SubmitOutcome {
		SubmitOutcome::Unreachable("remote store disabled".to_string())
	}

	async fn probe(&self) -> bool {
		false
	}

	fn name(&self) -> &'static str {
		"DisabledRemoteStore"
	}
}

/// Builds the remote store described by the configuration.
pub fn from_config(config: &RemoteConfig) -> Result<Arc<dyn RemoteStore>, RemoteError> {
	match &config.url {
		Some(url) => {
			info!("Using remote ledger service at {}", url);
			Ok(Arc::new(HttpRemoteStore::new(config)?))
		}
		None => {
			info!("No remote store configured, running in local-only mode");
			Ok(Arc::new(DisabledRemoteStore))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::types::{AccountId, OperationId, OperationIntent};
	use chrono::Utc;

	#[tokio::test]
	async fn test_disabled_store_is_always_unreachable() {
		let store = from_config(&RemoteConfig::default()).unwrap();
		assert_eq!(store.name(), "DisabledRemoteStore");
		assert!(!store.probe().await);

		let op = Operation::new(
			OperationId::new("dev", 1),
			OperationIntent::deposit(AccountId::from("a"), 1),
			Utc::now(),
		);
		assert!(matches!(
			store.submit_operation(&op).await,
			SubmitOutcome::Unreachable(_)
		));
	}
}
