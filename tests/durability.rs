use kasse_sync::cashier::CashierSession;
use kasse_sync::ledger::{
	Ledger, LedgerConfig, LedgerPersistence, OperationIntent, PersistenceError, SyncStatus,
};
use kasse_sync::remote::{InMemoryRemoteStore, RejectReason};
use kasse_sync::sync::{ReconcilerConfig, SyncOutcome, SyncReconciler};

use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

async fn open(dir: &TempDir) -> (Arc<Ledger>, LedgerPersistence) {
	let persistence = LedgerPersistence::new(dir.path().to_path_buf());
	persistence.prepare().await.unwrap();
	let ledger = Ledger::open(LedgerConfig::default(), persistence.clone())
		.await
		.unwrap();
	(Arc::new(ledger), persistence)
}

#[tokio::test]
async fn test_offline_operations_survive_restart() {
	let dir = TempDir::new().unwrap();
	let device_id = {
		let (ledger, _) = open(&dir).await;
		ledger.register_member("a".into(), "A").await.unwrap();
		ledger
			.commit(OperationIntent::deposit("a".into(), 5))
			.await
			.unwrap();
		ledger
			.commit(OperationIntent::pay_tab("a".into(), 3))
			.await
			.unwrap();
		ledger.device_id().to_string()
	};

	let (ledger, persistence) = open(&dir).await;
	assert_eq!(ledger.device_id(), device_id);
	let entries = ledger.log().entries();
	assert_eq!(entries.len(), 2);
	assert!(entries.iter().all(|op| op.status() == SyncStatus::Pending));
	assert_eq!(ledger.store().balance(&"a".into()), Some(2));

	// Reconnect after the restart and drain the log.
	let remote = Arc::new(InMemoryRemoteStore::new(0));
	let reconciler = SyncReconciler::new(
		ReconcilerConfig::default(),
		ledger.clone(),
		remote.clone(),
		persistence.cursor(),
	)
	.await
	.unwrap();
	let report = reconciler.reconcile().await.unwrap();
	assert_eq!(report.outcome, SyncOutcome::Completed);
	assert_eq!(remote.balance(&"a".into()), 2);
}

#[tokio::test]
async fn test_cursor_and_statuses_survive_restart() {
	let dir = TempDir::new().unwrap();
	let remote = Arc::new(InMemoryRemoteStore::new(0));
	{
		let (ledger, persistence) = open(&dir).await;
		ledger.register_member("a".into(), "A").await.unwrap();
		ledger
			.commit(OperationIntent::deposit("a".into(), 5))
			.await
			.unwrap();
		let reconciler = SyncReconciler::new(
			ReconcilerConfig::default(),
			ledger.clone(),
			remote.clone(),
			persistence.cursor(),
		)
		.await
		.unwrap();
		reconciler.reconcile().await.unwrap();
		ledger
			.commit(OperationIntent::deposit("a".into(), 1))
			.await
			.unwrap();
	}

	let (ledger, persistence) = open(&dir).await;
	let reconciler = SyncReconciler::new(
		ReconcilerConfig::default(),
		ledger.clone(),
		remote.clone(),
		persistence.cursor(),
	)
	.await
	.unwrap();
	assert_eq!(reconciler.cursor().position(), 1);
	assert_eq!(ledger.log().pending_count(), 1);

	let report = reconciler.reconcile().await.unwrap();
	assert_eq!(report.accepted, 1);
	assert_eq!(remote.submissions(), 2);
	assert_eq!(remote.balance(&"a".into()), 6);
}

#[tokio::test]
async fn test_torn_journal_tail_is_discarded() {
	let dir = TempDir::new().unwrap();
	{
		let (ledger, _) = open(&dir).await;
		ledger.register_member("a".into(), "A").await.unwrap();
		ledger
			.commit(OperationIntent::deposit("a".into(), 5))
			.await
			.unwrap();
	}

	let mut journal = std::fs::OpenOptions::new()
		.append(true)
		.open(dir.path().join("operations.log"))
		.unwrap();
	journal.write_all(br#"{"record":"appended","operat"#).unwrap();
	drop(journal);

	let (ledger, _) = open(&dir).await;
	assert_eq!(ledger.log().len(), 1);
	assert_eq!(ledger.store().balance(&"a".into()), Some(5));

	// The next append lands on a clean line and is readable after another restart.
	ledger
		.commit(OperationIntent::deposit("a".into(), 2))
		.await
		.unwrap();
	drop(ledger);
	let (ledger, _) = open(&dir).await;
	assert_eq!(ledger.log().len(), 2);
	assert_eq!(ledger.store().balance(&"a".into()), Some(7));
}

#[tokio::test]
async fn test_interior_corruption_is_an_error() {
	let dir = TempDir::new().unwrap();
	{
		let (ledger, _) = open(&dir).await;
		ledger.register_member("a".into(), "A").await.unwrap();
		ledger
			.commit(OperationIntent::deposit("a".into(), 5))
			.await
			.unwrap();
	}

	let path = dir.path().join("operations.log");
	let content = std::fs::read_to_string(&path).unwrap();
	std::fs::write(&path, format!("not json\n{}", content)).unwrap();

	let persistence = LedgerPersistence::new(dir.path().to_path_buf());
	let result = Ledger::open(LedgerConfig::default(), persistence).await;
	assert!(matches!(
		result,
		Err(kasse_sync::ledger::LedgerError::Log(
			kasse_sync::ledger::LogError::Persistence(PersistenceError::Corrupt(_))
		))
	));
}

#[tokio::test]
async fn test_invalid_utf8_inside_journal_is_an_error() {
	let dir = TempDir::new().unwrap();
	{
		let (ledger, _) = open(&dir).await;
		ledger.register_member("ab".into(), "AB").await.unwrap();
		ledger
			.commit(OperationIntent::deposit("ab".into(), 5))
			.await
			.unwrap();
		ledger
			.commit(OperationIntent::deposit("ab".into(), 1))
			.await
			.unwrap();
	}

	let path = dir.path().join("operations.log");
	let mut bytes = std::fs::read(&path).unwrap();
	let at = bytes.windows(4).position(|w| w == b"\"ab\"").unwrap();
	bytes[at + 2] = 0xFF;
	std::fs::write(&path, bytes).unwrap();

	let persistence = LedgerPersistence::new(dir.path().to_path_buf());
	let result = Ledger::open(LedgerConfig::default(), persistence).await;
	assert!(matches!(
		result,
		Err(kasse_sync::ledger::LedgerError::Log(
			kasse_sync::ledger::LogError::Persistence(PersistenceError::Corrupt(_))
		))
	));
}

#[tokio::test]
async fn test_conflict_survives_restart_until_acknowledged() {
	let dir = TempDir::new().unwrap();
	let remote = Arc::new(InMemoryRemoteStore::new(0));
	{
		let (ledger, persistence) = open(&dir).await;
		ledger.register_member("a".into(), "A").await.unwrap();
		ledger
			.commit(OperationIntent::deposit("a".into(), 5))
			.await
			.unwrap();
		// Another device spent most of the balance already.
		remote.apply_external("a".into(), -4);
		ledger
			.commit(OperationIntent::pay_tab("a".into(), 3))
			.await
			.unwrap();

		// No session is listening, as if the process died before the notice was shown.
		let reconciler = SyncReconciler::new(
			ReconcilerConfig::default(),
			ledger.clone(),
			remote.clone(),
			persistence.cursor(),
		)
		.await
		.unwrap();
		let report = reconciler.reconcile().await.unwrap();
		assert_eq!(report.rejected, 1);
	}

	let (ledger, _) = open(&dir).await;
	let session = CashierSession::new(ledger.clone());
	let conflicts = session.conflicts();
	assert_eq!(conflicts.len(), 1);
	assert_eq!(conflicts[0].operation.amount(), 3);
	assert!(matches!(
		conflicts[0].reason,
		RejectReason::BalanceFloor { remote_balance: 1, .. }
	));
	assert_eq!(ledger.store().balance(&"a".into()), Some(5));

	let id = conflicts[0].id().clone();
	assert!(session.acknowledge(&id).await.unwrap().is_some());
	drop(session);
	drop(ledger);

	let (ledger, _) = open(&dir).await;
	assert!(CashierSession::new(ledger.clone()).conflicts().is_empty());
	assert_eq!(
		ledger.log().get(&id).map(|op| op.status()),
		Some(SyncStatus::Rejected)
	);
}

#[tokio::test]
async fn test_compaction_survives_restart() {
	let dir = TempDir::new().unwrap();
	{
		let (ledger, persistence) = open(&dir).await;
		ledger.register_member("a".into(), "A").await.unwrap();
		ledger
			.commit(OperationIntent::deposit("a".into(), 5))
			.await
			.unwrap();
		let reconciler = SyncReconciler::new(
			ReconcilerConfig::default(),
			ledger.clone(),
			Arc::new(InMemoryRemoteStore::new(0)),
			persistence.cursor(),
		)
		.await
		.unwrap();
		reconciler.reconcile().await.unwrap();
		ledger
			.commit(OperationIntent::pay_tab("a".into(), 2))
			.await
			.unwrap();

		let removed = ledger
			.compact(chrono::Utc::now() + chrono::Duration::seconds(1))
			.await
			.unwrap();
		assert_eq!(removed, 1);
	}

	let (ledger, _) = open(&dir).await;
	assert_eq!(ledger.log().len(), 1);
	assert_eq!(ledger.store().balance(&"a".into()), Some(3));
	assert_eq!(ledger.store().account(&"a".into()).unwrap().settled_balance, 5);
}
