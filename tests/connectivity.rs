use kasse_sync::connectivity::{
	ConnectivityConfig, ConnectivityMonitor, ConnectivityState, TransportSignal, signal_channel,
};
use kasse_sync::ledger::{Ledger, LedgerConfig, LedgerPersistence, OperationIntent, SyncStatus};
use kasse_sync::remote::InMemoryRemoteStore;
use kasse_sync::sync::{InMemoryCursorRepository, ReconcilerConfig, SyncReconciler, SyncScheduler};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

fn alternating(count: usize) -> impl Iterator<Item = TransportSignal> {
	[TransportSignal::Online, TransportSignal::Offline]
		.into_iter()
		.cycle()
		.take(count)
}

#[tokio::test(start_paused = true)]
async fn test_flapping_produces_at_most_one_sync_request() {
	for transitions in [4, 5] {
		let monitor = Arc::new(ConnectivityMonitor::new(
			ConnectivityConfig::default(),
			Arc::new(InMemoryRemoteStore::new(0)),
		));
		let mut requests = monitor.subscribe_sync_requests();
		let (tx, signals) = signal_channel();
		let runner = monitor.clone();
		tokio::spawn(async move { runner.run(signals).await });

		// All transitions land inside two seconds.
		for signal in alternating(transitions) {
			tx.send(signal);
			tokio::time::sleep(Duration::from_millis(390)).await;
		}
		tokio::time::sleep(Duration::from_secs(10)).await;

		let mut received = 0;
		while !matches!(requests.try_recv(), Err(TryRecvError::Empty)) {
			received += 1;
		}
		assert!(received <= 1, "{} transitions gave {} requests", transitions, received);

		let expected = if transitions % 2 == 1 {
			ConnectivityState::Online
		} else {
			ConnectivityState::Offline
		};
		assert_eq!(monitor.current_state(), expected);
	}
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_reconnect_drains_pending_operations() {
	let ledger = Arc::new(
		Ledger::open(LedgerConfig::default(), LedgerPersistence::in_memory())
			.await
			.unwrap(),
	);
	ledger.register_member("a".into(), "A").await.unwrap();
	ledger
		.commit(OperationIntent::deposit("a".into(), 4))
		.await
		.unwrap();

	let remote = Arc::new(InMemoryRemoteStore::new(0));
	let monitor = Arc::new(ConnectivityMonitor::new(
		ConnectivityConfig::default(),
		remote.clone(),
	));
	let reconciler = Arc::new(
		SyncReconciler::new(
			ReconcilerConfig::default(),
			ledger.clone(),
			remote.clone(),
			Arc::new(InMemoryCursorRepository::new()),
		)
		.await
		.unwrap(),
	);
	let scheduler = SyncScheduler::spawn(reconciler, monitor.subscribe_sync_requests());
	let mut reports = scheduler.subscribe_reports();

	let (tx, signals) = signal_channel();
	let runner = monitor.clone();
	tokio::spawn(async move { runner.run(signals).await });
	tx.send(TransportSignal::Online);

	reports.changed().await.unwrap();
	assert_eq!(
		ledger.log().entries()[0].status(),
		SyncStatus::Synced
	);
	assert_eq!(remote.balance(&"a".into()), 4);
	scheduler.shutdown().await;
}
