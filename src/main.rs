mod console;

use kasse_sync::cashier::CashierSession;
use kasse_sync::config::{ConfigError, KasseConfig};
use kasse_sync::connectivity::{ConnectivityMonitor, TransportSignal, signal_channel};
use kasse_sync::ledger::{Ledger, LedgerError, LedgerPersistence, PersistenceError};
use kasse_sync::remote::{self, RemoteError};
use kasse_sync::sync::{SyncError, SyncReconciler, SyncScheduler};

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
enum AppError {
	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("Persistence error: {0}")]
	Persistence(#[from] PersistenceError),

	#[error("Ledger error: {0}")]
	Ledger(#[from] LedgerError),

	#[error("Remote store error: {0}")]
	Remote(#[from] RemoteError),

	#[error("Sync error: {0}")]
	Sync(#[from] SyncError),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_writer(std::io::stderr)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	// Exit explicitly: a pending stdin read would otherwise hold up runtime shutdown.
	let code = match run().await {
		Ok(()) => 0,
		Err(e) => {
			error!("{}", e);
			1
		}
	};
	std::process::exit(code);
}

async fn run() -> Result<(), AppError> {
	let config = KasseConfig::load()?;
	info!("Starting kasse sync");

	let persistence = LedgerPersistence::new(config.data_dir.clone());
	persistence.prepare().await?;

	let ledger = Arc::new(Ledger::open(config.ledger.clone(), persistence.clone()).await?);
	match ledger.compact_expired().await {
		Ok(0) => {}
		Ok(removed) => info!("Compacted {} expired operations", removed),
		Err(e) => warn!("Compaction failed, continuing with the full log: {}", e),
	}

	let remote = remote::from_config(&config.remote)?;
	let monitor = Arc::new(ConnectivityMonitor::new(
		config.connectivity.clone(),
		remote.clone(),
	));

	let reconciler = Arc::new(
		SyncReconciler::new(
			config.sync.clone(),
			ledger.clone(),
			remote.clone(),
			persistence.cursor(),
		)
		.await?,
	);

	let session = CashierSession::new(ledger.clone());
	reconciler.register_handler(Box::new(session.inbox())).await;

	let scheduler = SyncScheduler::spawn(reconciler.clone(), monitor.subscribe_sync_requests());

	let (signals_tx, signals) = signal_channel();
	let monitor_task = {
		let monitor = monitor.clone();
		tokio::spawn(async move { monitor.run(signals).await })
	};
	// The console has no link detection of its own; assume the link is up and let the
	// probe decide.
	signals_tx.send(TransportSignal::Online);

	let console = console::Console {
		session: &session,
		ledger: &ledger,
		scheduler: &scheduler,
		monitor: &monitor,
		signals: &signals_tx,
	};

	tokio::select! {
		result = console.run() => result?,
		_ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
	}

	drop(signals_tx);
	scheduler.shutdown().await;
	if let Err(e) = monitor_task.await {
		error!("Connectivity monitor task failed: {}", e);
	}

	info!(
		"Stopped with {} operations awaiting sync",
		ledger.log().pending_count()
	);
	Ok(())
}
