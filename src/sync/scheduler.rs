use crate::connectivity::SyncRequested;
use crate::sync::reconciler::{ShutdownHandle, SyncOutcome, SyncReconciler, SyncReport};

use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Background task turning sync requests into reconcile runs.
///
/// Requests come from the connectivity monitor and from `trigger`. Requests that arrive
/// while a run is in flight are coalesced into one follow-up run.
pub struct SyncScheduler {
    trigger_tx: mpsc::Sender<()>,
    reports: watch::Receiver<Option<SyncReport>>,
    shutdown: ShutdownHandle,
    task: JoinHandle<()>,
}

impl SyncScheduler {
    pub fn spawn(
        reconciler: Arc<SyncReconciler>,
        requests: broadcast::Receiver<SyncRequested>,
    ) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (reports_tx, reports) = watch::channel(None);
        let shutdown = reconciler.shutdown_handle();

        let task = tokio::spawn(run_loop(
            reconciler,
            Some(requests),
            trigger_rx,
            reports_tx,
            shutdown.clone(),
        ));

        Self {
            trigger_tx,
            reports,
            shutdown,
            task,
        }
    }

    /// Requests a run. A request already queued absorbs this one.
    pub fn trigger(&self) {
        if self.trigger_tx.try_send(()).is_err() {
            debug!("Sync already queued");
        }
    }

    pub fn latest_report(&self) -> Option<SyncReport> {
        self.reports.borrow().clone()
    }

    pub fn subscribe_reports(&self) -> watch::Receiver<Option<SyncReport>> {
        self.reports.clone()
    }

    /// Cancels any in-flight run and waits for the task to stop.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!("Sync scheduler task failed: {}", e);
        }
    }
}

async fn next_request(requests: &mut Option<broadcast::Receiver<SyncRequested>>) -> Option<()> {
    let receiver = requests.as_mut()?;
    match receiver.recv().await {
        Ok(request) => {
            debug!("Sync requested after connectivity confirmed at {}", request.confirmed_at);
            Some(())
        }
        Err(RecvError::Lagged(missed)) => {
            debug!("Coalescing {} missed sync requests", missed);
            Some(())
        }
        Err(RecvError::Closed) => {
            warn!("Connectivity monitor stopped, only manual sync triggers remain");
            *requests = None;
            None
        }
    }
}

async fn wait_for_request(requests: &mut Option<broadcast::Receiver<SyncRequested>>) -> Option<()> {
    if requests.is_none() {
        return std::future::pending().await;
    }
    next_request(requests).await
}

fn drain_queued(
    requests: &mut Option<broadcast::Receiver<SyncRequested>>,
    trigger_rx: &mut mpsc::Receiver<()>,
) {
    while trigger_rx.try_recv().is_ok() {}
    if let Some(receiver) = requests {
        loop {
            match receiver.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }
}

async fn run_loop(
    reconciler: Arc<SyncReconciler>,
    mut requests: Option<broadcast::Receiver<SyncRequested>>,
    mut trigger_rx: mpsc::Receiver<()>,
    reports_tx: watch::Sender<Option<SyncReport>>,
    shutdown: ShutdownHandle,
) {
    info!("Sync scheduler started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(()) = trigger_rx.recv() => debug!("Manual sync triggered"),
            Some(()) = wait_for_request(&mut requests) => {}
        }

        drain_queued(&mut requests, &mut trigger_rx);

        match reconciler.reconcile().await {
            Ok(report) => {
                if report.outcome == SyncOutcome::SyncInProgress {
                    debug!("Reconcile already running elsewhere, skipping");
                }
                reports_tx.send_replace(Some(report));
            }
            Err(e) => error!("Reconciliation failed: {}", e),
        }
    }

    info!("Sync scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Ledger, LedgerConfig, LedgerPersistence, OperationIntent};
    use crate::remote::InMemoryRemoteStore;
    use crate::sync::cursor::InMemoryCursorRepository;
    use crate::sync::reconciler::ReconcilerConfig;
    use chrono::Utc;

    async fn reconciler() -> Arc<SyncReconciler> {
        let ledger = Arc::new(
            Ledger::open(LedgerConfig::default(), LedgerPersistence::in_memory())
                .await
                .unwrap(),
        );
        ledger.register_member("a".into(), "A").await.unwrap();
        ledger
            .commit(OperationIntent::deposit("a".into(), 2))
            .await
            .unwrap();
        Arc::new(
            SyncReconciler::new(
                ReconcilerConfig::default(),
                ledger,
                Arc::new(InMemoryRemoteStore::new(0)),
                Arc::new(InMemoryCursorRepository::new()),
            )
            .await
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_sync_request_triggers_run() {
        let reconciler = reconciler().await;
        let (tx, rx) = broadcast::channel(4);
        let scheduler = SyncScheduler::spawn(reconciler.clone(), rx);
        let mut reports = scheduler.subscribe_reports();

        tx.send(SyncRequested {
            confirmed_at: Utc::now(),
        })
        .unwrap();
        reports.changed().await.unwrap();

        let report = scheduler.latest_report().unwrap();
        assert_eq!(report.outcome, SyncOutcome::Completed);
        assert_eq!(report.accepted, 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_trigger_and_shutdown() {
        let reconciler = reconciler().await;
        let (_tx, rx) = broadcast::channel(4);
        let scheduler = SyncScheduler::spawn(reconciler.clone(), rx);
        let mut reports = scheduler.subscribe_reports();

        scheduler.trigger();
        reports.changed().await.unwrap();
        assert_eq!(reconciler.ledger().log().pending_count(), 0);

        scheduler.shutdown().await;
        assert!(reconciler.shutdown_handle().is_cancelled());
    }
}
