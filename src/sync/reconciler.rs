//! Reconciliation of the local operation log with the remote store.
//!
//! A run drains the pending operations after the cursor in log order and submits each one
//! with a timeout. Every decision is recorded in the log before the cursor moves past the
//! operation, and the cursor is persisted after each step, so an interrupted run resumes
//! exactly where it stopped. Operations without a decision stay `Pending` and are
//! resubmitted on the next run; the remote store deduplicates by operation id.

use crate::ledger::types::{Operation, OperationId, Rejection, SyncStatus};
use crate::ledger::{Ledger, LedgerError, LogError};
use crate::remote::{RemoteStore, SubmitOutcome};
use crate::sync::SyncError;
use crate::sync::cursor::{CursorRepository, SyncCursor};
use crate::sync::events::{EventDispatcher, SyncEvent, SyncEventHandler};
use crate::sync::progress_tracker::{SyncProgressTracker, SyncStats};

use chrono::Utc;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Configuration for reconcile runs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Upper bound for one submission, including the remote's answer
    pub submit_timeout_ms: u64,
    /// Log a progress line every this many decisions
    pub progress_log_interval: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            submit_timeout_ms: 10_000,
            progress_log_interval: 100,
        }
    }
}

impl ReconcilerConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
}

/// How a reconcile run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every pending operation got a decision
    Completed,
    /// Another run holds the guard; nothing was done
    SyncInProgress,
    /// The remote became unreachable or a submission timed out
    Interrupted { reason: String },
    /// Shutdown was requested
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub accepted: usize,
    pub rejected: usize,
    pub remaining_pending: usize,
    pub cursor: SyncCursor,
    pub stats: SyncStats,
}

/// Requests shutdown of a reconciler. Cancellation is permanent.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Aborts the current run at the next operation boundary, or while a submission is in
    /// flight, and makes every later run return `Cancelled`.
    pub fn cancel(&self) {
        if !self.tx.send_replace(true) {
            info!("Reconciler shutdown requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Releases the re-entrancy flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncReconciler {
    config: ReconcilerConfig,
    ledger: Arc<Ledger>,
    remote: Arc<dyn RemoteStore>,
    cursor_repo: Arc<dyn CursorRepository>,
    cursor: Mutex<SyncCursor>,
    running: AtomicBool,
    dispatcher: tokio::sync::Mutex<EventDispatcher>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SyncReconciler {
    /// Creates a reconciler, restoring the persisted cursor if there is one.
    pub async fn new(
        config: ReconcilerConfig,
        ledger: Arc<Ledger>,
        remote: Arc<dyn RemoteStore>,
        cursor_repo: Arc<dyn CursorRepository>,
    ) -> Result<Self, SyncError> {
        let cursor = match cursor_repo.load().await? {
            Some(cursor) => {
                info!("Restored sync cursor at position {}", cursor.position());
                cursor
            }
            None => SyncCursor::default(),
        };
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            ledger,
            remote,
            cursor_repo,
            cursor: Mutex::new(cursor),
            running: AtomicBool::new(false),
            dispatcher: tokio::sync::Mutex::new(EventDispatcher::new()),
            shutdown: Arc::new(shutdown),
        })
    }

    pub async fn register_handler(&self, handler: Box<dyn SyncEventHandler>) {
        debug!("Registering sync event handler {}", handler.name());
        self.dispatcher.lock().await.register_handler(handler);
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    pub fn cursor(&self) -> SyncCursor {
        self.cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs one reconciliation pass.
    ///
    /// Returns immediately with `SyncInProgress` if another pass is running. Informational
    /// outcomes are reported in the `SyncReport`; errors are reserved for local failures
    /// such as an unwritable journal or cursor file.
    pub async fn reconcile(&self) -> Result<SyncReport, SyncError> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            debug!("Reconcile requested while another run is in flight");
            return Ok(self.report(SyncOutcome::SyncInProgress, SyncStats::default()));
        };

        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(self.report(SyncOutcome::Cancelled, SyncStats::default()));
        }

        let start = self.cursor();
        let log = self.ledger.log();
        let mut tracker =
            SyncProgressTracker::new(start.position(), self.config.progress_log_interval);

        let pending_count = log.pending_count();
        info!(
            "Starting reconciliation at position {} with {} pending operations via {}",
            start.position(),
            pending_count,
            self.remote.name()
        );
        self.dispatch(SyncEvent::RunStarted {
            pending: pending_count,
        })
        .await;

        let mut pending = log.pending_since(&start);
        let outcome = loop {
            if *shutdown.borrow() {
                break SyncOutcome::Cancelled;
            }
            let Some(op) = pending.next() else {
                break SyncOutcome::Completed;
            };

            tracker.record_submitted();
            let submission = tokio::time::timeout(
                self.config.submit_timeout(),
                self.remote.submit_operation(&op),
            );
            let answer = tokio::select! {
                biased;
                _ = shutdown.wait_for(|cancelled| *cancelled) => None,
                answer = submission => Some(answer),
            };

            let decision = match answer {
                None => {
                    info!("Cancelled while {} was in flight, it stays pending", op.id());
                    break SyncOutcome::Cancelled;
                }
                Some(Err(_)) => {
                    warn!(
                        "Submitting {} timed out after {:?}",
                        op.id(),
                        self.config.submit_timeout()
                    );
                    break SyncOutcome::Interrupted {
                        reason: format!("submission of {} timed out", op.id()),
                    };
                }
                Some(Ok(decision)) => decision,
            };

            match decision {
                SubmitOutcome::Accepted { remote_balance } => {
                    self.record_decision(&op, None).await?;
                    tracker.record_accepted(op.id());
                    debug!("{} accepted by {}", op.id(), self.remote.name());
                    self.dispatch(SyncEvent::OperationAccepted {
                        id: op.id().clone(),
                        remote_balance,
                    })
                    .await;
                }
                SubmitOutcome::Rejected(reason) => {
                    warn!("{} {} rejected: {}", op.kind(), op.id(), reason);
                    let rejection = Rejection::new(reason, Utc::now());
                    self.record_decision(&op, Some(rejection.clone())).await?;
                    self.ledger.roll_back(op.id()).await?;
                    tracker.record_rejected(op.id());
                    self.dispatch(SyncEvent::OperationRejected {
                        operation: op,
                        reason: rejection.reason,
                        rejected_at: rejection.rejected_at,
                    })
                    .await;
                }
                SubmitOutcome::Unreachable(reason) => {
                    warn!("Remote unreachable while submitting {}: {}", op.id(), reason);
                    break SyncOutcome::Interrupted { reason };
                }
            }

            tracker.log_progress(false);
        };

        tracker.log_progress(true);
        let stats = tracker.get_stats(log.pending_count());

        match &outcome {
            SyncOutcome::Completed => {
                info!("{}", stats.summary());
                self.dispatch(SyncEvent::RunCompleted {
                    stats: stats.clone(),
                })
                .await;
            }
            SyncOutcome::Interrupted { reason } => {
                info!("Reconciliation interrupted: {}", stats.summary());
                self.dispatch(SyncEvent::Interrupted {
                    reason: reason.clone(),
                })
                .await;
            }
            SyncOutcome::Cancelled => {
                self.dispatch(SyncEvent::Interrupted {
                    reason: "cancelled".to_string(),
                })
                .await;
            }
            SyncOutcome::SyncInProgress => {}
        }

        Ok(self.report(outcome, stats))
    }

    /// Marks the operation `Synced`, or `Rejected` when a rejection is given, and moves the
    /// cursor past it.
    async fn record_decision(
        &self,
        op: &Operation,
        rejection: Option<Rejection>,
    ) -> Result<(), SyncError> {
        let marked = match rejection {
            Some(rejection) => self.ledger.mark_rejected(op.id(), rejection).await,
            None => self.ledger.mark_status(op.id(), SyncStatus::Synced).await,
        };
        match marked {
            Ok(()) => {}
            Err(LedgerError::Log(e @ LogError::InvalidTransition { .. })) => {
                error!("Refusing to record decision for {}: {}", op.id(), e);
                debug_assert!(false, "invalid status transition: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
        self.advance_cursor(op.id()).await
    }

    async fn advance_cursor(&self, id: &OperationId) -> Result<(), SyncError> {
        let cursor = {
            let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
            cursor.advance(id);
            cursor.clone()
        };
        self.cursor_repo.save(&cursor).await?;
        Ok(())
    }

    async fn dispatch(&self, event: SyncEvent) {
        self.dispatcher.lock().await.dispatch(&event).await;
    }

    fn report(&self, outcome: SyncOutcome, stats: SyncStats) -> SyncReport {
        SyncReport {
            outcome,
            accepted: stats.accepted,
            rejected: stats.rejected.len(),
            remaining_pending: self.ledger.log().pending_count(),
            cursor: self.cursor(),
            stats,
        }
    }
}
