//! Event system for ledger synchronization.
//!
//! The reconciler emits a `SyncEvent` at each step of a run: when it starts, for every
//! decision the remote store returns, when it is interrupted and when it completes.
//! Registered handlers receive every event. This keeps the reconciler independent of the
//! cashier-facing conflict inbox and of anything else that wants to observe a run.

use crate::ledger::types::{Balance, Operation, OperationId};
use crate::remote::RejectReason;
use crate::sync::SyncError;
use crate::sync::progress_tracker::SyncStats;

use chrono::{DateTime, Utc};

/// Events that occur during a reconcile run
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A run started with this many pending operations after the cursor
    RunStarted { pending: usize },
    /// The remote store accepted an operation
    OperationAccepted {
        id: OperationId,
        remote_balance: Option<Balance>,
    },
    /// The remote store rejected an operation and its local effect was rolled back
    OperationRejected {
        operation: Operation,
        reason: RejectReason,
        rejected_at: DateTime<Utc>,
    },
    /// The run stopped early; the remaining operations stay pending
    Interrupted { reason: String },
    /// The run drained every pending operation
    RunCompleted { stats: SyncStats },
}

/// Trait for handling sync events.
///
/// Implementors receive all sync events and can perform side effects or state updates.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
    /// Handle a sync event.
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
///
/// Handlers are called in the order they are registered.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Box<dyn SyncEventHandler>>,
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new event handler.
    pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&mut self, event: &SyncEvent) {
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing;

    #[async_trait::async_trait]
    impl SyncEventHandler for Failing {
        async fn handle(&mut self, _event: &SyncEvent) -> Result<(), SyncError> {
            Err(SyncError::HandlerError("always fails".to_string()))
        }

        fn name(&self) -> &'static str {
            "Failing"
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl SyncEventHandler for Counting {
        async fn handle(&mut self, _event: &SyncEvent) -> Result<(), SyncError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Counting"
        }
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_others() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(Box::new(Failing));
        dispatcher.register_handler(Box::new(Counting(seen.clone())));
        assert_eq!(dispatcher.handler_count(), 2);

        dispatcher.dispatch(&SyncEvent::RunStarted { pending: 1 }).await;
        dispatcher
            .dispatch(&SyncEvent::Interrupted {
                reason: "offline".to_string(),
            })
            .await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
