//! Progress tracking for reconcile runs.
//!
//! `SyncProgressTracker` counts what the remote store decided during one run and which
//! sequence numbers those decisions covered. Since the cursor moves past every decided
//! operation in log order, the decided sequence numbers of a run are expected to be
//! contiguous; gaps are reported as warnings.

use crate::ledger::types::OperationId;

use itertools::Itertools;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Service for tracking reconcile progress
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    /// Cursor position when the run started
    start_position: u64,
    /// Highest sequence number decided in this run
    highest_decided: u64,
    /// Every sequence number decided in this run
    decided: BTreeSet<u64>,
    /// Submissions sent, including ones that got no answer
    submitted: usize,
    accepted: usize,
    rejected: Vec<OperationId>,
    /// Decision count at the last progress log line
    last_logged: usize,
    log_interval: usize,
}

impl SyncProgressTracker {
    pub fn new(start_position: u64, log_interval: usize) -> Self {
        Self {
            start_position,
            highest_decided: start_position,
            decided: BTreeSet::new(),
            submitted: 0,
            accepted: 0,
            rejected: Vec::new(),
            last_logged: 0,
            log_interval: log_interval.max(1),
        }
    }

    pub fn record_submitted(&mut self) {
        self.submitted += 1;
    }

    fn record_decided(&mut self, id: &OperationId) {
        self.highest_decided = self.highest_decided.max(id.seq);
        self.decided.insert(id.seq);
    }

    pub fn record_accepted(&mut self, id: &OperationId) {
        self.record_decided(id);
        self.accepted += 1;
    }

    pub fn record_rejected(&mut self, id: &OperationId) {
        self.record_decided(id);
        self.rejected.push(id.clone());
    }

    pub fn decided(&self) -> usize {
        self.decided.len()
    }

    /// Ranges of sequence numbers skipped between decisions, as (before, after) pairs.
    pub fn check_for_gaps(&self) -> Vec<(u64, u64)> {
        std::iter::once(self.start_position)
            .chain(self.decided.iter().copied())
            .tuple_windows()
            .filter(|(a, b)| b - a > 1)
            .collect()
    }

    /// Log progress every `log_interval` decisions or when forced
    pub fn log_progress(&mut self, force: bool) {
        let since_last = self.decided().saturating_sub(self.last_logged);
        if (force || since_last >= self.log_interval) && self.decided() > 0 {
            info!(
                "Sync progress: {} accepted, {} rejected, cursor at {}",
                self.accepted,
                self.rejected.len(),
                self.highest_decided
            );
            self.last_logged = self.decided();
        }
    }

    pub fn get_stats(&self, remaining_pending: usize) -> SyncStats {
        let gaps = self.check_for_gaps();
        for (before, after) in &gaps {
            warn!(
                "Decided operations skipped sequence numbers between {} and {}",
                before, after
            );
        }

        SyncStats {
            start_position: self.start_position,
            end_position: self.highest_decided,
            submitted: self.submitted,
            accepted: self.accepted,
            rejected: self.rejected.clone(),
            remaining_pending,
            gaps,
        }
    }
}

/// Statistics about one reconcile run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub start_position: u64,
    pub end_position: u64,
    pub submitted: usize,
    pub accepted: usize,
    pub rejected: Vec<OperationId>,
    pub remaining_pending: usize,
    pub gaps: Vec<(u64, u64)>,
}

impl SyncStats {
    /// Get a human-readable summary of the run
    pub fn summary(&self) -> String {
        format!(
            "Sync from {} to {}: {} submitted, {} accepted, {} rejected{}, {} still pending{}",
            self.start_position,
            self.end_position,
            self.submitted,
            self.accepted,
            self.rejected.len(),
            if self.rejected.is_empty() {
                String::new()
            } else {
                format!(" ({})", self.rejected.iter().join(", "))
            },
            self.remaining_pending,
            if self.gaps.is_empty() {
                String::new()
            } else {
                format!(" ({} gaps)", self.gaps.len())
            }
        )
    }
}
