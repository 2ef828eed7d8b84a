// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dispatcher state and statistics types.
//!
//! # State Transitions
//!
//! ```text
//!            shutdown()                 (final flush done
//! Running ─────────────► ShuttingDown ──  or grace expired) ──► Stopped
//! ```
//!
//! A second `shutdown()` in any state is a no-op.

use std::sync::atomic::{AtomicU64, Ordering};

/// State of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Accepting records.
    Running,

    /// No longer accepting records; the final flush is in progress.
    ShuttingDown,

    /// Fully stopped. Every later record is rejected.
    Stopped,
}

impl DispatcherState {
    /// Check if records are still being accepted.
    pub fn is_accepting(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatcherState::Running => write!(f, "Running"),
            DispatcherState::ShuttingDown => write!(f, "ShuttingDown"),
            DispatcherState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Outcome of one asynchronous dispatch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records removed from the queue.
    pub drained: usize,
    /// Records discarded because a later RemoveAll made them moot.
    pub coalesced: usize,
    /// Records in the batch sent to each peer.
    pub batch_size: usize,
    /// Peers whose batched call succeeded.
    pub peers_delivered: usize,
    /// Peers whose batch was dropped this cycle.
    pub peers_failed: usize,
}

/// In-process counters for one replicator.
///
/// This is the statistics sink for callers that don't install a `metrics`
/// recorder. Counters only go up.
#[derive(Debug, Default)]
pub struct ReplicatorStats {
    generated: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    coalesced: AtomicU64,
    overflowed: AtomicU64,
    rejected: AtomicU64,
    abandoned: AtomicU64,
}

impl ReplicatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_generated(&self) {
        self.generated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, count: usize) {
        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, count: usize) {
        self.dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self, count: usize) {
        self.coalesced.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_overflowed(&self, count: usize) {
        self.overflowed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned(&self, count: usize) {
        self.abandoned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            generated: self.generated.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReplicatorStats`].
///
/// `delivered` and `dropped` count record-to-peer deliveries: one record
/// sent to three peers counts three times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Records created from local mutations.
    pub generated: u64,
    /// Record deliveries a peer acknowledged.
    pub delivered: u64,
    /// Record deliveries lost to a failed, timed out, or circuit-rejected call.
    pub dropped: u64,
    /// Records discarded by RemoveAll coalescing.
    pub coalesced: u64,
    /// Records evicted from a full queue.
    pub overflowed: u64,
    /// Mutations ignored because the replicator was shut down.
    pub rejected: u64,
    /// Records still queued when the shutdown grace period ran out.
    pub abandoned: u64,
}
