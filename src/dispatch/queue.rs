// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dispatch queue for the asynchronous dispatcher.
//!
//! # Design
//!
//! ```text
//! producers ──push_with()──▶ ┌──────────────────────────┐
//!   (many)                   │ VecDeque<EventRecord>    │──drain(max)──▶ coalesce() ──▶ batch
//!                            │ bounded, drop-oldest     │     (one loop)
//!           len >= threshold │                          │
//!           ──notify────────▶└──────────────────────────┘
//! ```
//!
//! The record is created *inside* the queue lock, so `origin_sequence`
//! order always matches queue order even with many concurrent producers.
//! The lock is a plain `std` mutex: it is never held across an await and
//! producers never block on I/O.

use crate::event::EventRecord;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Result of offering a record to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued. `evicted` of the oldest records were dropped to make room;
    /// `evicted_remove_all` is set when one of them was a RemoveAll.
    Queued {
        depth: usize,
        evicted: usize,
        evicted_remove_all: bool,
    },
    /// The queue is closed; the record was never created.
    Closed,
}

#[derive(Debug, Default)]
struct QueueInner {
    records: VecDeque<EventRecord>,
    closed: bool,
}

/// Bounded FIFO of pending records with drop-oldest overflow.
#[derive(Debug)]
pub struct DispatchQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    wake_threshold: usize,
    wake: Notify,
}

impl DispatchQueue {
    /// `capacity` and `wake_threshold` are clamped to at least 1.
    pub fn new(capacity: usize, wake_threshold: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            capacity: capacity.max(1),
            wake_threshold: wake_threshold.max(1),
            wake: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn wake_threshold(&self) -> usize {
        self.wake_threshold
    }

    /// Create a record with `make` and append it.
    ///
    /// `make` runs under the queue lock and only if the queue is open.
    pub fn push_with<F>(&self, make: F) -> PushOutcome
    where
        F: FnOnce() -> EventRecord,
    {
        let (depth, evicted, evicted_remove_all) = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.closed {
                return PushOutcome::Closed;
            }
            let mut evicted = 0;
            let mut evicted_remove_all = false;
            while inner.records.len() >= self.capacity {
                if let Some(record) = inner.records.pop_front() {
                    evicted_remove_all |= record.is_remove_all();
                }
                evicted += 1;
            }
            inner.records.push_back(make());
            (inner.records.len(), evicted, evicted_remove_all)
        };

        if depth >= self.wake_threshold {
            self.wake.notify_one();
        }
        PushOutcome::Queued {
            depth,
            evicted,
            evicted_remove_all,
        }
    }

    /// Remove up to `max` records from the front, in order.
    pub fn drain(&self, max: usize) -> Vec<EventRecord> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let n = max.min(inner.records.len());
        inner.records.drain(..n).collect()
    }

    /// Remove everything still queued, returning how many records were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let n = inner.records.len();
        inner.records.clear();
        n
    }

    /// Stop accepting records. Already queued records stay drainable.
    pub fn close(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).closed = true;
        self.wake.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves when the queue crosses the wake threshold (or is closed).
    pub fn notified(&self) -> Notified<'_> {
        self.wake.notified()
    }
}

/// Apply RemoveAll dominance to a drained run.
///
/// Everything before the last RemoveAll is moot: the batch starts at that
/// RemoveAll and keeps the records after it in order. Returns the batch and
/// the number of records discarded.
pub fn coalesce(mut run: Vec<EventRecord>) -> (Vec<EventRecord>, usize) {
    match run.iter().rposition(EventRecord::is_remove_all) {
        Some(0) | None => (run, 0),
        Some(index) => {
            let batch = run.split_off(index);
            (batch, index)
        }
    }
}
