// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dispatch strategies.
//!
//! A replicator owns exactly one [`Dispatcher`], chosen once at
//! construction from `replicate_asynchronously`:
//!
//! - [`SyncDispatcher`]: delivers each record to every peer inline, before
//!   the mutating call returns.
//! - [`AsyncDispatcher`]: queues records and delivers them in batches from a
//!   background task.
//!
//! Both stamp records with the replicator's [`EventFactory`] at the moment
//! they accept them, so a record's `origin_sequence` always reflects the
//! order in which it will be delivered.

mod asynchronous;
mod queue;
mod synchronous;
mod types;

pub use asynchronous::AsyncDispatcher;
pub use queue::{coalesce, DispatchQueue, PushOutcome};
pub use synchronous::SyncDispatcher;
pub use types::{CycleReport, DispatcherState, ReplicatorStats, StatsSnapshot};

use crate::event::{EventFactory, EventRecord};

/// The dispatch strategy of one replicator.
pub enum Dispatcher {
    Sync(SyncDispatcher),
    Async(AsyncDispatcher),
}

impl Dispatcher {
    /// Create a record with `make` and hand it to the strategy.
    ///
    /// Synchronous dispatch completes delivery before returning;
    /// asynchronous dispatch only queues.
    pub async fn dispatch<F>(&self, make: F)
    where
        F: FnOnce(&EventFactory) -> EventRecord + Send,
    {
        match self {
            Self::Sync(dispatcher) => dispatcher.dispatch(make).await,
            Self::Async(dispatcher) => dispatcher.enqueue(make),
        }
    }

    pub fn state(&self) -> DispatcherState {
        match self {
            Self::Sync(dispatcher) => dispatcher.state(),
            Self::Async(dispatcher) => dispatcher.state(),
        }
    }

    pub fn is_asynchronous(&self) -> bool {
        matches!(self, Self::Async(_))
    }

    /// Run one asynchronous cycle now. No-op for synchronous dispatch.
    pub async fn flush(&self) -> CycleReport {
        match self {
            Self::Sync(_) => CycleReport::default(),
            Self::Async(dispatcher) => dispatcher.flush().await,
        }
    }

    /// Records waiting for delivery (always 0 for synchronous dispatch).
    pub fn pending(&self) -> usize {
        match self {
            Self::Sync(_) => 0,
            Self::Async(dispatcher) => dispatcher.queue_len(),
        }
    }

    pub async fn shutdown(&self) {
        match self {
            Self::Sync(dispatcher) => dispatcher.shutdown().await,
            Self::Async(dispatcher) => dispatcher.shutdown().await,
        }
    }
}
