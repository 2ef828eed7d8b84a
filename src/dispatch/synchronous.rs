// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Synchronous dispatcher: inline, per-record delivery.
//!
//! Each record is delivered to every peer in the snapshot, one peer at a
//! time, before the mutating call returns. A single async mutex covers
//! record creation and delivery, so record N+1 is never sent before every
//! call for record N has returned. Failed deliveries are dropped for that
//! peer; there is no retry on this path.

use super::types::{DispatcherState, ReplicatorStats};
use crate::event::{EventFactory, EventRecord};
use crate::metrics;
use crate::peer::PeerManager;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

pub struct SyncDispatcher {
    cache_name: String,
    /// Guarded so sequence order equals delivery order.
    factory: Mutex<EventFactory>,
    peers: Arc<PeerManager>,
    stats: Arc<ReplicatorStats>,
    state: watch::Sender<DispatcherState>,
}

impl SyncDispatcher {
    pub fn new(
        cache_name: impl Into<String>,
        factory: EventFactory,
        peers: Arc<PeerManager>,
        stats: Arc<ReplicatorStats>,
    ) -> Self {
        let cache_name = cache_name.into();
        metrics::set_dispatcher_state(&cache_name, "Running");
        let (state, _) = watch::channel(DispatcherState::Running);
        Self {
            cache_name,
            factory: Mutex::new(factory),
            peers,
            stats,
            state,
        }
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// Create a record and deliver it to every peer.
    ///
    /// Never fails: per-peer errors are logged and counted as dropped.
    pub async fn dispatch<F>(&self, make: F)
    where
        F: FnOnce(&EventFactory) -> EventRecord + Send,
    {
        let factory = self.factory.lock().await;
        if !self.state().is_accepting() {
            self.stats.record_rejected();
            metrics::record_event_rejected(&self.cache_name);
            debug!(cache = %self.cache_name, "Dispatcher stopped, mutation not replicated");
            return;
        }

        let record = make(&*factory);
        self.stats.record_generated();
        metrics::record_event_generated(&self.cache_name, record.kind().as_str());

        let peers = self.peers.snapshot();
        for endpoint in &peers {
            match endpoint.deliver(&record).await {
                Ok(()) => {
                    self.stats.record_delivered(1);
                    metrics::record_events_delivered(&self.cache_name, endpoint.id(), 1);
                }
                Err(e) => {
                    self.stats.record_dropped(1);
                    metrics::record_events_dropped(&self.cache_name, endpoint.id(), e.kind(), 1);
                    warn!(
                        cache = %self.cache_name,
                        peer_id = %endpoint.id(),
                        kind = %record.kind(),
                        sequence = record.origin_sequence(),
                        retryable = e.is_retryable(),
                        error = %e,
                        "Synchronous replication to peer failed, record dropped"
                    );
                }
            }
        }
        debug!(
            cache = %self.cache_name,
            kind = %record.kind(),
            sequence = record.origin_sequence(),
            peers = peers.len(),
            "Record replicated synchronously"
        );
    }

    /// Stop accepting records. Waits for an in-flight dispatch to finish.
    ///
    /// Idempotent: nothing is buffered, so there is nothing to flush.
    pub async fn shutdown(&self) {
        let _factory = self.factory.lock().await;
        if self.state() == DispatcherState::Stopped {
            return;
        }
        self.state.send_replace(DispatcherState::Stopped);
        metrics::set_dispatcher_state(&self.cache_name, "Stopped");
        info!(cache = %self.cache_name, "Synchronous dispatcher stopped");
    }
}
