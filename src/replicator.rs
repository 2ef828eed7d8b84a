// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The mutation interceptor.
//!
//! A [`CacheReplicator`] is attached to one local cache. The cache calls a
//! `notify_*` method after every successful mutation; the replicator turns
//! it into an [`EventRecord`](crate::event::EventRecord) (when the
//! configuration says so) and hands it to its dispatcher.
//!
//! No `notify_*` method can fail. Whatever happens to replication, the
//! local mutation has already happened and stays the source of truth.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> cache_replicator::Result<()> {
//! use cache_replicator::{CacheReplicator, ReplicatorConfig, StaticPeerSet};
//! use std::sync::Arc;
//!
//! let peers = Arc::new(StaticPeerSet::new());
//! let replicator = CacheReplicator::new("node-a", "users", ReplicatorConfig::default(), peers)?;
//!
//! replicator.notify_put("user:1", b"alice".to_vec()).await;
//! replicator.notify_remove("user:2").await;
//!
//! replicator.dispose().await;
//! # Ok(())
//! # }
//! ```

use crate::config::ReplicatorConfig;
use crate::dispatch::{
    AsyncDispatcher, CycleReport, Dispatcher, DispatcherState, ReplicatorStats, StatsSnapshot,
    SyncDispatcher,
};
use crate::error::Result;
use crate::event::EventFactory;
use crate::metrics;
use crate::peer::{PeerManager, PeerProvider};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Lifecycle status of a replicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicatorStatus {
    Alive,
    ShutDown,
}

/// Intercepts local cache mutations and replicates them to peers.
pub struct CacheReplicator {
    node_id: String,
    cache_name: String,
    config: ReplicatorConfig,
    dispatcher: Dispatcher,
    peers: Arc<PeerManager>,
    stats: Arc<ReplicatorStats>,
    alive: AtomicBool,
}

impl CacheReplicator {
    /// Validate `config` and wire the dispatcher it selects.
    ///
    /// Asynchronous replication spawns its loop on the current tokio
    /// runtime and fails with `InvalidState` outside one.
    pub fn new(
        node_id: impl Into<String>,
        cache_name: impl Into<String>,
        config: ReplicatorConfig,
        provider: Arc<dyn PeerProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let node_id = node_id.into();
        let cache_name = cache_name.into();
        let factory = EventFactory::new(format!("{node_id}/{cache_name}"));
        let peers = Arc::new(PeerManager::new(
            cache_name.clone(),
            provider,
            config.peer_calls.clone(),
        ));
        let stats = Arc::new(ReplicatorStats::new());

        let dispatcher = if config.replicate_asynchronously {
            Dispatcher::Async(AsyncDispatcher::start(
                cache_name.clone(),
                factory,
                peers.clone(),
                stats.clone(),
                &config.asynchronous,
                config.peer_calls.call_timeout_duration(),
            )?)
        } else {
            Dispatcher::Sync(SyncDispatcher::new(
                cache_name.clone(),
                factory,
                peers.clone(),
                stats.clone(),
            ))
        };

        info!(
            node_id = %node_id,
            cache = %cache_name,
            asynchronous = config.replicate_asynchronously,
            puts = config.replicate_puts,
            updates = config.replicate_updates,
            updates_via_copy = config.replicate_updates_via_copy,
            removals = config.replicate_removals,
            "Cache replicator created"
        );

        Ok(Self {
            node_id,
            cache_name,
            config,
            dispatcher,
            peers,
            stats,
            alive: AtomicBool::new(true),
        })
    }

    /// Parse a listener property string and build a replicator from it.
    pub fn from_properties(
        node_id: impl Into<String>,
        cache_name: impl Into<String>,
        properties: &str,
        provider: Arc<dyn PeerProvider>,
    ) -> Result<Self> {
        let config = ReplicatorConfig::from_properties(properties)?;
        Self::new(node_id, cache_name, config, provider)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn config(&self) -> &ReplicatorConfig {
        &self.config
    }

    pub fn is_asynchronous(&self) -> bool {
        self.dispatcher.is_asynchronous()
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// A new entry was inserted.
    pub async fn notify_put(&self, key: impl Into<String>, value: Vec<u8>) {
        if !self.config.replicate_puts || !self.accepting() {
            return;
        }
        let key = key.into();
        self.dispatcher.dispatch(move |f| f.put(key, value)).await;
    }

    /// An existing entry was replaced.
    ///
    /// Carries `value` when updates replicate by copy; otherwise peers only
    /// receive an invalidation for the key.
    pub async fn notify_update(&self, key: impl Into<String>, value: Vec<u8>) {
        if !self.config.replicate_updates || !self.accepting() {
            return;
        }
        let key = key.into();
        let value = self.config.replicate_updates_via_copy.then_some(value);
        self.dispatcher.dispatch(move |f| f.update(key, value)).await;
    }

    /// An entry was removed by the application.
    pub async fn notify_remove(&self, key: impl Into<String>) {
        if !self.config.replicate_removals || !self.accepting() {
            return;
        }
        let key = key.into();
        self.dispatcher.dispatch(move |f| f.remove(key)).await;
    }

    /// The cache was cleared. Always replicated, whatever the flags say.
    pub async fn notify_remove_all(&self) {
        if !self.accepting() {
            return;
        }
        self.dispatcher.dispatch(|f| f.remove_all()).await;
    }

    /// An entry was evicted for capacity. Eviction is a local decision and
    /// is never replicated.
    pub fn notify_evicted(&self, key: &str) {
        trace!(cache = %self.cache_name, key, "Eviction not replicated");
    }

    /// An entry expired. Each node expires entries on its own.
    pub fn notify_expired(&self, key: &str) {
        trace!(cache = %self.cache_name, key, "Expiry not replicated");
    }

    fn accepting(&self) -> bool {
        if self.alive.load(Ordering::Acquire) {
            return true;
        }
        self.stats.record_rejected();
        metrics::record_event_rejected(&self.cache_name);
        debug!(cache = %self.cache_name, "Replicator shut down, mutation not replicated");
        false
    }

    // =========================================================================
    // Lifecycle + introspection
    // =========================================================================

    pub fn status(&self) -> ReplicatorStatus {
        if self.alive.load(Ordering::Acquire) {
            ReplicatorStatus::Alive
        } else {
            ReplicatorStatus::ShutDown
        }
    }

    pub fn is_alive(&self) -> bool {
        self.status() == ReplicatorStatus::Alive
    }

    pub fn dispatcher_state(&self) -> DispatcherState {
        self.dispatcher.state()
    }

    /// Stop replicating: reject new mutations, flush what is queued within
    /// the grace period, then stop the dispatcher. Safe to call repeatedly.
    pub async fn dispose(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            info!(cache = %self.cache_name, pending = self.dispatcher.pending(), "Disposing cache replicator");
        }
        self.dispatcher.shutdown().await;
    }

    /// Run one asynchronous dispatch cycle immediately.
    pub async fn flush(&self) -> CycleReport {
        self.dispatcher.flush().await
    }

    /// Records queued for the next asynchronous cycle.
    pub fn pending(&self) -> usize {
        self.dispatcher.pending()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Per-peer call state from the latest dispatch.
    pub fn peers(&self) -> &Arc<PeerManager> {
        &self.peers
    }
}
