// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Peer contract and per-peer call management.
//!
//! A [`CachePeer`] is the surface every node exposes to accept replicated
//! mutations. The dispatchers never call a `CachePeer` directly: each peer
//! in a snapshot is wrapped in a [`PeerEndpoint`], which bounds every call
//! with a timeout, tracks inferred liveness, and runs a small circuit.
//!
//! # Peer Sets
//!
//! The roster of peers is owned by a discovery collaborator behind the
//! [`PeerProvider`] trait. [`PeerManager`] reads it as a point-in-time
//! snapshot before each dispatch and keeps per-peer call state keyed by
//! [`CachePeer::unique_id()`]. Peers that leave the roster lose their state.
//!
//! # Circuit
//!
//! ```text
//! Closed ──(threshold consecutive failures)──► Open
//!   ▲                                            │
//!   │                                   (reset timeout elapses)
//!   │                                            ▼
//!   └──────────────(success)─────────────── HalfOpen ──(failure)──► Open
//! ```
//!
//! While open, calls are rejected without touching the network and the
//! records are counted as dropped. There is no retry: a peer that misses
//! records regains consistency only through an external resync.

use crate::config::PeerCallConfig;
use crate::error::{PeerError, ReplicationError, Result};
use crate::event::{EventKind, EventRecord, Payload};
use crate::metrics;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Boxed future returned by [`CachePeer`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = std::result::Result<T, PeerError>> + Send + 'a>>;

/// The peer-side replication contract.
///
/// Every method may fail independently, and none is assumed atomic.
/// Implementations must be idempotent for `put` and `remove`: applying the
/// same record twice leaves the same state as applying it once.
pub trait CachePeer: Send + Sync + 'static {
    /// Apply a value-carrying record (`Put`, or `Update` by copy).
    fn put<'a>(&'a self, record: &'a EventRecord) -> BoxFuture<'a, ()>;

    /// Drop a key. Returns whether an entry was present.
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, bool>;

    /// Clear the whole cache.
    fn remove_all(&self) -> BoxFuture<'_, ()>;

    /// Apply records in the given order.
    ///
    /// Not atomic: a receiver may apply a prefix and then fail, reporting
    /// [`PeerError::PartialBatch`].
    fn apply_batch<'a>(&'a self, records: &'a [EventRecord]) -> BoxFuture<'a, ()>;

    /// Name of the cache this peer replicates.
    fn name(&self) -> &str;

    /// Identifier unique across the cluster.
    fn unique_id(&self) -> &str;

    /// Full endpoint URL (`//host:port/cacheName`).
    fn url(&self) -> String;

    /// Endpoint URL without the cache name (`//host:port`).
    fn url_base(&self) -> String;
}

/// Circuit state for a peer endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerCircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Too many consecutive failures, calls rejected immediately.
    Open,
    /// Reset timeout elapsed; calls are let through as trials.
    HalfOpen,
}

impl PeerCircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// A peer as seen by one replicator: the contract plus call bounds and
/// inferred liveness.
pub struct PeerEndpoint {
    peer: Arc<dyn CachePeer>,
    id: String,
    call_timeout: Duration,
    failure_threshold: u64,
    reset_timeout: Duration,
    /// Consecutive failures since the last success.
    failure_count: AtomicU64,
    /// Epoch millis of the last successful call (0 = never).
    last_success: AtomicU64,
    circuit_opened_at: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for PeerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerEndpoint")
            .field("id", &self.id)
            .field("failure_count", &self.failure_count())
            .finish()
    }
}

impl PeerEndpoint {
    pub fn new(peer: Arc<dyn CachePeer>, config: &PeerCallConfig) -> Self {
        Self {
            id: peer.unique_id().to_string(),
            peer,
            call_timeout: config.call_timeout_duration(),
            failure_threshold: u64::from(config.circuit_failure_threshold.max(1)),
            reset_timeout: config.circuit_reset_timeout(),
            failure_count: AtomicU64::new(0),
            last_success: AtomicU64::new(0),
            circuit_opened_at: Mutex::new(None),
        }
    }

    /// The peer's unique id (used as `peer_id` in logs and metrics).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> &Arc<dyn CachePeer> {
        &self.peer
    }

    // =========================================================================
    // Liveness + circuit
    // =========================================================================

    /// Inferred from the last call: `false` once a call has failed and no
    /// call has succeeded since.
    pub fn is_alive(&self) -> bool {
        self.failure_count() == 0
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Acquire)
    }

    /// Milliseconds since the last successful call (`u64::MAX` if none).
    pub fn millis_since_success(&self) -> u64 {
        let last = self.last_success.load(Ordering::Acquire);
        if last == 0 {
            return u64::MAX;
        }
        epoch_millis().saturating_sub(last)
    }

    pub fn circuit_state(&self) -> PeerCircuitState {
        if self.failure_count() < self.failure_threshold {
            return PeerCircuitState::Closed;
        }
        let opened_at = self.circuit_opened_at.lock().unwrap_or_else(PoisonError::into_inner);
        match *opened_at {
            Some(at) if at.elapsed() < self.reset_timeout => PeerCircuitState::Open,
            _ => PeerCircuitState::HalfOpen,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        self.circuit_state() == PeerCircuitState::Open
    }

    /// Record a successful call (closes the circuit).
    pub fn record_success(&self) {
        let previous = self.failure_count.swap(0, Ordering::AcqRel);
        self.last_success.store(epoch_millis(), Ordering::Release);
        let mut opened_at = self.circuit_opened_at.lock().unwrap_or_else(PoisonError::into_inner);
        if opened_at.take().is_some() {
            info!(peer_id = %self.id, previous_failures = previous, "Circuit closed for peer");
            metrics::record_peer_circuit_state(&self.id, "closed");
        }
    }

    /// Record a failed call (may open or re-open the circuit).
    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        if failures < self.failure_threshold {
            return;
        }

        let mut opened_at = self.circuit_opened_at.lock().unwrap_or_else(PoisonError::into_inner);
        match *opened_at {
            None => {
                *opened_at = Some(Instant::now());
                warn!(
                    peer_id = %self.id,
                    failures,
                    threshold = self.failure_threshold,
                    reset_timeout_ms = self.reset_timeout.as_millis() as u64,
                    "Circuit opened for peer"
                );
                metrics::record_peer_circuit_state(&self.id, "open");
            }
            Some(at) if at.elapsed() >= self.reset_timeout => {
                // Trial call failed.
                *opened_at = Some(Instant::now());
                warn!(peer_id = %self.id, failures, "Circuit re-opened for peer after trial call");
                metrics::record_peer_circuit_state(&self.id, "open");
            }
            Some(_) => {}
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Deliver one record with the peer operation matching its kind.
    pub async fn deliver(&self, record: &EventRecord) -> Result<()> {
        let peer = &self.peer;
        match (record.kind(), record.payload()) {
            (EventKind::RemoveAll, _) => self.call("remove_all", peer.remove_all()).await,
            (EventKind::Put | EventKind::Update, Payload::Value(_)) => {
                self.call("put", peer.put(record)).await
            }
            (_, _) => {
                let key = record.key().ok_or_else(|| {
                    ReplicationError::Internal(format!(
                        "{} record {} has no key",
                        record.kind(),
                        record.origin_sequence()
                    ))
                })?;
                self.call("remove", peer.remove(key)).await.map(|applied| {
                    debug!(peer_id = %self.id, key, applied, "Remote remove returned");
                })
            }
        }
    }

    /// Deliver an ordered run of records in one call.
    pub async fn deliver_batch(&self, records: &[EventRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.call("apply_batch", self.peer.apply_batch(records)).await
    }

    async fn call<T>(&self, operation: &'static str, fut: BoxFuture<'_, T>) -> Result<T> {
        if self.is_circuit_open() {
            return Err(ReplicationError::CircuitOpen {
                peer_id: self.id.clone(),
            });
        }

        let start = Instant::now();
        let outcome = timeout(self.call_timeout, fut).await;
        metrics::record_peer_call_latency(&self.id, operation, start.elapsed());

        match outcome {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(ReplicationError::peer(self.id.clone(), e))
            }
            Err(_) => {
                self.record_failure();
                Err(ReplicationError::PeerTimeout {
                    peer_id: self.id.clone(),
                    timeout_ms: self.call_timeout.as_millis() as u64,
                })
            }
        }
    }
}

// =============================================================================
// Peer sets
// =============================================================================

/// Discovery collaborator: supplies the current peers for a cache.
///
/// Called before every dispatch; the result is treated as a snapshot. The
/// order of the returned list is the order peers are visited in.
pub trait PeerProvider: Send + Sync + 'static {
    fn peers(&self, cache_name: &str) -> Vec<Arc<dyn CachePeer>>;
}

/// A manually maintained roster, keyed by peer unique id.
///
/// Suitable for static clusters and tests. Snapshots are sorted by
/// unique id so iteration order is stable between dispatches.
#[derive(Default)]
pub struct StaticPeerSet {
    peers: DashMap<String, Arc<dyn CachePeer>>,
}

impl StaticPeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer, replacing any peer with the same unique id.
    pub fn add(&self, peer: Arc<dyn CachePeer>) {
        let id = peer.unique_id().to_string();
        info!(peer_id = %id, url = %peer.url(), "Peer added");
        self.peers.insert(id, peer);
    }

    pub fn remove(&self, unique_id: &str) -> Option<Arc<dyn CachePeer>> {
        let removed = self.peers.remove(unique_id).map(|(_, peer)| peer);
        if removed.is_some() {
            info!(peer_id = %unique_id, "Peer removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl PeerProvider for StaticPeerSet {
    fn peers(&self, cache_name: &str) -> Vec<Arc<dyn CachePeer>> {
        let mut peers: Vec<_> = self
            .peers
            .iter()
            .filter(|entry| entry.value().name() == cache_name)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        peers.sort_by(|a, b| a.0.cmp(&b.0));
        peers.into_iter().map(|(_, peer)| peer).collect()
    }
}

/// Per-replicator view of the peer set: snapshots plus per-peer call state.
pub struct PeerManager {
    cache_name: String,
    provider: Arc<dyn PeerProvider>,
    call_config: PeerCallConfig,
    endpoints: DashMap<String, Arc<PeerEndpoint>>,
}

impl PeerManager {
    pub fn new(
        cache_name: impl Into<String>,
        provider: Arc<dyn PeerProvider>,
        call_config: PeerCallConfig,
    ) -> Self {
        Self {
            cache_name: cache_name.into(),
            provider,
            call_config,
            endpoints: DashMap::new(),
        }
    }

    /// Read the provider and return endpoints in provider order.
    ///
    /// Call state survives between snapshots for peers that stay in the
    /// roster; a peer replaced under the same id starts fresh.
    pub fn snapshot(&self) -> Vec<Arc<PeerEndpoint>> {
        let peers = self.provider.peers(&self.cache_name);

        let endpoints: Vec<Arc<PeerEndpoint>> = peers
            .into_iter()
            .map(|peer| {
                let id = peer.unique_id().to_string();
                let mut entry = self
                    .endpoints
                    .entry(id)
                    .or_insert_with(|| Arc::new(PeerEndpoint::new(peer.clone(), &self.call_config)));
                if !Arc::ptr_eq(entry.peer(), &peer) {
                    *entry = Arc::new(PeerEndpoint::new(peer, &self.call_config));
                }
                entry.value().clone()
            })
            .collect();

        self.endpoints
            .retain(|id, _| endpoints.iter().any(|endpoint| endpoint.id() == id));
        metrics::set_peer_count(&self.cache_name, endpoints.len());
        endpoints
    }

    /// Call state for a peer seen in a previous snapshot.
    pub fn get(&self, unique_id: &str) -> Option<Arc<PeerEndpoint>> {
        self.endpoints.get(unique_id).map(|entry| entry.value().clone())
    }

    /// Number of peers tracked since the last snapshot.
    pub fn tracked(&self) -> usize {
        self.endpoints.len()
    }
}

/// Get current epoch milliseconds.
fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
