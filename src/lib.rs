// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Cache Replicator
//!
//! Peer-to-peer replication for distributed in-memory caches.
//!
//! ## Architecture
//!
//! Each local cache gets a [`CacheReplicator`]. The cache reports its
//! mutations; the replicator turns them into event records and fans them
//! out to every peer cache of the same name, either inline or from a
//! background queue:
//!
//! ```text
//! ┌──────────────────────────────── node A ─────────────────────────────────┐
//! │                                                                         │
//! │  local cache ──notify_*()──► CacheReplicator ──► Dispatcher             │
//! │                               (flags, factory)   │                      │
//! │                                                  ├─ Sync: per call      │
//! │                                                  └─ Async: queue ──►    │
//! │                                                     coalesce + batch    │
//! │                                                          │              │
//! │                                       PeerManager (snapshot, circuit)   │
//! └──────────────────────────────────────────────────────────┼──────────────┘
//!                                                            │ CachePeer
//!                     ┌──────────────────────────────────────┴───────┐
//!                     ▼                                              ▼
//!           ReplicationReceiver (in-process)          RemotePeer ──TCP──► PeerServer
//!                     │                                                  │
//!                     ▼                                                  ▼
//!               peer local cache                         ReplicationReceiver ──► cache
//! ```
//!
//! Receivers apply records straight to their local cache and never call a
//! replicator, so replicated mutations are not replicated again.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cache_replicator::{CacheReplicator, ReplicatorConfig, StaticPeerSet};
//! use cache_replicator::transport::{RemotePeer, RemotePeerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> cache_replicator::Result<()> {
//!     let config = ReplicatorConfig::from_properties(
//!         "replicateAsynchronously=true, asynchronousReplicationIntervalMillis=200",
//!     )?;
//!
//!     let peers = Arc::new(StaticPeerSet::new());
//!     let remote = RemotePeerConfig::for_replicator("10.0.0.2:40001", "users", &config);
//!     peers.add(Arc::new(RemotePeer::new(remote)));
//!
//!     let replicator = CacheReplicator::new("node-a", "users", config, peers)?;
//!
//!     replicator.notify_put("user:1", b"alice".to_vec()).await;
//!     replicator.dispose().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod metrics;
pub mod peer;
pub mod receiver;
pub mod replicator;
pub mod resilience;
pub mod transport;

// Re-exports for convenience
pub use config::{AsyncSettings, PeerCallConfig, ReplicatorConfig};
pub use dispatch::{CycleReport, DispatcherState, StatsSnapshot};
pub use error::{PeerError, ReplicationError, Result};
pub use event::{EventFactory, EventKind, EventRecord, Payload};
pub use peer::{CachePeer, PeerManager, PeerProvider, StaticPeerSet};
pub use receiver::{CacheError, LocalCache, NoOpCache, ReplicationReceiver};
pub use replicator::{CacheReplicator, ReplicatorStatus};
pub use resilience::RetryConfig;
