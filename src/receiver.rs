// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Receiving side of replication.
//!
//! A [`ReplicationReceiver`] is the [`CachePeer`] a node exposes for one of
//! its caches. It applies incoming records to a [`LocalCache`], the node's
//! authoritative store.
//!
//! # Loop Prevention
//!
//! `LocalCache` implementations must apply replicated mutations *without*
//! notifying the local [`CacheReplicator`](crate::CacheReplicator).
//! Otherwise every received record would be re-replicated back into the
//! cluster.
//!
//! # Example
//!
//! ```rust,no_run
//! use cache_replicator::receiver::{CacheError, CacheFuture, LocalCache};
//!
//! struct MyStore { /* ... */ }
//!
//! impl LocalCache for MyStore {
//!     fn put(&self, _key: String, _value: Vec<u8>) -> CacheFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn remove(&self, _key: String) -> CacheFuture<'_, bool> {
//!         Box::pin(async move { Ok(true) })
//!     }
//!
//!     fn remove_all(&self) -> CacheFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//! }
//! ```

use crate::error::PeerError;
use crate::event::{EventKind, EventRecord, Payload};
use crate::metrics;
use crate::peer::{BoxFuture, CachePeer};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Result type for local cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Boxed future returned by [`LocalCache`] methods.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = CacheResult<T>> + Send + 'a>>;

/// Simplified error for local cache operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheError(pub String);

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CacheError {}

/// What the receiver needs from the local cache.
///
/// All three operations must be idempotent and must not notify the local
/// replicator (see module docs).
pub trait LocalCache: Send + Sync + 'static {
    /// Insert or replace an entry.
    fn put(&self, key: String, value: Vec<u8>) -> CacheFuture<'_, ()>;

    /// Drop an entry. Returns whether it was present.
    fn remove(&self, key: String) -> CacheFuture<'_, bool>;

    /// Drop every entry.
    fn remove_all(&self) -> CacheFuture<'_, ()>;
}

/// A no-op implementation for testing/standalone mode.
///
/// Logs operations but doesn't actually store anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCache;

impl LocalCache for NoOpCache {
    fn put(&self, key: String, value: Vec<u8>) -> CacheFuture<'_, ()> {
        Box::pin(async move {
            debug!(key = %key, len = value.len(), "NoOp: would put entry");
            Ok(())
        })
    }

    fn remove(&self, key: String) -> CacheFuture<'_, bool> {
        Box::pin(async move {
            debug!(key = %key, "NoOp: would remove entry");
            Ok(false)
        })
    }

    fn remove_all(&self) -> CacheFuture<'_, ()> {
        Box::pin(async {
            debug!("NoOp: would remove all entries");
            Ok(())
        })
    }
}

/// Applies replicated records for one cache on this node.
pub struct ReplicationReceiver<C> {
    cache: C,
    cache_name: String,
    unique_id: String,
    url_base: String,
    closed: AtomicBool,
}

impl<C: LocalCache> ReplicationReceiver<C> {
    /// `url_base` is this node's listen address as `//host:port`.
    pub fn new(
        node_id: impl AsRef<str>,
        cache_name: impl Into<String>,
        url_base: impl Into<String>,
        cache: C,
    ) -> Self {
        let cache_name = cache_name.into();
        Self {
            unique_id: format!("{}/{}", node_id.as_ref(), cache_name),
            cache_name,
            url_base: url_base.into(),
            cache,
            closed: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Stop applying records, e.g. while the local cache is being disposed.
    /// Every later call fails with [`PeerError::Shutdown`]. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(cache = %self.cache_name, unique_id = %self.unique_id, "Receiver closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), PeerError> {
        if self.is_closed() {
            return Err(PeerError::Shutdown);
        }
        Ok(())
    }

    /// Apply one record. `Put`/`Update` with a value replace the entry;
    /// `Update` with an invalidation and `Remove` drop it.
    async fn apply(&self, record: &EventRecord) -> Result<(), PeerError> {
        let kind = record.kind();
        let result = match (kind, record.payload()) {
            (EventKind::RemoveAll, _) => self.cache.remove_all().await,
            (EventKind::Put, Payload::Invalidate) => {
                return Err(PeerError::Remote(format!(
                    "put record {} carries no value",
                    record.origin_sequence()
                )));
            }
            (EventKind::Put | EventKind::Update, Payload::Value(value)) => {
                let key = Self::key_of(record)?;
                self.cache.put(key.to_string(), value.clone()).await
            }
            (EventKind::Update | EventKind::Remove, Payload::Invalidate) => {
                let key = Self::key_of(record)?;
                self.cache.remove(key.to_string()).await.map(|_| ())
            }
            (EventKind::Remove, Payload::Value(_)) => {
                let key = Self::key_of(record)?;
                self.cache.remove(key.to_string()).await.map(|_| ())
            }
        };

        match result {
            Ok(()) => {
                metrics::record_receiver_applied(&self.cache_name, kind.as_str());
                Ok(())
            }
            Err(e) => {
                metrics::record_receiver_error(&self.cache_name, kind.as_str());
                Err(PeerError::Remote(e.0))
            }
        }
    }

    fn key_of(record: &EventRecord) -> Result<&str, PeerError> {
        record.key().ok_or_else(|| {
            PeerError::Remote(format!(
                "{} record {} has no key",
                record.kind(),
                record.origin_sequence()
            ))
        })
    }
}

impl<C: LocalCache> CachePeer for ReplicationReceiver<C> {
    fn put<'a>(&'a self, record: &'a EventRecord) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            if record.payload().is_invalidation() {
                return Err(PeerError::Remote(format!(
                    "put of {} carries no value",
                    record.key().unwrap_or("<none>")
                )));
            }
            self.apply(record).await
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.ensure_open()?;
            match self.cache.remove(key.to_string()).await {
                Ok(applied) => {
                    metrics::record_receiver_applied(&self.cache_name, EventKind::Remove.as_str());
                    Ok(applied)
                }
                Err(e) => {
                    metrics::record_receiver_error(&self.cache_name, EventKind::Remove.as_str());
                    Err(PeerError::Remote(e.0))
                }
            }
        })
    }

    fn remove_all(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            self.cache.remove_all().await.map_err(|e| {
                metrics::record_receiver_error(&self.cache_name, EventKind::RemoveAll.as_str());
                PeerError::Remote(e.0)
            })?;
            metrics::record_receiver_applied(&self.cache_name, EventKind::RemoveAll.as_str());
            Ok(())
        })
    }

    fn apply_batch<'a>(&'a self, records: &'a [EventRecord]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            let total = records.len();
            for (applied, record) in records.iter().enumerate() {
                if let Err(e) = self.apply(record).await {
                    warn!(
                        cache = %self.cache_name,
                        applied,
                        total,
                        sequence = record.origin_sequence(),
                        error = %e,
                        "Replicated batch partially applied"
                    );
                    return Err(PeerError::PartialBatch {
                        applied,
                        total,
                        message: e.to_string(),
                    });
                }
            }
            debug!(cache = %self.cache_name, total, "Applied replicated batch");
            Ok(())
        })
    }

    fn name(&self) -> &str {
        &self.cache_name
    }

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn url(&self) -> String {
        format!("{}/{}", self.url_base, self.cache_name)
    }

    fn url_base(&self) -> String {
        self.url_base.clone()
    }
}
