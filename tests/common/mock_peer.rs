// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mock `CachePeer` for testing.
//!
//! Records every call for assertions. Failures, delays and hangs can be
//! switched on and off while a replicator is using the peer.

use cache_replicator::peer::{BoxFuture, CachePeer};
use cache_replicator::{EventRecord, PeerError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    Put(EventRecord),
    Remove(String),
    RemoveAll,
    Batch(Vec<EventRecord>),
}

/// Mock implementation of CachePeer that records all calls.
///
/// # Example
/// ```rust,ignore
/// let peer = Arc::new(MockPeer::new("users", "node-b"));
/// peers.add(peer.clone());
///
/// replicator.notify_put("k", b"v".to_vec()).await;
///
/// assert_eq!(peer.records().len(), 1);
/// ```
pub struct MockPeer {
    name: String,
    unique_id: String,
    calls: Mutex<Vec<PeerCall>>,
    failing: AtomicBool,
    hanging: AtomicBool,
    delay_ms: AtomicU64,
    /// Calls that reached the peer, including failed ones.
    attempts: AtomicUsize,
}

impl MockPeer {
    pub fn new(cache_name: &str, node_id: &str) -> Self {
        Self {
            name: cache_name.to_string(),
            unique_id: format!("{node_id}/{cache_name}"),
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            hanging: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// A peer that fails every call.
    pub fn failing(cache_name: &str, node_id: &str) -> Self {
        let peer = Self::new(cache_name, node_id);
        peer.set_failing(true);
        peer
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Never complete a call (until the caller's timeout fires).
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Successful calls, in order.
    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Every record received, flattened across calls, in order.
    pub fn records(&self) -> Vec<EventRecord> {
        self.calls()
            .into_iter()
            .flat_map(|call| match call {
                PeerCall::Put(record) => vec![record],
                PeerCall::Batch(records) => records,
                PeerCall::Remove(_) | PeerCall::RemoveAll => Vec::new(),
            })
            .collect()
    }

    /// Sizes of the batches received.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PeerCall::Batch(records) => Some(records.len()),
                _ => None,
            })
            .collect()
    }

    async fn enter(&self) -> Result<(), PeerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(PeerError::Unreachable(format!("{} is down", self.unique_id)));
        }
        Ok(())
    }

    fn record(&self, call: PeerCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl CachePeer for MockPeer {
    fn put<'a>(&'a self, record: &'a EventRecord) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.enter().await?;
            self.record(PeerCall::Put(record.clone()));
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.enter().await?;
            self.record(PeerCall::Remove(key.to_string()));
            Ok(true)
        })
    }

    fn remove_all(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.enter().await?;
            self.record(PeerCall::RemoveAll);
            Ok(())
        })
    }

    fn apply_batch<'a>(&'a self, records: &'a [EventRecord]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.enter().await?;
            self.record(PeerCall::Batch(records.to_vec()));
            Ok(())
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn url(&self) -> String {
        format!("//mock/{}", self.unique_id)
    }

    fn url_base(&self) -> String {
        "//mock".to_string()
    }
}
