// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - `MemoryCache`: an in-memory `LocalCache` with failure injection
//! - `MockPeer`: a `CachePeer` that records calls, with delay/failure injection
//! - `TestNode`/`cluster()`: fully wired nodes replicating to each other in-process

#![allow(dead_code)]

pub mod memory_cache;
pub mod mock_peer;

pub use memory_cache::*;
pub use mock_peer::*;

use cache_replicator::{CacheReplicator, ReplicationReceiver, ReplicatorConfig, StaticPeerSet};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// One node: its local cache (behind a receiver), its roster and its replicator.
pub struct TestNode {
    pub id: String,
    pub receiver: Arc<ReplicationReceiver<MemoryCache>>,
    pub peers: Arc<StaticPeerSet>,
    pub replicator: CacheReplicator,
}

impl TestNode {
    pub fn cache(&self) -> &MemoryCache {
        self.receiver.cache()
    }

    /// Local insert, then notify.
    pub async fn put(&self, key: &str, value: &[u8]) {
        self.cache().insert(key, value);
        self.replicator.notify_put(key, value.to_vec()).await;
    }

    /// Local replace, then notify.
    pub async fn update(&self, key: &str, value: &[u8]) {
        self.cache().insert(key, value);
        self.replicator.notify_update(key, value.to_vec()).await;
    }

    pub async fn remove(&self, key: &str) {
        self.cache().delete(key);
        self.replicator.notify_remove(key).await;
    }

    pub async fn remove_all(&self) {
        self.cache().clear();
        self.replicator.notify_remove_all().await;
    }
}

/// Build `size` nodes replicating cache `cache_name` to each other.
///
/// Must be called inside a tokio runtime when `config` is asynchronous.
pub fn cluster(size: usize, cache_name: &str, config: ReplicatorConfig) -> Vec<TestNode> {
    let nodes: Vec<(String, Arc<ReplicationReceiver<MemoryCache>>, Arc<StaticPeerSet>)> = (0..size)
        .map(|i| {
            let id = format!("node-{i}");
            let receiver = Arc::new(ReplicationReceiver::new(
                &id,
                cache_name,
                format!("//mem/{id}"),
                MemoryCache::new(),
            ));
            (id, receiver, Arc::new(StaticPeerSet::new()))
        })
        .collect();

    for (i, (_, _, peers)) in nodes.iter().enumerate() {
        for (j, (_, receiver, _)) in nodes.iter().enumerate() {
            if i != j {
                peers.add(receiver.clone());
            }
        }
    }

    nodes
        .into_iter()
        .map(|(id, receiver, peers)| {
            let replicator = CacheReplicator::new(&id, cache_name, config.clone(), peers.clone())
                .expect("valid test config");
            TestNode {
                id,
                receiver,
                peers,
                replicator,
            }
        })
        .collect()
}

/// Flush every node's queue (no-op for synchronous nodes).
pub async fn flush_all(nodes: &[TestNode]) {
    for node in nodes {
        node.replicator.flush().await;
    }
}

/// Poll `check` until it holds or `deadline` passes.
pub async fn eventually<F>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    loop {
        if check() {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Check every node holds exactly `expected`.
pub fn assert_converged(nodes: &[TestNode], expected: &BTreeMap<String, Vec<u8>>) {
    for node in nodes {
        assert_eq!(
            &node.cache().snapshot(),
            expected,
            "{} diverged from the expected contents",
            node.id
        );
    }
}
