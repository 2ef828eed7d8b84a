// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

mod common;

use cache_replicator::dispatch::{coalesce, DispatchQueue, PushOutcome};
use cache_replicator::peer::CachePeer;
use cache_replicator::{EventFactory, EventKind, EventRecord, ReplicationReceiver, ReplicatorConfig};
use common::{cluster, MemoryCache};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// A local mutation, as a cache would report it.
#[derive(Debug, Clone)]
enum Op {
    Put(u8, u8),
    Update(u8, u8),
    Remove(u8),
    Clear,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..8, any::<u8>()).prop_map(|(k, v)| Op::Put(k, v)),
        3 => (0u8..8, any::<u8>()).prop_map(|(k, v)| Op::Update(k, v)),
        2 => (0u8..8).prop_map(Op::Remove),
        1 => Just(Op::Clear),
    ]
}

fn record_for(factory: &EventFactory, op: &Op) -> EventRecord {
    match op {
        Op::Put(k, v) => factory.put(format!("k{k}"), vec![*v]),
        Op::Update(k, v) => factory.update(format!("k{k}"), Some(vec![*v])),
        Op::Remove(k) => factory.remove(format!("k{k}")),
        Op::Clear => factory.remove_all(),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// Coalescing Properties
// =============================================================================

proptest! {
    /// The batch is a suffix of the run; nothing is reordered or invented.
    #[test]
    fn coalesce_yields_suffix(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let factory = EventFactory::new("a/users");
        let run: Vec<EventRecord> = ops.iter().map(|op| record_for(&factory, op)).collect();

        let (batch, discarded) = coalesce(run.clone());

        prop_assert_eq!(batch.len() + discarded, run.len());
        prop_assert_eq!(&batch[..], &run[discarded..]);
    }

    /// At most one RemoveAll survives, and only at the head.
    #[test]
    fn coalesce_keeps_only_leading_remove_all(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let factory = EventFactory::new("a/users");
        let run: Vec<EventRecord> = ops.iter().map(|op| record_for(&factory, op)).collect();
        let had_remove_all = run.iter().any(EventRecord::is_remove_all);

        let (batch, _) = coalesce(run);

        let positions: Vec<usize> = batch
            .iter()
            .enumerate()
            .filter(|(_, r)| r.kind() == EventKind::RemoveAll)
            .map(|(i, _)| i)
            .collect();
        if had_remove_all {
            prop_assert_eq!(positions, vec![0]);
        } else {
            prop_assert!(positions.is_empty());
        }
    }

    /// Applying the coalesced batch leaves a peer exactly where the full run would.
    #[test]
    fn coalesce_preserves_outcome(
        initial in prop::collection::btree_map(0u8..8, any::<u8>(), 0..8),
        ops in prop::collection::vec(op_strategy(), 1..48),
    ) {
        let factory = EventFactory::new("a/users");
        let run: Vec<EventRecord> = ops.iter().map(|op| record_for(&factory, op)).collect();
        let (batch, _) = coalesce(run.clone());

        let rt = runtime();
        let (full, coalesced) = rt.block_on(async {
            let full = seeded_receiver(&initial);
            let short = seeded_receiver(&initial);
            full.apply_batch(&run).await.unwrap();
            short.apply_batch(&batch).await.unwrap();
            (full.cache().snapshot(), short.cache().snapshot())
        });
        prop_assert_eq!(full, coalesced);
    }
}

fn seeded_receiver(initial: &BTreeMap<u8, u8>) -> ReplicationReceiver<MemoryCache> {
    let cache = MemoryCache::new();
    for (k, v) in initial {
        cache.insert(&format!("k{k}"), &[*v]);
    }
    ReplicationReceiver::new("b", "users", "//mem/b", cache)
}

// =============================================================================
// Queue Properties
// =============================================================================

proptest! {
    /// The queue never exceeds its capacity and keeps the newest records.
    #[test]
    fn queue_is_bounded_and_drops_oldest(capacity in 1usize..32, pushes in 0usize..100) {
        let factory = EventFactory::new("a/users");
        let queue = DispatchQueue::new(capacity, usize::MAX);

        let mut evicted_total = 0;
        for i in 0..pushes {
            match queue.push_with(|| factory.put(format!("k{i}"), vec![])) {
                PushOutcome::Queued { depth, evicted, .. } => {
                    prop_assert!(depth <= capacity);
                    evicted_total += evicted;
                }
                PushOutcome::Closed => prop_assert!(false, "queue closed unexpectedly"),
            }
        }

        let kept = pushes.min(capacity);
        prop_assert_eq!(queue.len(), kept);
        prop_assert_eq!(evicted_total, pushes - kept);

        let drained = queue.drain(usize::MAX);
        let keys: Vec<String> = drained.iter().filter_map(|r| r.key().map(str::to_string)).collect();
        let expected: Vec<String> = (pushes - kept..pushes).map(|i| format!("k{i}")).collect();
        prop_assert_eq!(keys, expected);
    }

    /// Sequences come out strictly increasing, whatever the drain sizes.
    #[test]
    fn queue_drains_in_sequence_order(pushes in 1usize..64, chunk in 1usize..16) {
        let factory = EventFactory::new("a/users");
        let queue = DispatchQueue::new(1024, 1024);
        for i in 0..pushes {
            queue.push_with(|| factory.remove(format!("k{i}")));
        }

        let mut sequences = Vec::new();
        while !queue.is_empty() {
            sequences.extend(queue.drain(chunk).iter().map(EventRecord::origin_sequence));
        }
        prop_assert_eq!(sequences.len(), pushes);
        prop_assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }
}

// =============================================================================
// Configuration Properties
// =============================================================================

proptest! {
    /// Any combination of flags survives a trip through the property string.
    #[test]
    fn properties_roundtrip_flags(
        puts: bool,
        updates: bool,
        via_copy: bool,
        removals: bool,
        asynchronous: bool,
        interval in 10u64..100_000,
    ) {
        let properties = format!(
            "replicatePuts={puts}, replicateUpdates={updates}, replicateUpdatesViaCopy={via_copy},\n\
             replicateRemovals={removals}, replicateAsynchronously={asynchronous},\n\
             asynchronousReplicationIntervalMillis={interval}"
        );
        let config = ReplicatorConfig::from_properties(&properties).unwrap();

        prop_assert_eq!(config.replicate_puts, puts);
        prop_assert_eq!(config.replicate_updates, updates);
        prop_assert_eq!(config.replicate_updates_via_copy, via_copy);
        prop_assert_eq!(config.replicate_removals, removals);
        prop_assert_eq!(config.replicate_asynchronously, asynchronous);
        prop_assert_eq!(config.asynchronous.interval_duration().as_millis() as u64, interval);
    }

    /// Garbage never panics the parser.
    #[test]
    fn properties_parse_never_panics(input in ".{0,200}") {
        let _ = ReplicatorConfig::from_properties(&input);
    }
}

// =============================================================================
// Convergence Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// With every flag on, a synchronous peer mirrors the origin after any history.
    #[test]
    fn sync_peers_mirror_origin(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let rt = runtime();
        let config = ReplicatorConfig {
            replicate_asynchronously: false,
            ..ReplicatorConfig::for_testing()
        };

        let (origin, follower) = rt.block_on(async {
            let nodes = cluster(2, "users", config);
            for op in &ops {
                apply_op(&nodes[0], op).await;
            }
            (nodes[0].cache().snapshot(), nodes[1].cache().snapshot())
        });
        prop_assert_eq!(origin, follower);
    }

    /// The same holds for asynchronous delivery once the queue is flushed.
    #[test]
    fn async_peers_mirror_origin_after_flush(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let rt = runtime();
        let mut config = ReplicatorConfig::for_testing();
        config.asynchronous.interval = "1h".to_string();

        let (origin, follower) = rt.block_on(async {
            let nodes = cluster(2, "users", config);
            for op in &ops {
                apply_op(&nodes[0], op).await;
            }
            nodes[0].replicator.dispose().await;
            (nodes[0].cache().snapshot(), nodes[1].cache().snapshot())
        });
        prop_assert_eq!(origin, follower);
    }
}

async fn apply_op(node: &common::TestNode, op: &Op) {
    match op {
        Op::Put(k, v) => node.put(&format!("k{k}"), &[*v]).await,
        Op::Update(k, v) => node.update(&format!("k{k}"), &[*v]).await,
        Op::Remove(k) => node.remove(&format!("k{k}")).await,
        Op::Clear => node.remove_all().await,
    }
}
