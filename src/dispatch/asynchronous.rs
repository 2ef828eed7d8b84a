// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Asynchronous dispatcher: queued, batched, background delivery.
//!
//! Producers append to the [`DispatchQueue`] and return immediately. One
//! background task per replicator drains it:
//!
//! ```text
//!            ┌─ interval tick ─┐
//! wait for ──┤                 ├──▶ drain(max_batch_size) ──▶ coalesce
//!            └─ queue >= threshold                                │
//!                                                                 ▼
//!                                       peer snapshot ──▶ one apply_batch per peer
//!                                                          (concurrent, isolated)
//! ```
//!
//! A failed peer loses that cycle's batch. Nothing is re-queued.
//!
//! # Graceful Shutdown
//!
//! 1. The queue is closed, so new mutations are rejected.
//! 2. The loop is signalled through a `watch` channel and leaves its wait.
//! 3. Remaining records are flushed in cycles. No new cycle starts once the
//!    shutdown grace has run out; whatever is still queued then is abandoned.
//!
//! In-flight peer calls are never aborted by the signal or the grace; they
//! finish or hit the per-peer call timeout.

use super::queue::{coalesce, DispatchQueue, PushOutcome};
use super::types::{CycleReport, DispatcherState, ReplicatorStats};
use crate::config::AsyncSettings;
use crate::error::{ReplicationError, Result};
use crate::event::{EventFactory, EventRecord};
use crate::metrics;
use crate::peer::PeerManager;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, instrument, warn, Instrument};

/// Extra time granted to the background task, on top of the shutdown grace
/// and one call timeout for the last cycle started inside the grace.
const JOIN_MARGIN: Duration = Duration::from_secs(1);

/// State shared between producers, the background loop and shutdown.
struct DispatchCore {
    cache_name: String,
    factory: EventFactory,
    queue: DispatchQueue,
    peers: Arc<PeerManager>,
    stats: Arc<ReplicatorStats>,
    max_batch_size: usize,
    /// Serializes cycles so per-peer delivery order follows queue order.
    cycle_lock: tokio::sync::Mutex<()>,
}

impl DispatchCore {
    /// One drain-coalesce-fan-out cycle.
    #[instrument(skip(self), fields(cache = %self.cache_name))]
    async fn run_cycle(&self) -> CycleReport {
        let _cycle = self.cycle_lock.lock().await;

        let run = self.queue.drain(self.max_batch_size);
        metrics::set_queue_depth(&self.cache_name, self.queue.len());
        if run.is_empty() {
            return CycleReport::default();
        }

        let start = Instant::now();
        let drained = run.len();
        let (batch, coalesced) = coalesce(run);
        if coalesced > 0 {
            self.stats.record_coalesced(coalesced);
            metrics::record_events_coalesced(&self.cache_name, coalesced);
            debug!(coalesced, "Discarded records made moot by RemoveAll");
        }

        let report = self.fan_out(&batch, drained, coalesced).await;
        metrics::record_cycle(&self.cache_name, drained, batch.len(), start.elapsed());
        report
    }

    async fn fan_out(&self, batch: &[EventRecord], drained: usize, coalesced: usize) -> CycleReport {
        let peers = self.peers.snapshot();
        let results = join_all(
            peers
                .iter()
                .map(|endpoint| async move { (endpoint, endpoint.deliver_batch(batch).await) }),
        )
        .await;

        let mut report = CycleReport {
            drained,
            coalesced,
            batch_size: batch.len(),
            ..Default::default()
        };

        for (endpoint, result) in results {
            match result {
                Ok(()) => {
                    report.peers_delivered += 1;
                    self.stats.record_delivered(batch.len());
                    metrics::record_events_delivered(&self.cache_name, endpoint.id(), batch.len());
                }
                Err(e) => {
                    report.peers_failed += 1;
                    self.stats.record_dropped(batch.len());
                    metrics::record_events_dropped(
                        &self.cache_name,
                        endpoint.id(),
                        e.kind(),
                        batch.len(),
                    );
                    warn!(
                        peer_id = %endpoint.id(),
                        batch_size = batch.len(),
                        retryable = e.is_retryable(),
                        error = %e,
                        "Batch to peer failed, dropped for this cycle"
                    );
                }
            }
        }

        debug!(
            batch_size = report.batch_size,
            peers_delivered = report.peers_delivered,
            peers_failed = report.peers_failed,
            "Dispatch cycle complete"
        );
        report
    }

    /// Drain what's left in cycles until the queue is empty or `grace`
    /// runs out.
    ///
    /// The deadline is checked between cycles only. A cycle that has started
    /// runs to completion (each of its peer calls is bounded by the call
    /// timeout), so every drained record ends up delivered or dropped and
    /// only records still queued are abandoned.
    async fn final_flush(&self, grace: Duration) {
        let pending = self.queue.len();
        if pending == 0 {
            return;
        }
        info!(cache = %self.cache_name, pending, "Flushing queued records before shutdown");

        let deadline = Instant::now() + grace;
        while !self.queue.is_empty() && Instant::now() < deadline {
            self.run_cycle().await;
        }

        let abandoned = self.queue.clear();
        if abandoned > 0 {
            self.stats.record_abandoned(abandoned);
            metrics::record_shutdown_abandoned(&self.cache_name, abandoned);
            warn!(
                cache = %self.cache_name,
                abandoned,
                grace_ms = grace.as_millis() as u64,
                "Shutdown grace expired, queued records abandoned"
            );
        }
    }
}

/// The background loop. Runs until the shutdown signal (or the sender is
/// dropped), then performs the final flush.
async fn run_dispatcher(
    core: Arc<DispatchCore>,
    wake_interval: Duration,
    grace: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let span = info_span!("async_dispatcher", cache = %core.cache_name);

    async move {
        info!(
            interval_ms = wake_interval.as_millis() as u64,
            threshold = core.queue.wake_threshold(),
            max_batch_size = core.max_batch_size,
            "Starting asynchronous dispatcher"
        );

        let mut ticker = interval(wake_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the first timed cycle is one interval out.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Shutdown signal received");
                        break;
                    }
                }

                _ = ticker.tick() => {}

                _ = core.queue.notified() => {}
            }

            // Keep cycling while producers outpace one batch per wake.
            loop {
                core.run_cycle().await;
                if core.queue.len() < core.queue.wake_threshold() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }

        core.final_flush(grace).await;
        info!("Asynchronous dispatcher stopped");
    }
    .instrument(span)
    .await
}

pub struct AsyncDispatcher {
    core: Arc<DispatchCore>,
    shutdown_tx: watch::Sender<bool>,
    state: watch::Sender<DispatcherState>,
    task: Mutex<Option<JoinHandle<()>>>,
    stopping: AtomicBool,
    join_timeout: Duration,
}

impl AsyncDispatcher {
    /// Start the background loop on the current tokio runtime.
    ///
    /// Returns `InvalidState` when called outside a runtime.
    pub fn start(
        cache_name: impl Into<String>,
        factory: EventFactory,
        peers: Arc<PeerManager>,
        stats: Arc<ReplicatorStats>,
        settings: &AsyncSettings,
        call_timeout: Duration,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ReplicationError::InvalidState {
                expected: "tokio runtime".to_string(),
                actual: "no runtime".to_string(),
            }
        })?;

        let cache_name = cache_name.into();
        let grace = settings.shutdown_grace_duration();
        let core = Arc::new(DispatchCore {
            cache_name: cache_name.clone(),
            factory,
            queue: DispatchQueue::new(settings.queue_capacity, settings.batch_threshold),
            peers,
            stats,
            max_batch_size: settings.max_batch_size.max(1),
            cycle_lock: tokio::sync::Mutex::new(()),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state, _) = watch::channel(DispatcherState::Running);
        let task = runtime.spawn(run_dispatcher(
            core.clone(),
            settings.interval_duration(),
            grace,
            shutdown_rx,
        ));
        metrics::set_dispatcher_state(&cache_name, "Running");

        Ok(Self {
            core,
            shutdown_tx,
            state,
            task: Mutex::new(Some(task)),
            stopping: AtomicBool::new(false),
            join_timeout: grace + call_timeout + JOIN_MARGIN,
        })
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// Records waiting for the next cycle.
    pub fn queue_len(&self) -> usize {
        self.core.queue.len()
    }

    /// Create a record and queue it. Never blocks on I/O.
    pub fn enqueue<F>(&self, make: F)
    where
        F: FnOnce(&EventFactory) -> EventRecord,
    {
        let core = &self.core;
        let mut kind = None;
        let outcome = core.queue.push_with(|| {
            let record = make(&core.factory);
            kind = Some(record.kind());
            record
        });

        match outcome {
            PushOutcome::Queued {
                depth,
                evicted,
                evicted_remove_all,
            } => {
                core.stats.record_generated();
                if let Some(kind) = kind {
                    metrics::record_event_generated(&core.cache_name, kind.as_str());
                }
                metrics::set_queue_depth(&core.cache_name, depth);
                if evicted > 0 {
                    core.stats.record_overflowed(evicted);
                    metrics::record_queue_overflow(&core.cache_name, evicted);
                    warn!(
                        cache = %core.cache_name,
                        evicted,
                        capacity = core.queue.capacity(),
                        "Dispatch queue full, oldest records evicted"
                    );
                }
                if evicted_remove_all {
                    warn!(
                        cache = %core.cache_name,
                        "RemoveAll evicted from a full dispatch queue, peers keep entries cleared locally"
                    );
                }
            }
            PushOutcome::Closed => {
                core.stats.record_rejected();
                metrics::record_event_rejected(&core.cache_name);
                debug!(cache = %core.cache_name, "Dispatcher stopping, mutation not replicated");
            }
        }
    }

    /// Run one cycle now instead of waiting for the next wake.
    pub async fn flush(&self) -> CycleReport {
        self.core.run_cycle().await
    }

    /// Two-phase stop: reject new records, then flush within the grace
    /// period and join the background task. Idempotent.
    pub async fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        let cache_name = &self.core.cache_name;
        info!(cache = %cache_name, queued = self.core.queue.len(), "Shutting down asynchronous dispatcher");
        self.state.send_replace(DispatcherState::ShuttingDown);
        metrics::set_dispatcher_state(cache_name, "ShuttingDown");

        self.core.queue.close();
        let _ = self.shutdown_tx.send(true);

        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut task) = task {
            match timeout(self.join_timeout, &mut task).await {
                Ok(Ok(())) => {
                    debug!(cache = %cache_name, "Dispatcher task completed gracefully");
                }
                Ok(Err(e)) => {
                    warn!(cache = %cache_name, error = %e, "Dispatcher task panicked during shutdown");
                }
                Err(_) => {
                    task.abort();
                    warn!(
                        cache = %cache_name,
                        timeout_ms = self.join_timeout.as_millis() as u64,
                        "Dispatcher task did not stop in time, aborted"
                    );
                }
            }
        }

        self.state.send_replace(DispatcherState::Stopped);
        metrics::set_dispatcher_state(cache_name, "Stopped");
        info!(cache = %cache_name, "Asynchronous dispatcher stopped");
    }
}

impl Drop for AsyncDispatcher {
    fn drop(&mut self) {
        // The loop sees the sender drop, flushes and exits on its own.
        self.core.queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerCallConfig;
    use crate::peer::StaticPeerSet;
    use crate::receiver::{NoOpCache, ReplicationReceiver};

    fn settings(interval: &str, threshold: usize, capacity: usize) -> AsyncSettings {
        AsyncSettings {
            interval: interval.to_string(),
            batch_threshold: threshold,
            max_batch_size: 100,
            queue_capacity: capacity,
            shutdown_grace: "1s".to_string(),
        }
    }

    fn start(peer_count: usize, settings: &AsyncSettings) -> (AsyncDispatcher, Arc<ReplicatorStats>) {
        let set = Arc::new(StaticPeerSet::new());
        for i in 0..peer_count {
            set.add(Arc::new(ReplicationReceiver::new(
                format!("node-{i}"),
                "users",
                format!("//10.0.0.{i}:40001"),
                NoOpCache,
            )));
        }
        let peers = Arc::new(PeerManager::new("users", set, PeerCallConfig::testing()));
        let stats = Arc::new(ReplicatorStats::new());
        let dispatcher = AsyncDispatcher::start(
            "users",
            EventFactory::new("local/users"),
            peers,
            stats.clone(),
            settings,
            Duration::from_millis(200),
        )
        .unwrap();
        (dispatcher, stats)
    }

    #[test]
    fn test_start_outside_runtime_is_invalid_state() {
        let set = Arc::new(StaticPeerSet::new());
        let peers = Arc::new(PeerManager::new("users", set, PeerCallConfig::testing()));
        let result = AsyncDispatcher::start(
            "users",
            EventFactory::new("local/users"),
            peers,
            Arc::new(ReplicatorStats::new()),
            &AsyncSettings::testing(),
            Duration::from_millis(200),
        );
        assert!(matches!(result, Err(ReplicationError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_flush_coalesces_and_fans_out() {
        let (dispatcher, stats) = start(2, &settings("1h", 1000, 1000));
        dispatcher.enqueue(|f| f.put("k1", vec![1]));
        dispatcher.enqueue(|f| f.put("k2", vec![2]));
        dispatcher.enqueue(|f| f.remove_all());
        dispatcher.enqueue(|f| f.put("k3", vec![3]));

        let report = dispatcher.flush().await;
        assert_eq!(
            report,
            CycleReport {
                drained: 4,
                coalesced: 2,
                batch_size: 2,
                peers_delivered: 2,
                peers_failed: 0,
            }
        );
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.generated, 4);
        assert_eq!(snapshot.coalesced, 2);
        assert_eq!(snapshot.delivered, 4);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_overflow_counts_evictions() {
        let (dispatcher, stats) = start(0, &settings("1h", 1000, 3));
        for i in 0..5 {
            dispatcher.enqueue(|f| f.put(format!("k{i}"), vec![]));
        }
        assert_eq!(dispatcher.queue_len(), 3);
        assert_eq!(stats.snapshot().overflowed, 2);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_threshold_triggers_cycle_before_interval() {
        let (dispatcher, stats) = start(1, &settings("1h", 3, 1000));
        for i in 0..3 {
            dispatcher.enqueue(|f| f.put(format!("k{i}"), vec![]));
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while stats.snapshot().delivered < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("threshold should wake the dispatcher");
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_flushes_then_rejects() {
        let (dispatcher, stats) = start(1, &settings("1h", 1000, 1000));
        dispatcher.enqueue(|f| f.put("a", vec![]));
        dispatcher.enqueue(|f| f.put("b", vec![]));

        dispatcher.shutdown().await;
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
        assert_eq!(dispatcher.queue_len(), 0);
        assert_eq!(stats.snapshot().delivered, 2);

        dispatcher.enqueue(|f| f.put("late", vec![]));
        assert_eq!(stats.snapshot().rejected, 1);
        assert_eq!(dispatcher.queue_len(), 0);

        // Second stop is a no-op
        dispatcher.shutdown().await;
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }
}
