// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics through the `metrics` facade for:
//! - Records generated, delivered, dropped, coalesced and rejected
//! - Dispatch queue depth and overflow
//! - Dispatch cycle timing and batch sizes
//! - Per-peer call latency and circuit transitions
//! - Receiver-side apply results
//! - TCP transport connections
//!
//! Nothing is recorded unless the host process installs a recorder.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `cache_replication_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use cache_replicator::metrics;
//! use std::time::Duration;
//!
//! metrics::record_event_generated("users", "put");
//! metrics::record_cycle("users", 120, 40, Duration::from_millis(8));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Interceptor
// =============================================================================

/// Record a record created from a local mutation.
pub fn record_event_generated(cache: &str, kind: &str) {
    counter!(
        "cache_replication_events_generated_total",
        "cache" => cache.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a mutation rejected because the replicator is shut down.
pub fn record_event_rejected(cache: &str) {
    counter!("cache_replication_events_rejected_total", "cache" => cache.to_string()).increment(1);
}

// =============================================================================
// Delivery
// =============================================================================

/// Record records delivered to a peer.
pub fn record_events_delivered(cache: &str, peer_id: &str, count: usize) {
    counter!(
        "cache_replication_events_delivered_total",
        "cache" => cache.to_string(),
        "peer_id" => peer_id.to_string()
    )
    .increment(count as u64);
}

/// Record records dropped for a peer (`reason` is an error kind label).
pub fn record_events_dropped(cache: &str, peer_id: &str, reason: &str, count: usize) {
    counter!(
        "cache_replication_events_dropped_total",
        "cache" => cache.to_string(),
        "peer_id" => peer_id.to_string(),
        "reason" => reason.to_string()
    )
    .increment(count as u64);
}

/// Record a single peer call latency by operation.
pub fn record_peer_call_latency(peer_id: &str, operation: &str, duration: Duration) {
    histogram!(
        "cache_replication_peer_call_duration_seconds",
        "peer_id" => peer_id.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record peer circuit state change.
pub fn record_peer_circuit_state(peer_id: &str, state: &str) {
    counter!(
        "cache_replication_peer_circuit_transitions_total",
        "peer_id" => peer_id.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

/// Gauge for the size of the last peer snapshot used for dispatch.
pub fn set_peer_count(cache: &str, count: usize) {
    gauge!("cache_replication_peers", "cache" => cache.to_string()).set(count as f64);
}

// =============================================================================
// Asynchronous dispatcher
// =============================================================================

/// Gauge for current dispatch queue depth.
pub fn set_queue_depth(cache: &str, depth: usize) {
    gauge!("cache_replication_queue_depth", "cache" => cache.to_string()).set(depth as f64);
}

/// Record records evicted from a full queue.
pub fn record_queue_overflow(cache: &str, evicted: usize) {
    counter!("cache_replication_queue_overflow_total", "cache" => cache.to_string())
        .increment(evicted as u64);
}

/// Record records discarded because a later RemoveAll made them moot.
pub fn record_events_coalesced(cache: &str, count: usize) {
    if count > 0 {
        counter!("cache_replication_events_coalesced_total", "cache" => cache.to_string())
            .increment(count as u64);
    }
}

/// Record a completed dispatch cycle.
pub fn record_cycle(cache: &str, drained: usize, batch_size: usize, duration: Duration) {
    let cache = cache.to_string();

    counter!("cache_replication_cycles_total", "cache" => cache.clone()).increment(1);
    counter!("cache_replication_events_drained_total", "cache" => cache.clone())
        .increment(drained as u64);
    histogram!("cache_replication_batch_size", "cache" => cache.clone()).record(batch_size as f64);
    histogram!("cache_replication_cycle_duration_seconds", "cache" => cache)
        .record(duration.as_secs_f64());
}

/// Gauge for dispatcher state.
pub fn set_dispatcher_state(cache: &str, state: &str) {
    let value = match state {
        "Running" => 1.0,
        "ShuttingDown" => 2.0,
        "Stopped" => 3.0,
        _ => -1.0,
    };
    gauge!("cache_replication_dispatcher_state", "cache" => cache.to_string()).set(value);
}

/// Record records still queued when the shutdown grace period ran out.
pub fn record_shutdown_abandoned(cache: &str, count: usize) {
    counter!("cache_replication_shutdown_abandoned_total", "cache" => cache.to_string())
        .increment(count as u64);
}

// =============================================================================
// Receiver
// =============================================================================

/// Record a replicated mutation applied to the local cache.
pub fn record_receiver_applied(cache: &str, kind: &str) {
    counter!(
        "cache_replication_receiver_applied_total",
        "cache" => cache.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a replicated mutation the local cache failed to apply.
pub fn record_receiver_error(cache: &str, kind: &str) {
    counter!(
        "cache_replication_receiver_errors_total",
        "cache" => cache.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

// =============================================================================
// Transport
// =============================================================================

/// Record a client connection attempt.
pub fn record_transport_connection(endpoint: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "cache_replication_transport_connections_total",
        "endpoint" => endpoint.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a connection accepted by the peer server.
pub fn record_server_connection() {
    counter!("cache_replication_server_connections_total").increment(1);
}

/// Record a request served by the peer server.
pub fn record_server_request(operation: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "cache_replication_server_requests_total",
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
}
