// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for a cache replicator.
//!
//! Configuration is passed to [`CacheReplicator::new()`](crate::CacheReplicator::new)
//! and can be constructed programmatically, deserialized from YAML/JSON, or
//! parsed from the listener property string used by cache configuration files.
//!
//! # Quick Start
//!
//! ```rust
//! use cache_replicator::config::ReplicatorConfig;
//!
//! let config = ReplicatorConfig::from_properties(
//!     "replicateAsynchronously=true, replicatePuts=true, replicateUpdatesViaCopy=false",
//! ).unwrap();
//! assert!(!config.replicate_updates_via_copy);
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicatorConfig
//! ├── replicate_puts / replicate_updates / replicate_updates_via_copy
//! ├── replicate_removals / replicate_asynchronously   (all default true)
//! ├── asynchronous: AsyncSettings   # background dispatcher tuning
//! └── peer_calls: PeerCallConfig    # per-peer timeout + circuit
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! replicate_updates_via_copy: false
//! asynchronous:
//!   interval: "500ms"
//!   max_batch_size: 500
//!   queue_capacity: 50000
//! peer_calls:
//!   call_timeout: "2s"
//! ```

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Smallest accepted dispatch interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

const REPLICATE_PUTS: &str = "replicatePuts";
const REPLICATE_UPDATES: &str = "replicateUpdates";
const REPLICATE_UPDATES_VIA_COPY: &str = "replicateUpdatesViaCopy";
const REPLICATE_REMOVALS: &str = "replicateRemovals";
const REPLICATE_ASYNCHRONOUSLY: &str = "replicateAsynchronously";
const INTERVAL_MILLIS: &str = "asynchronousReplicationIntervalMillis";
const MAX_BATCH_SIZE: &str = "asynchronousReplicationMaximumBatchSize";
const BATCH_THRESHOLD: &str = "asynchronousReplicationBatchThreshold";
const QUEUE_CAPACITY: &str = "asynchronousReplicationQueueCapacity";
const SHUTDOWN_GRACE_MILLIS: &str = "asynchronousReplicationShutdownGraceMillis";
const CALL_TIMEOUT_MILLIS: &str = "peerCallTimeoutMillis";

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `CacheReplicator::new()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatorConfig {
    /// Generate records for inserts.
    #[serde(default = "default_true")]
    pub replicate_puts: bool,

    /// Generate records for updates of existing keys.
    #[serde(default = "default_true")]
    pub replicate_updates: bool,

    /// Updates carry the full value (`true`) or only an invalidation (`false`).
    #[serde(default = "default_true")]
    pub replicate_updates_via_copy: bool,

    /// Generate records for removals.
    #[serde(default = "default_true")]
    pub replicate_removals: bool,

    /// Use the background dispatcher (`true`) or deliver inline (`false`).
    /// Decided once, at construction.
    #[serde(default = "default_true")]
    pub replicate_asynchronously: bool,

    #[serde(default)]
    pub asynchronous: AsyncSettings,

    #[serde(default)]
    pub peer_calls: PeerCallConfig,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            replicate_puts: true,
            replicate_updates: true,
            replicate_updates_via_copy: true,
            replicate_removals: true,
            replicate_asynchronously: true,
            asynchronous: AsyncSettings::default(),
            peer_calls: PeerCallConfig::default(),
        }
    }
}

impl ReplicatorConfig {
    /// Defaults with inline (synchronous) delivery.
    pub fn synchronous() -> Self {
        Self {
            replicate_asynchronously: false,
            ..Self::default()
        }
    }

    /// Fast timings for tests.
    pub fn for_testing() -> Self {
        Self {
            asynchronous: AsyncSettings::testing(),
            peer_calls: PeerCallConfig::testing(),
            ..Self::default()
        }
    }

    /// Parse a listener property string.
    ///
    /// Pairs are `name=value`, separated by commas and/or newlines. Flags
    /// that are absent keep their default (`true`). Unparseable values are
    /// configuration errors; unknown names are logged and ignored.
    pub fn from_properties(properties: &str) -> Result<Self> {
        let mut config = Self::default();

        for pair in properties
            .split([',', '\n', '\r'])
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                ReplicationError::Config(format!("malformed property '{pair}': expected name=value"))
            })?;
            let name = name.trim();
            let value = value.trim();
            debug!(property = name, value, "Extracted replicator property");

            match name {
                REPLICATE_PUTS => config.replicate_puts = parse_bool(name, value)?,
                REPLICATE_UPDATES => config.replicate_updates = parse_bool(name, value)?,
                REPLICATE_UPDATES_VIA_COPY => {
                    config.replicate_updates_via_copy = parse_bool(name, value)?
                }
                REPLICATE_REMOVALS => config.replicate_removals = parse_bool(name, value)?,
                REPLICATE_ASYNCHRONOUSLY => {
                    config.replicate_asynchronously = parse_bool(name, value)?
                }
                INTERVAL_MILLIS => {
                    let millis = parse_u64(name, value)?;
                    if Duration::from_millis(millis) < MIN_INTERVAL {
                        warn!(
                            property = name,
                            millis,
                            minimum_ms = MIN_INTERVAL.as_millis() as u64,
                            "Interval below minimum, using default"
                        );
                    } else {
                        config.asynchronous.interval = format!("{millis}ms");
                    }
                }
                MAX_BATCH_SIZE => config.asynchronous.max_batch_size = parse_usize(name, value)?,
                BATCH_THRESHOLD => config.asynchronous.batch_threshold = parse_usize(name, value)?,
                QUEUE_CAPACITY => config.asynchronous.queue_capacity = parse_usize(name, value)?,
                SHUTDOWN_GRACE_MILLIS => {
                    config.asynchronous.shutdown_grace = format!("{}ms", parse_u64(name, value)?)
                }
                CALL_TIMEOUT_MILLIS => {
                    config.peer_calls.call_timeout = format!("{}ms", parse_u64(name, value)?)
                }
                unknown => {
                    warn!(property = unknown, "Ignoring unknown replicator property");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.asynchronous.validate()?;
        self.peer_calls.validate()
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ReplicationError::Config(format!(
            "{name}: '{value}' is not a boolean"
        )))
    }
}

fn parse_u64(name: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|e| ReplicationError::Config(format!("{name}: '{value}' is not a number: {e}")))
}

fn parse_usize(name: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|e| ReplicationError::Config(format!("{name}: '{value}' is not a number: {e}")))
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| ReplicationError::Config(format!("{name}: '{value}' is not a duration: {e}")))
}

fn default_true() -> bool {
    true
}

// ═══════════════════════════════════════════════════════════════════════════════
// AsyncSettings: background dispatcher
// ═══════════════════════════════════════════════════════════════════════════════

/// Background dispatcher tuning. Ignored in synchronous mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncSettings {
    /// Fixed wake interval as a duration string (e.g., "1s").
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Wake immediately once this many records are queued.
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,

    /// Maximum records drained into one dispatch cycle.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Queue bound; the oldest records are evicted beyond it.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long the final flush may take during shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: String,
}

fn default_interval() -> String {
    "1s".to_string()
}

fn default_batch_threshold() -> usize {
    1000
}

fn default_max_batch_size() -> usize {
    1000
}

fn default_queue_capacity() -> usize {
    100_000
}

fn default_shutdown_grace() -> String {
    "5s".to_string()
}

impl Default for AsyncSettings {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            batch_threshold: default_batch_threshold(),
            max_batch_size: default_max_batch_size(),
            queue_capacity: default_queue_capacity(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl AsyncSettings {
    /// Fast cycles for tests.
    pub fn testing() -> Self {
        Self {
            interval: "10ms".to_string(),
            batch_threshold: 100,
            max_batch_size: 100,
            queue_capacity: 1000,
            shutdown_grace: "1s".to_string(),
        }
    }

    /// Parsed wake interval, falling back to 1s if unparseable.
    pub fn interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.interval).unwrap_or(Duration::from_secs(1))
    }

    /// Parsed shutdown grace, falling back to 5s if unparseable.
    pub fn shutdown_grace_duration(&self) -> Duration {
        humantime::parse_duration(&self.shutdown_grace).unwrap_or(Duration::from_secs(5))
    }

    fn validate(&self) -> Result<()> {
        let interval = parse_duration("asynchronous.interval", &self.interval)?;
        if interval < MIN_INTERVAL {
            return Err(ReplicationError::Config(format!(
                "asynchronous.interval: {interval:?} is below the {MIN_INTERVAL:?} minimum"
            )));
        }
        parse_duration("asynchronous.shutdown_grace", &self.shutdown_grace)?;
        for (name, value) in [
            ("asynchronous.batch_threshold", self.batch_threshold),
            ("asynchronous.max_batch_size", self.max_batch_size),
            ("asynchronous.queue_capacity", self.queue_capacity),
        ] {
            if value == 0 {
                return Err(ReplicationError::Config(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PeerCallConfig: per-peer call bounds
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounds applied to every call made to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerCallConfig {
    /// Upper bound on a single peer call (duration string).
    /// Keeps one unreachable peer from stalling the others.
    #[serde(default = "default_call_timeout")]
    pub call_timeout: String,

    /// Number of consecutive failures before the peer's circuit opens.
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,

    /// How long an open circuit rejects calls before a trial call (seconds).
    #[serde(default = "default_circuit_reset_timeout")]
    pub circuit_reset_timeout_sec: u64,
}

fn default_call_timeout() -> String {
    "5s".to_string()
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_reset_timeout() -> u64 {
    30
}

impl Default for PeerCallConfig {
    fn default() -> Self {
        Self {
            call_timeout: default_call_timeout(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_reset_timeout_sec: default_circuit_reset_timeout(),
        }
    }
}

impl PeerCallConfig {
    /// Short timeout for tests.
    pub fn testing() -> Self {
        Self {
            call_timeout: "200ms".to_string(),
            circuit_failure_threshold: 5,
            circuit_reset_timeout_sec: 1,
        }
    }

    /// Parsed call timeout, falling back to 5s if unparseable.
    pub fn call_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.call_timeout).unwrap_or(Duration::from_secs(5))
    }

    /// Circuit reset timeout as a Duration.
    pub fn circuit_reset_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_reset_timeout_sec)
    }

    fn validate(&self) -> Result<()> {
        let timeout = parse_duration("peer_calls.call_timeout", &self.call_timeout)?;
        if timeout.is_zero() {
            return Err(ReplicationError::Config(
                "peer_calls.call_timeout must be > 0".to_string(),
            ));
        }
        if self.circuit_failure_threshold == 0 {
            return Err(ReplicationError::Config(
                "peer_calls.circuit_failure_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
