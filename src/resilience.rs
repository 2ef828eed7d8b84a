// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry and backoff for the TCP transport.
//!
//! The dispatchers never retry a delivery. The only retry loop in the crate
//! is the [`RemotePeer`](crate::transport::RemotePeer) connection attempt,
//! and that loop still runs inside the per-peer call timeout, so a peer that
//! refuses connections can never stall a cycle past that bound.

use std::time::Duration;

/// Configuration for connection retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of connection attempts per call (at least 1).
    pub max_attempts: usize,

    /// Initial delay before first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,

    /// Timeout for each individual connection attempt.
    pub connection_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// One attempt, no backoff.
    ///
    /// Suits synchronous replication, where every retry is spent inside the
    /// caller's latency budget.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_millis(200),
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let multiplier = self.backoff_factor.powi(exponent);
        // Capped in f64: the uncapped product can exceed what Duration holds.
        let delay_secs = (self.initial_delay.as_secs_f64() * multiplier).min(self.max_delay.as_secs_f64());

        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }
}
