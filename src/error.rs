// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the cache replicator.
//!
//! Replication never fails a local cache mutation: every error in this module
//! is either returned from construction (configuration) or caught inside the
//! dispatchers, logged, and turned into a dropped delivery.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Peer` | Depends | A peer call failed (see [`PeerError`]) |
//! | `PeerTimeout` | Yes | A peer call exceeded the call timeout |
//! | `CircuitOpen` | Yes | Peer skipped, too many consecutive failures |
//! | `Transport` | Yes | TCP connect/read/write failure |
//! | `Io` | Yes | Raw socket error |
//! | `Codec` | No | Frame could not be encoded/decoded |
//! | `Config` | No | Configuration invalid or unparseable |
//! | `InvalidState` | No | Lifecycle violation |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! The engine itself never retries a delivery. [`ReplicationError::is_retryable()`]
//! tags every dropped delivery in the dispatcher logs, separating transient
//! outages from peers that rejected the records.

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Error returned by a [`CachePeer`](crate::peer::CachePeer) call.
///
/// Every method on the peer contract may fail independently; none is
/// assumed atomic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// The peer could not be reached at all.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// The peer was reached but rejected or failed the operation.
    #[error("remote error: {0}")]
    Remote(String),

    /// A batch was applied up to `applied` records and then failed.
    ///
    /// Batches are not atomic: the prefix stays applied on the receiver.
    #[error("batch partially applied ({applied} of {total}): {message}")]
    PartialBatch {
        applied: usize,
        total: usize,
        message: String,
    },

    /// The receiving side is shutting down.
    #[error("peer is shutting down")]
    Shutdown,
}

impl PeerError {
    /// Check if the failure is transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::Shutdown => true,
            Self::PartialBatch { .. } => true,
            Self::Remote(_) => false,
        }
    }
}

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Invalid or unparseable configuration.
    ///
    /// Raised at construction time; the replicator is not created.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A peer call returned an error.
    #[error("Peer error ({peer_id}): {source}")]
    Peer {
        peer_id: String,
        #[source]
        source: PeerError,
    },

    /// A peer call did not complete within the configured call timeout.
    #[error("Peer call timed out ({peer_id}) after {timeout_ms}ms")]
    PeerTimeout { peer_id: String, timeout_ms: u64 },

    /// The peer's circuit is open; the call was not attempted.
    #[error("Circuit open for peer {peer_id}")]
    CircuitOpen { peer_id: String },

    /// TCP transport failure talking to a remote endpoint.
    #[error("Transport error ({endpoint}): {message}")]
    Transport { endpoint: String, message: String },

    /// A frame could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Socket level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Lifecycle violation (e.g. async replicator built outside a runtime).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a peer error.
    pub fn peer(peer_id: impl Into<String>, source: PeerError) -> Self {
        Self::Peer {
            peer_id: peer_id.into(),
            source,
        }
    }

    /// Create a transport error.
    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Peer { source, .. } => source.is_retryable(),
            Self::PeerTimeout { .. } => true,
            Self::CircuitOpen { .. } => true,
            Self::Transport { .. } => true,
            Self::Io(_) => true,
            Self::Codec(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Internal(_) => false,
        }
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Peer { .. } => "peer",
            Self::PeerTimeout { .. } => "timeout",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Transport { .. } => "transport",
            Self::Codec(_) => "codec",
            Self::Io(_) => "io",
            Self::InvalidState { .. } => "invalid_state",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<ReplicationError> for PeerError {
    /// Collapse an engine-side error into the peer contract's error type.
    ///
    /// Used by the TCP client, whose `CachePeer` methods must return
    /// [`PeerError`].
    fn from(err: ReplicationError) -> Self {
        match err {
            ReplicationError::Peer { source, .. } => source,
            ReplicationError::Codec(e) => PeerError::Remote(format!("codec: {e}")),
            other => PeerError::Unreachable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_peer_unreachable() {
        let err = ReplicationError::peer("peer-1", PeerError::Unreachable("refused".into()));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("peer-1"));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_not_retryable_peer_remote() {
        let err = ReplicationError::peer("peer-1", PeerError::Remote("no such cache".into()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_is_retryable_timeout() {
        let err = ReplicationError::PeerTimeout {
            peer_id: "peer-2".to_string(),
            timeout_ms: 250,
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("250ms"));
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_is_retryable_circuit_open() {
        let err = ReplicationError::CircuitOpen {
            peer_id: "peer-3".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "circuit_open");
    }

    #[test]
    fn test_not_retryable_config() {
        let err = ReplicationError::Config("replicatePuts: not a boolean".to_string());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("replicatePuts"));
    }

    #[test]
    fn test_peer_shutdown_is_retryable() {
        let err = ReplicationError::peer("peer-1", PeerError::Shutdown);
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "peer");
    }

    #[test]
    fn test_not_retryable_invalid_state() {
        let err = ReplicationError::InvalidState {
            expected: "tokio runtime".to_string(),
            actual: "none".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("tokio runtime"));
    }

    #[test]
    fn test_partial_batch_formatting() {
        let err = PeerError::PartialBatch {
            applied: 3,
            total: 10,
            message: "store full".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 of 10"));
        assert!(msg.contains("store full"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: ReplicationError = io.into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn test_into_peer_error() {
        let err = ReplicationError::transport("127.0.0.1:1", "connection refused");
        let peer_err: PeerError = err.into();
        assert!(matches!(peer_err, PeerError::Unreachable(_)));

        let err = ReplicationError::peer("p", PeerError::Remote("boom".into()));
        let peer_err: PeerError = err.into();
        assert_eq!(peer_err, PeerError::Remote("boom".into()));
    }
}
