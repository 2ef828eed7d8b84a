// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event records: one local cache mutation destined for replication.
//!
//! Records are created inline by the [`CacheReplicator`](crate::CacheReplicator)
//! when the local cache mutates, and stamped with a per-source
//! `origin_sequence`. That sequence only orders records of the same source;
//! records from different caches or nodes have no ordering relationship.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of cache mutation carried by an [`EventRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Put,
    Update,
    Remove,
    RemoveAll,
}

impl EventKind {
    /// Lowercase label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Put => "put",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::RemoveAll => "remove_all",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a peer receives for a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Full value snapshot: the peer replaces its entry.
    Value(Vec<u8>),
    /// Invalidation marker: the peer drops its entry (and re-fetches lazily, if it wants).
    Invalidate,
}

impl Payload {
    /// The carried value, if this is a copy.
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Value(v) => Some(v),
            Self::Invalidate => None,
        }
    }

    /// Check if this is an invalidation marker.
    pub fn is_invalidation(&self) -> bool {
        matches!(self, Self::Invalidate)
    }
}

/// Immutable description of one local mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    kind: EventKind,
    /// Absent only for [`EventKind::RemoveAll`].
    key: Option<String>,
    payload: Payload,
    origin_sequence: u64,
    origin: String,
}

impl EventRecord {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn origin_sequence(&self) -> u64 {
        self.origin_sequence
    }

    /// Identity of the source replicator (`node/cache`).
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn is_remove_all(&self) -> bool {
        self.kind == EventKind::RemoveAll
    }

    /// Approximate in-memory size of the payload (for batch size metrics).
    pub fn payload_len(&self) -> usize {
        self.payload.value().map_or(0, <[u8]>::len)
    }
}

/// Creates [`EventRecord`]s for one source, stamping a monotonically
/// increasing `origin_sequence`.
///
/// Callers that need sequence order to match delivery order must create the
/// record inside the same critical section that hands it to the dispatcher.
#[derive(Debug)]
pub struct EventFactory {
    origin: String,
    next_sequence: AtomicU64,
}

impl EventFactory {
    /// Create a factory for the given source identity. Sequences start at 1.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            next_sequence: AtomicU64::new(1),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Sequence the next record will receive.
    pub fn peek_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::Acquire)
    }

    fn stamp(&self, kind: EventKind, key: Option<String>, payload: Payload) -> EventRecord {
        EventRecord {
            kind,
            key,
            payload,
            origin_sequence: self.next_sequence.fetch_add(1, Ordering::AcqRel),
            origin: self.origin.clone(),
        }
    }

    pub fn put(&self, key: impl Into<String>, value: Vec<u8>) -> EventRecord {
        self.stamp(EventKind::Put, Some(key.into()), Payload::Value(value))
    }

    /// Update carrying either the new value (`Some`) or an invalidation (`None`).
    pub fn update(&self, key: impl Into<String>, value: Option<Vec<u8>>) -> EventRecord {
        let payload = value.map_or(Payload::Invalidate, Payload::Value);
        self.stamp(EventKind::Update, Some(key.into()), payload)
    }

    pub fn remove(&self, key: impl Into<String>) -> EventRecord {
        self.stamp(EventKind::Remove, Some(key.into()), Payload::Invalidate)
    }

    pub fn remove_all(&self) -> EventRecord {
        self.stamp(EventKind::RemoveAll, None, Payload::Invalidate)
    }
}
