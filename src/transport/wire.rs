// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire format for the peer transport.
//!
//! Every message is one frame:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────┐
//! │ length: u32 (BE) │ body: JSON (length bytes)    │
//! └──────────────────┴──────────────────────────────┘
//! ```
//!
//! A connection carries strictly alternating request/response frames.
//! Bodies over [`MAX_FRAME_LEN`] are rejected before any allocation.

use crate::error::{PeerError, ReplicationError, Result};
use crate::event::EventRecord;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame body (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Length prefix size.
pub const HEADER_LEN: usize = 4;

/// A call on a remote [`CachePeer`](crate::peer::CachePeer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Put { cache: String, record: EventRecord },
    Remove { cache: String, key: String },
    RemoveAll { cache: String },
    ApplyBatch { cache: String, records: Vec<EventRecord> },
    Identity { cache: String },
}

impl Request {
    /// Name of the target cache.
    pub fn cache(&self) -> &str {
        match self {
            Self::Put { cache, .. }
            | Self::Remove { cache, .. }
            | Self::RemoveAll { cache }
            | Self::ApplyBatch { cache, .. }
            | Self::Identity { cache } => cache,
        }
    }

    /// Operation label for logs and metrics.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::Remove { .. } => "remove",
            Self::RemoveAll { .. } => "remove_all",
            Self::ApplyBatch { .. } => "apply_batch",
            Self::Identity { .. } => "identity",
        }
    }
}

/// Why a remote call failed, as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No receiver registered for the requested cache.
    UnknownCache,
    /// The receiver rejected or failed the operation.
    Remote,
    /// A batch was partially applied.
    PartialBatch,
    /// The receiver is shutting down.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Removed(bool),
    Identity {
        name: String,
        unique_id: String,
        url: String,
        url_base: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
        /// Records applied before failing (`PartialBatch` only).
        applied: usize,
        total: usize,
    },
}

impl Response {
    /// Encode a receiver failure.
    pub fn from_peer_error(err: &PeerError) -> Self {
        let (kind, applied, total) = match err {
            PeerError::PartialBatch { applied, total, .. } => (ErrorKind::PartialBatch, *applied, *total),
            PeerError::Shutdown => (ErrorKind::Shutdown, 0, 0),
            PeerError::Remote(_) | PeerError::Unreachable(_) => (ErrorKind::Remote, 0, 0),
        };
        let message = match err {
            PeerError::PartialBatch { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self::Error {
            kind,
            message,
            applied,
            total,
        }
    }

    pub fn unknown_cache(cache: &str) -> Self {
        Self::Error {
            kind: ErrorKind::UnknownCache,
            message: format!("no replication receiver for cache '{cache}'"),
            applied: 0,
            total: 0,
        }
    }

    /// Decode a failure back into the peer contract's error.
    ///
    /// Returns `None` for non-error responses.
    pub fn into_peer_error(self) -> Option<PeerError> {
        match self {
            Self::Error {
                kind,
                message,
                applied,
                total,
            } => Some(match kind {
                ErrorKind::PartialBatch => PeerError::PartialBatch {
                    applied,
                    total,
                    message,
                },
                ErrorKind::Shutdown => PeerError::Shutdown,
                ErrorKind::UnknownCache | ErrorKind::Remote => PeerError::Remote(message),
            }),
            _ => None,
        }
    }
}

/// Serialize `message` into a complete frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ReplicationError::Internal(format!(
            "frame of {} bytes exceeds {} byte limit",
            body.len(),
            MAX_FRAME_LEN
        )));
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a whole frame, or the
/// message and the number of bytes consumed.
pub fn decode_frame<T: DeserializeOwned>(buf: &[u8]) -> Result<Option<(T, usize)>> {
    let Some(header) = buf.get(..HEADER_LEN) else {
        return Ok(None);
    };
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    check_len(len)?;
    let Some(body) = buf.get(HEADER_LEN..HEADER_LEN + len) else {
        return Ok(None);
    };
    let message = serde_json::from_slice(body)?;
    Ok(Some((message, HEADER_LEN + len)))
}

/// Write one frame and flush.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    check_len(body.len())?;
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` on a clean end of stream before the length prefix.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    check_len(len)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

fn check_len(len: usize) -> Result<()> {
    if len > MAX_FRAME_LEN {
        return Err(ReplicationError::Internal(format!(
            "frame of {len} bytes exceeds {MAX_FRAME_LEN} byte limit"
        )));
    }
    Ok(())
}
