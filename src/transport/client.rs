// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! TCP client adapter: a remote node's receiver as a [`CachePeer`].
//!
//! # Connection Lifecycle
//!
//! ```text
//! Disconnected ──call()──► connect (RetryConfig backoff) ──► Connected
//!      ▲                                                        │
//!      └──────── any I/O error, timeout or codec error ◄────────┘
//! ```
//!
//! Connections are lazy and shared: one `TcpStream` per `RemotePeer`,
//! used by one call at a time. A failed or cancelled call drops the stream
//! so the next call reconnects. Every call is bounded by `io_timeout`; the dispatcher's
//! per-peer call timeout bounds the whole thing again from outside.

use crate::config::ReplicatorConfig;
use crate::error::{PeerError, ReplicationError, Result};
use crate::event::EventRecord;
use crate::metrics;
use crate::peer::{BoxFuture, CachePeer};
use crate::resilience::RetryConfig;
use crate::transport::wire::{read_frame, write_frame, Request, Response};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Where and how to reach a remote receiver.
#[derive(Debug, Clone)]
pub struct RemotePeerConfig {
    /// `host:port` of the remote [`PeerServer`](crate::transport::PeerServer).
    pub address: String,
    /// Cache on the remote node to replicate into.
    pub cache_name: String,
    /// Upper bound on one request/response exchange.
    pub io_timeout: Duration,
    pub retry: RetryConfig,
}

impl RemotePeerConfig {
    pub fn new(address: impl Into<String>, cache_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            cache_name: cache_name.into(),
            io_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }

    /// Timings matched to the replicator that will call this peer.
    ///
    /// The exchange timeout follows the per-peer call timeout. Synchronous
    /// replication gets a single connection attempt, since every retry is
    /// spent inside the caller's mutation.
    pub fn for_replicator(
        address: impl Into<String>,
        cache_name: impl Into<String>,
        replicator: &ReplicatorConfig,
    ) -> Self {
        let retry = if replicator.replicate_asynchronously {
            RetryConfig::default()
        } else {
            RetryConfig::single_attempt()
        };
        Self {
            io_timeout: replicator.peer_calls.call_timeout_duration(),
            retry,
            ..Self::new(address, cache_name)
        }
    }

    /// Short timeouts and retries for tests.
    pub fn for_testing(address: impl Into<String>, cache_name: impl Into<String>) -> Self {
        Self {
            io_timeout: Duration::from_millis(500),
            retry: RetryConfig::testing(),
            ..Self::new(address, cache_name)
        }
    }
}

/// Identity reported by a remote receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub name: String,
    pub unique_id: String,
    pub url: String,
    pub url_base: String,
}

/// A remote cache peer reached over TCP.
pub struct RemotePeer {
    config: RemotePeerConfig,
    unique_id: String,
    conn: Mutex<Option<TcpStream>>,
}

impl RemotePeer {
    pub fn new(config: RemotePeerConfig) -> Self {
        Self {
            unique_id: format!("{}/{}", config.address, config.cache_name),
            config,
            conn: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RemotePeerConfig {
        &self.config
    }

    /// Check if a connection is currently open.
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Drop the connection (the next call reconnects).
    pub async fn disconnect(&self) {
        if self.conn.lock().await.take().is_some() {
            debug!(address = %self.config.address, "Disconnected from peer");
        }
    }

    /// Ask the remote receiver for its own identity.
    pub async fn fetch_identity(&self) -> Result<RemoteIdentity> {
        let request = Request::Identity {
            cache: self.config.cache_name.clone(),
        };
        match self.call(&request).await? {
            Response::Identity {
                name,
                unique_id,
                url,
                url_base,
            } => Ok(RemoteIdentity {
                name,
                unique_id,
                url,
                url_base,
            }),
            other => Err(ReplicationError::peer(
                self.unique_id.clone(),
                unexpected(other, "identity"),
            )),
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let retry = &self.config.retry;
        let address = &self.config.address;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let failure = match timeout(retry.connection_timeout, TcpStream::connect(address)).await {
                Ok(Ok(stream)) => {
                    // Frames are small and latency-bound.
                    let _ = stream.set_nodelay(true);
                    metrics::record_transport_connection(address, true);
                    if attempt > 1 {
                        info!(address = %address, attempt, "Connected to peer after retry");
                    } else {
                        debug!(address = %address, "Connected to peer");
                    }
                    return Ok(stream);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "connect timed out after {}ms",
                    retry.connection_timeout.as_millis()
                ),
            };
            metrics::record_transport_connection(address, false);

            if attempt >= max_attempts {
                warn!(address = %address, attempt, error = %failure, "Failed to connect to peer");
                return Err(ReplicationError::transport(
                    address.clone(),
                    format!("connection failed after {attempt} attempts: {failure}"),
                ));
            }

            let delay = retry.delay_for_attempt(attempt);
            debug!(
                address = %address,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Connection attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One request/response exchange on the shared connection.
    ///
    /// The stream is taken out of `conn` for the exchange and put back only
    /// after a complete response. A call cancelled mid-exchange (by the
    /// per-peer call timeout or a shutdown) drops the stream with it, so a
    /// late response can never be read by the next call.
    async fn call(&self, request: &Request) -> Result<Response> {
        let mut conn = self.conn.lock().await;
        let mut stream = match conn.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        let exchange = async {
            write_frame(&mut stream, request).await?;
            read_frame::<_, Response>(&mut stream).await
        };
        let result = timeout(self.config.io_timeout, exchange).await;

        let outcome = match result {
            Ok(Ok(Some(response))) => {
                *conn = Some(stream);
                return Ok(response);
            }
            Ok(Ok(None)) => ReplicationError::transport(
                self.config.address.clone(),
                "connection closed by peer",
            ),
            Ok(Err(e)) => e,
            Err(_) => ReplicationError::transport(
                self.config.address.clone(),
                format!(
                    "{} timed out after {}ms",
                    request.operation(),
                    self.config.io_timeout.as_millis()
                ),
            ),
        };

        drop(stream);
        debug!(
            address = %self.config.address,
            operation = request.operation(),
            error = %outcome,
            "Peer call failed, connection dropped"
        );
        Err(outcome)
    }

    async fn call_expecting_ok(&self, request: Request) -> std::result::Result<(), PeerError> {
        match self.call(&request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other, request.operation())),
        }
    }
}

/// Turn a non-matching response into a contract error.
fn unexpected(response: Response, operation: &str) -> PeerError {
    let description = format!("{response:?}");
    response.into_peer_error().unwrap_or_else(|| {
        PeerError::Remote(format!("unexpected response to {operation}: {description}"))
    })
}

impl CachePeer for RemotePeer {
    fn put<'a>(&'a self, record: &'a EventRecord) -> BoxFuture<'a, ()> {
        Box::pin(self.call_expecting_ok(Request::Put {
            cache: self.config.cache_name.clone(),
            record: record.clone(),
        }))
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let request = Request::Remove {
                cache: self.config.cache_name.clone(),
                key: key.to_string(),
            };
            match self.call(&request).await? {
                Response::Removed(applied) => Ok(applied),
                other => Err(unexpected(other, "remove")),
            }
        })
    }

    fn remove_all(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.call_expecting_ok(Request::RemoveAll {
            cache: self.config.cache_name.clone(),
        }))
    }

    fn apply_batch<'a>(&'a self, records: &'a [EventRecord]) -> BoxFuture<'a, ()> {
        Box::pin(self.call_expecting_ok(Request::ApplyBatch {
            cache: self.config.cache_name.clone(),
            records: records.to_vec(),
        }))
    }

    fn name(&self) -> &str {
        &self.config.cache_name
    }

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn url(&self) -> String {
        format!("//{}/{}", self.config.address, self.config.cache_name)
    }

    fn url_base(&self) -> String {
        format!("//{}", self.config.address)
    }
}
