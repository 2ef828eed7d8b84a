// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! TCP server exposing this node's receivers to remote replicators.
//!
//! One listener serves every cache on the node: requests name their target
//! cache, and the server routes them to the receiver registered under that
//! name. Each connection runs in its own task and handles one request at a
//! time, so records on one connection are applied in the order they were
//! sent.

use crate::error::Result;
use crate::metrics;
use crate::peer::CachePeer;
use crate::transport::wire::{read_frame, write_frame, Request, Response};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

type Receivers = Arc<DashMap<String, Arc<dyn CachePeer>>>;

/// How long `shutdown()` waits for the accept loop.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PeerServer {
    local_addr: SocketAddr,
    receivers: Receivers,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PeerServer {
    /// Bind `addr` and start accepting connections.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let receivers: Receivers = Arc::new(DashMap::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(accept_loop(listener, receivers.clone(), shutdown_rx));
        info!(address = %local_addr, "Peer server listening");

        Ok(Self {
            local_addr,
            receivers,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// This node's endpoint as `//host:port`.
    pub fn url_base(&self) -> String {
        format!("//{}", self.local_addr)
    }

    /// Serve `receiver` under its cache name, replacing any previous one.
    pub fn register(&self, receiver: Arc<dyn CachePeer>) {
        let cache = receiver.name().to_string();
        info!(cache = %cache, unique_id = %receiver.unique_id(), "Receiver registered");
        self.receivers.insert(cache, receiver);
    }

    pub fn deregister(&self, cache_name: &str) -> bool {
        let removed = self.receivers.remove(cache_name).is_some();
        if removed {
            info!(cache = %cache_name, "Receiver deregistered");
        }
        removed
    }

    /// Names of the caches currently served, sorted.
    pub fn caches(&self) -> Vec<String> {
        let mut caches: Vec<String> = self.receivers.iter().map(|e| e.key().clone()).collect();
        caches.sort();
        caches
    }

    /// Stop accepting and close every connection. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(task) = task else {
            return;
        };
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
            Ok(Ok(())) => info!(address = %self.local_addr, "Peer server stopped"),
            Ok(Err(e)) => warn!(address = %self.local_addr, error = %e, "Peer server task panicked"),
            Err(_) => warn!(address = %self.local_addr, "Peer server did not stop in time"),
        }
    }
}

impl Drop for PeerServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn accept_loop(listener: TcpListener, receivers: Receivers, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        let accepted = tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote)) => {
                metrics::record_server_connection();
                let span = info_span!("peer_connection", remote = %remote);
                tokio::spawn(
                    serve_connection(stream, receivers.clone(), shutdown_rx.clone()).instrument(span),
                );
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept peer connection");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
    debug!("Accept loop stopped");
}

async fn serve_connection(
    mut stream: TcpStream,
    receivers: Receivers,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!("Peer connected");
    loop {
        let frame = tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            frame = read_frame::<_, Request>(&mut stream) => frame,
        };

        let request = match frame {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Dropping peer connection after bad frame");
                break;
            }
        };

        let response = serve_request(&receivers, request).await;
        if let Err(e) = write_frame(&mut stream, &response).await {
            debug!(error = %e, "Failed to write response");
            break;
        }
    }
    debug!("Peer disconnected");
}

async fn serve_request(receivers: &DashMap<String, Arc<dyn CachePeer>>, request: Request) -> Response {
    let operation = request.operation();
    let Some(receiver) = receivers.get(request.cache()).map(|entry| entry.value().clone()) else {
        metrics::record_server_request(operation, false);
        return Response::unknown_cache(request.cache());
    };

    let result = match request {
        Request::Put { record, .. } => receiver.put(&record).await.map(|()| Response::Ok),
        Request::Remove { key, .. } => receiver.remove(&key).await.map(Response::Removed),
        Request::RemoveAll { .. } => receiver.remove_all().await.map(|()| Response::Ok),
        Request::ApplyBatch { records, .. } => {
            receiver.apply_batch(&records).await.map(|()| Response::Ok)
        }
        Request::Identity { .. } => Ok(Response::Identity {
            name: receiver.name().to_string(),
            unique_id: receiver.unique_id().to_string(),
            url: receiver.url(),
            url_base: receiver.url_base(),
        }),
    };

    metrics::record_server_request(operation, result.is_ok());
    result.unwrap_or_else(|e| {
        debug!(operation, error = %e, "Receiver rejected request");
        Response::from_peer_error(&e)
    })
}
