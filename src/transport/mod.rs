// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! TCP transport between nodes.
//!
//! - [`RemotePeer`]: client side, a remote receiver as a [`CachePeer`](crate::peer::CachePeer).
//! - [`PeerServer`]: server side, routes incoming requests to local receivers.
//! - [`wire`]: length-prefixed JSON frames shared by both.

pub mod wire;

mod client;
mod server;

pub use client::{RemoteIdentity, RemotePeer, RemotePeerConfig};
pub use server::PeerServer;
