// SPDX-License-Identifier: MIT

//! The peer-to-peer messaging fabric the node, spawner and workers ride
//! on top of (spec §6). The wire protocol on top of any transport is
//! fixed ([`fabric_wire`]); this module only abstracts *delivery*:
//! naming, locating, and sending to a peer endpoint, plus a peer
//! liveness stream.
//!
//! Grounded on the `AgentAdapter` trait's shape (async trait, `Send +
//! Sync + 'static`, a typed error enum, an `mpsc` event channel for
//! out-of-band notifications) but the domain here is peer messaging,
//! not agent process lifecycle.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("no peer registered at location {0:?}")]
    NotFound(Location),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("peer {0:?} is offline")]
    Offline(Location),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An opaque peer endpoint, comparable by location only (spec §9: no
/// owning pointers between peers, lookup is address-based).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location(pub String);

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone)]
pub struct PeerStatusEvent {
    pub location: Location,
    pub status: PeerStatus,
}

/// The transport the node, spawner and worker use to address each other
/// and the scheduler. A concrete implementation owns whatever sockets or
/// channels back it; callers only ever see [`Location`]s.
#[async_trait]
pub trait MessagingFabric: Send + Sync + 'static {
    /// Register this process under `name`, returning its bound location.
    async fn register(&self, name: &str) -> Result<Location, FabricError>;

    /// Resolve a named peer, waiting up to `timeout` for it to appear.
    async fn locate(&self, name: &str, timeout: Duration) -> Result<Location, FabricError>;

    /// Send a pre-encoded message to `to`, bounded by `timeout`. Callers
    /// use [`send_json`] to encode a typed payload; keeping this method
    /// byte-oriented keeps the trait object-safe.
    async fn send_bytes(&self, to: &Location, payload: Vec<u8>, timeout: Duration) -> Result<(), FabricError>;

    /// Subscribe to Online/Offline transitions for peers this process
    /// has exchanged messages with.
    fn peer_status(&self) -> mpsc::Receiver<PeerStatusEvent>;

    /// Ask the transport to stop tracking `location` (spec §6: explicit
    /// peer close rather than relying on GC of a cyclic reference).
    async fn close_peer(&self, location: &Location);
}

/// Encode `message` as JSON and deliver it through `fabric`, keeping
/// [`MessagingFabric`] itself free of generic methods (and therefore
/// usable as `dyn MessagingFabric`).
pub async fn send_json<F, T>(
    fabric: &F,
    to: &Location,
    message: &T,
    timeout: Duration,
) -> Result<(), FabricError>
where
    F: MessagingFabric + ?Sized,
    T: Serialize + Sync,
{
    let payload = serde_json::to_vec(message)?;
    fabric.send_bytes(to, payload, timeout).await
}
