// SPDX-License-Identifier: MIT

//! In-process reference `MessagingFabric`, used by the engine's tests
//! and scenario harness. Registrations live in a shared table; `send`
//! delivers straight into the recipient's inbox channel with no real
//! I/O. Grounded on the `FakeAgentAdapter` test-double pattern (a
//! `parking_lot::Mutex`-guarded table standing in for a real transport).

use crate::fabric::{FabricError, Location, MessagingFabric, PeerStatus, PeerStatusEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Peer {
    inbox: mpsc::Sender<Vec<u8>>,
}

#[derive(Clone)]
pub struct LoopbackFabric {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    peers: HashMap<String, Peer>,
    status_tx: mpsc::Sender<PeerStatusEvent>,
    status_rx: Option<mpsc::Receiver<PeerStatusEvent>>,
}

impl LoopbackFabric {
    pub fn new() -> Self {
        let (status_tx, status_rx) = mpsc::channel(256);
        Self { inner: Arc::new(Mutex::new(Inner { peers: HashMap::new(), status_tx, status_rx: Some(status_rx) })) }
    }

    /// Register `name` and return the receiving half of its inbox, so a
    /// test harness can drive a simulated peer's message loop.
    pub fn register_with_inbox(&self, name: &str) -> (Location, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(256);
        let mut inner = self.inner.lock();
        inner.peers.insert(name.to_string(), Peer { inbox: tx });
        let _ = inner.status_tx.try_send(PeerStatusEvent { location: Location(name.to_string()), status: PeerStatus::Online });
        (Location(name.to_string()), rx)
    }
}

impl Default for LoopbackFabric {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagingFabric for LoopbackFabric {
    async fn register(&self, name: &str) -> Result<Location, FabricError> {
        Ok(self.register_with_inbox(name).0)
    }

    async fn locate(&self, name: &str, timeout: Duration) -> Result<Location, FabricError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.inner.lock().peers.contains_key(name) {
                return Ok(Location(name.to_string()));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(FabricError::Timeout("locate"));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn send_bytes(&self, to: &Location, payload: Vec<u8>, timeout: Duration) -> Result<(), FabricError> {
        let sender = {
            let inner = self.inner.lock();
            inner.peers.get(&to.0).map(|p| p.inbox.clone())
        };
        let sender = sender.ok_or_else(|| FabricError::NotFound(to.clone()))?;
        tokio::time::timeout(timeout, sender.send(payload))
            .await
            .map_err(|_| FabricError::Timeout("send"))?
            .map_err(|_| FabricError::Offline(to.clone()))
    }

    fn peer_status(&self) -> mpsc::Receiver<PeerStatusEvent> {
        self.inner
            .lock()
            .status_rx
            .take()
            .expect("peer_status subscribed more than once on this LoopbackFabric")
    }

    async fn close_peer(&self, location: &Location) {
        self.inner.lock().peers.remove(&location.0);
    }
}
