// SPDX-License-Identifier: MIT

//! TCP-backed `MessagingFabric`, used by `fabricd`/`fabric-worker` for the
//! scheduler- and client-facing peer channels (spec §6). Generalizes
//! [`crate::loopback_fabric::LoopbackFabric`]'s in-memory registration
//! table to real sockets: `register` binds a listener and hands back its
//! address as the [`Location`]; every other peer is addressed directly
//! by a `host:port` string the caller already holds (the scheduler and
//! client locations arrive as explicit strings in the node's own wire
//! protocol), so `locate` only probes reachability rather than resolving
//! a name through a directory service.

use crate::fabric::{FabricError, Location, MessagingFabric, PeerStatus, PeerStatusEvent};
use async_trait::async_trait;
use fabric_wire::framing;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub struct TcpFabric {
    status_tx: mpsc::Sender<PeerStatusEvent>,
    status_rx: Mutex<Option<mpsc::Receiver<PeerStatusEvent>>>,
}

impl TcpFabric {
    pub fn new() -> Self {
        let (status_tx, status_rx) = mpsc::channel(256);
        Self { status_tx, status_rx: Mutex::new(Some(status_rx)) }
    }

    /// Bind an ephemeral listener for `name` and return its location plus
    /// the channel every inbound message is forwarded to. The accept loop
    /// runs for the lifetime of the returned receiver's sender.
    pub async fn register_with_inbox(&self, name: &str) -> Result<(Location, mpsc::Receiver<Vec<u8>>), FabricError> {
        self.register_with_inbox_at(name, 0).await
    }

    /// Like [`Self::register_with_inbox`], binding to a specific port
    /// (spec §3: a worker binds the port its slot was assigned, not an
    /// arbitrary ephemeral one). Port `0` picks an ephemeral port.
    pub async fn register_with_inbox_at(
        &self,
        name: &str,
        port: u16,
    ) -> Result<(Location, mpsc::Receiver<Vec<u8>>), FabricError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(256);
        let label = name.to_string();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let tx = tx.clone();
                let label = label.clone();
                tokio::spawn(async move {
                    let mut stream = stream;
                    match framing::read_message::<_, Vec<u8>>(&mut stream, Duration::from_secs(30)).await {
                        Ok(payload) => {
                            let _ = tx.send(payload).await;
                        }
                        Err(e) => tracing::debug!(peer = %label, error = %e, "inbound message read failed"),
                    }
                });
            }
        });
        Ok((Location(addr.to_string()), rx))
    }
}

impl Default for TcpFabric {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_addr(location: &Location) -> Result<SocketAddr, FabricError> {
    location.0.parse().map_err(|_| FabricError::NotFound(location.clone()))
}

#[async_trait]
impl MessagingFabric for TcpFabric {
    async fn register(&self, name: &str) -> Result<Location, FabricError> {
        let (location, rx) = self.register_with_inbox(name).await?;
        // The caller only wanted a location (e.g. admin/introspection use);
        // drop the inbox rather than leak the accept loop's only consumer.
        drop(rx);
        let _ = self.status_tx.try_send(PeerStatusEvent { location: location.clone(), status: PeerStatus::Online });
        Ok(location)
    }

    async fn locate(&self, name: &str, timeout: Duration) -> Result<Location, FabricError> {
        let location = Location(name.to_string());
        let addr = parse_addr(&location)?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if TcpStream::connect(addr).await.is_ok() {
                let _ = self.status_tx.try_send(PeerStatusEvent { location: location.clone(), status: PeerStatus::Online });
                return Ok(location);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(FabricError::Timeout("locate"));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn send_bytes(&self, to: &Location, payload: Vec<u8>, timeout: Duration) -> Result<(), FabricError> {
        let addr = parse_addr(to)?;
        let connect = tokio::time::timeout(timeout, TcpStream::connect(addr)).await;
        let mut stream = match connect {
            Ok(Ok(stream)) => stream,
            Ok(Err(_)) | Err(_) => {
                let _ = self.status_tx.try_send(PeerStatusEvent { location: to.clone(), status: PeerStatus::Offline });
                return Err(FabricError::Offline(to.clone()));
            }
        };
        framing::write_message(&mut stream, &payload, timeout).await.map_err(|e| match e {
            framing::ProtocolError::Timeout => FabricError::Timeout("send"),
            other => FabricError::Io(std::io::Error::other(other.to_string())),
        })
    }

    fn peer_status(&self) -> mpsc::Receiver<PeerStatusEvent> {
        self.status_rx.lock().take().expect("peer_status subscribed more than once on this TcpFabric")
    }

    async fn close_peer(&self, _location: &Location) {
        // Connections are per-message (no persistent session to tear down).
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::send_json;

    #[tokio::test]
    async fn delivers_to_a_registered_peer() {
        let fabric = TcpFabric::new();
        let (loc, mut inbox) = fabric.register_with_inbox("worker-1").await.expect("register");
        send_json(&fabric, &loc, &"hello", Duration::from_secs(1)).await.expect("send");
        let bytes = inbox.recv().await.expect("recv");
        let value: String = serde_json::from_slice(&bytes).expect("decode");
        assert_eq!(value, "hello");
    }

    #[tokio::test]
    async fn send_to_an_unbound_address_fails_offline() {
        let fabric = TcpFabric::new();
        let err = fabric.send_bytes(&Location("127.0.0.1:1".into()), vec![], Duration::from_millis(200)).await;
        assert!(matches!(err, Err(FabricError::Offline(_))));
    }

    #[tokio::test]
    async fn locate_times_out_for_an_address_with_nothing_listening() {
        let fabric = TcpFabric::new();
        let err = fabric.locate("127.0.0.1:1", Duration::from_millis(100)).await;
        assert!(matches!(err, Err(FabricError::Timeout(_))));
    }
}
