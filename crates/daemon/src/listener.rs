// SPDX-License-Identifier: MIT

//! Request/response front ends the node controller is reachable on:
//! the admin Unix socket (spec §2 supplement, local CLI) and the
//! scheduler/worker-facing TCP port (spec §4.1/§4.4). Both speak the
//! same [`fabric_wire::NodeRequest`]/[`NodeResponse`] framing, so one
//! `serve_connection` loop backs both listeners — grounded on the
//! teacher's `listener::Listener` racing a handler against client
//! disconnect per accepted connection.

use std::sync::Arc;

use fabric_core::Clock;
use fabric_engine::{ControllerEffect, NodeController};
use fabric_wire::framing;
use fabric_wire::NodeRequest;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ListenError {
    #[error("failed to bind {0}")]
    Bind(#[source] std::io::Error),
}

/// Accept loop for a Unix admin socket. Runs until `shutdown` fires.
pub async fn serve_unix<C: Clock>(
    listener: UnixListener,
    controller: Arc<NodeController<C>>,
    effects_tx: mpsc::Sender<ControllerEffect>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { continue };
                let controller = controller.clone();
                let effects_tx = effects_tx.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    handle_connection(stream, controller, effects_tx, shutdown).await;
                });
            }
        }
    }
}

/// Accept loop for the scheduler/worker-facing TCP port.
pub async fn serve_tcp<C: Clock>(
    listener: TcpListener,
    controller: Arc<NodeController<C>>,
    effects_tx: mpsc::Sender<ControllerEffect>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { continue };
                let controller = controller.clone();
                let effects_tx = effects_tx.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    handle_connection(stream, controller, effects_tx, shutdown).await;
                });
            }
        }
    }
}

/// Read one framed [`NodeRequest`], dispatch it, write back one framed
/// [`NodeResponse`], forwarding any effects onto `effects_tx`. One
/// request per connection, matching the admin CLI's call-and-exit usage.
async fn handle_connection<C, S>(
    mut stream: S,
    controller: Arc<NodeController<C>>,
    effects_tx: mpsc::Sender<ControllerEffect>,
    shutdown: CancellationToken,
) where
    C: Clock,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let timeout = std::time::Duration::from_secs(controller.config().msg_timeout_secs);
    let req: NodeRequest = match framing::read_message(&mut stream, timeout).await {
        Ok(req) => req,
        Err(e) => {
            tracing::debug!(error = %e, "connection closed before a full request arrived");
            return;
        }
    };

    let (resp, effects) = controller.handle_request(req);
    let shuts_down = effects.iter().any(|e| matches!(e, ControllerEffect::ShutdownNode));

    if let Err(e) = framing::write_message(&mut stream, &resp, timeout).await {
        tracing::debug!(error = %e, "failed to write response, client likely disconnected");
    }

    for effect in effects {
        if effects_tx.send(effect).await.is_err() {
            tracing::warn!("effects channel closed, dropping effect");
        }
    }
    if shuts_down {
        shutdown.cancel();
    }
}

/// Bind both front ends (spec §2 supplement: admin socket always local;
/// the scheduler port is `node_ports[0]`).
pub async fn bind(
    socket_path: &std::path::Path,
    tcp_port: u16,
) -> Result<(UnixListener, TcpListener), ListenError> {
    let unix = UnixListener::bind(socket_path).map_err(ListenError::Bind)?;
    let tcp = TcpListener::bind(("0.0.0.0", tcp_port)).await.map_err(ListenError::Bind)?;
    Ok((unix, tcp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_adapters::NullTelemetry;
    use fabric_core::{FakeClock, NodeConfig};
    use fabric_wire::NodeResponse;

    fn test_controller() -> Arc<NodeController<FakeClock>> {
        let config = NodeConfig {
            num_cpus: 2,
            node_ports: vec![9700, 9701, 9702],
            udp_port: 9700,
            name: "listener-test".into(),
            dest_path: std::env::temp_dir(),
            certfile: None,
            keyfile: None,
            msg_timeout_secs: 5,
            min_pulse_interval_secs: 10,
            max_pulse_interval_secs: 60,
            zombie_period_secs: 0,
            ping_interval_secs: 0,
            serve_count: -1,
            service_start: None,
            service_stop: None,
            service_end: None,
            ipv4_udp_multicast: false,
            peers: vec![],
            max_file_size: None,
        };
        Arc::new(NodeController::new(config, FakeClock::new(), Arc::new(NullTelemetry)))
    }

    #[tokio::test]
    async fn handle_connection_round_trips_a_single_request() {
        let controller = test_controller();
        let (effects_tx, _effects_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let (mut client, server) = tokio::io::duplex(4096);

        let handle = tokio::spawn(handle_connection(server, controller, effects_tx, shutdown.clone()));

        framing::write_message(&mut client, &NodeRequest::DispycosNodeInfo, std::time::Duration::from_secs(2))
            .await
            .expect("write request");
        let resp: NodeResponse =
            framing::read_message(&mut client, std::time::Duration::from_secs(2)).await.expect("read response");
        assert!(matches!(resp, NodeResponse::NodeInfo(_)));

        handle.await.expect("connection task");
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn handle_connection_cancels_shutdown_token_on_quit() {
        let controller = test_controller();
        let (effects_tx, mut effects_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let (mut client, server) = tokio::io::duplex(4096);

        let auth = controller.node_auth();
        let handle = tokio::spawn(handle_connection(server, controller, effects_tx, shutdown.clone()));

        framing::write_message(&mut client, &NodeRequest::Quit { auth }, std::time::Duration::from_secs(2))
            .await
            .expect("write request");
        let resp: NodeResponse =
            framing::read_message(&mut client, std::time::Duration::from_secs(2)).await.expect("read response");
        assert!(matches!(resp, NodeResponse::Ok));

        handle.await.expect("connection task");
        assert!(shutdown.is_cancelled());
        assert!(effects_rx.recv().await.is_some(), "quit should emit at least one effect");
    }
}
