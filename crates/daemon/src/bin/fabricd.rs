// SPDX-License-Identifier: MIT

//! The node daemon: binds the admin and scheduler-facing listeners,
//! drives the heartbeat timer, and owns the spawner subprocess for the
//! lifetime of one reservation at a time (spec §2, §4.1).

use std::sync::Arc;
use std::time::Duration;

use fabric_adapters::{ProcTelemetry, TcpFabric, Telemetry};
use fabric_core::SystemClock;
use fabric_daemon::{listener, node_loop::NodeRuntime, Config};
use fabric_engine::NodeController;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Resolution the service-window timer is ticked at — fine enough not to
/// overshoot `ServiceTime`'s minute granularity by more than a moment.
const SERVICE_WINDOW_TICK: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fabric_daemon::init_tracing();

    let config = Config::from_env()?;
    let supervisor = fabric_adapters::ProcessSupervisor::new();
    let _lock = fabric_daemon::lifecycle::startup(&config, &supervisor).await?;
    fabric_daemon::lifecycle::write_node_pid_file(&config, None)?;

    let telemetry: Arc<dyn Telemetry> = Arc::new(ProcTelemetry::new(config.state_dir.clone()));

    let controller = Arc::new(NodeController::new(config.node.clone(), SystemClock, telemetry));
    let fabric = Arc::new(TcpFabric::new());
    let runtime = Arc::new(NodeRuntime::new(controller.clone(), fabric, config.clone()));

    fabric_daemon::lifecycle::write_node_auth(&config, controller.node_auth())?;
    tracing::info!(name = %config.node.name, cpus = config.node.num_cpus, "node daemon ready");

    let (unix_listener, tcp_listener) =
        listener::bind(&config.socket_path, config.node.node_ports.first().copied().unwrap_or(0)).await?;

    let shutdown = CancellationToken::new();
    let (effects_tx, effects_rx) = mpsc::channel(256);

    let unix_task = tokio::spawn(listener::serve_unix(
        unix_listener,
        controller.clone(),
        effects_tx.clone(),
        shutdown.clone(),
    ));
    let tcp_task = tokio::spawn(listener::serve_tcp(
        tcp_listener,
        controller.clone(),
        effects_tx.clone(),
        shutdown.clone(),
    ));

    let effects_task = {
        let runtime = runtime.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { runtime.run_effects(effects_rx, shutdown).await })
    };

    let heartbeat_task = {
        let runtime = runtime.clone();
        let shutdown = shutdown.clone();
        let effects_tx = effects_tx.clone();
        let interval_secs = controller.config().effective_heartbeat_secs(controller.config().max_pulse_interval_secs).max(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => runtime.heartbeat_tick(&effects_tx).await,
                }
            }
        })
    };

    let service_window_task = {
        let runtime = runtime.clone();
        let shutdown = shutdown.clone();
        let effects_tx = effects_tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SERVICE_WINDOW_TICK);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => runtime.service_window_tick(&effects_tx).await,
                }
            }
        })
    };

    shutdown.cancelled().await;
    tracing::info!("shutdown signalled, draining tasks");
    let _ = tokio::join!(unix_task, tcp_task, effects_task, heartbeat_task, service_window_task);

    fabric_daemon::lifecycle::shutdown(&config);
    Ok(())
}
