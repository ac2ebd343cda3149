// SPDX-License-Identifier: MIT

//! Owns the spawner child process and drives [`ControllerEffect`]s to
//! completion — the async half of the node (spec §4.1/§4.2/§4.3). The
//! controller stays synchronous and testable; this module is the
//! runtime shell around it: subprocess lifecycle, fabric I/O, and the
//! heartbeat and service-window ticks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fabric_adapters::{send_json, Location, MessagingFabric, ProcessSupervisor};
use fabric_core::{AuthToken, Clock, SlotId};
use fabric_engine::{heartbeat, timer, ControllerEffect, NodeController};
use fabric_wire::{framing, SpawnerCommand, SpawnerEvent};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::ChildStdin;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::lifecycle;

struct SpawnerLink {
    stdin: ChildStdin,
    pid: u32,
}

/// The async side of the node: spawner lifecycle, effect execution, and
/// the heartbeat tick. `C` is the clock, `F` the messaging fabric —
/// generic so tests can swap in a `FakeClock`/`LoopbackFabric` pair.
pub struct NodeRuntime<C: Clock, F: MessagingFabric> {
    pub controller: Arc<NodeController<C>>,
    supervisor: ProcessSupervisor,
    fabric: Arc<F>,
    config: Config,
    spawner: Mutex<Option<SpawnerLink>>,
}

impl<C: Clock, F: MessagingFabric> NodeRuntime<C, F> {
    pub fn new(controller: Arc<NodeController<C>>, fabric: Arc<F>, config: Config) -> Self {
        Self { controller, supervisor: ProcessSupervisor::new(), fabric, config, spawner: Mutex::new(None) }
    }

    /// Drain effects from `effects_rx` until `shutdown` fires or the
    /// channel closes.
    pub async fn run_effects(
        self: &Arc<Self>,
        mut effects_rx: mpsc::Receiver<ControllerEffect>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                effect = effects_rx.recv() => {
                    let Some(effect) = effect else { return };
                    self.apply_effect(effect, &shutdown).await;
                }
            }
        }
    }

    /// One tick of the heartbeat timer (spec §4.2), delivering a pulse to
    /// the scheduler if a reservation is active, then applying whatever
    /// effects the tick produces.
    pub async fn heartbeat_tick(self: &Arc<Self>, effects_tx: &mpsc::Sender<ControllerEffect>) {
        let now = self.controller.clock().epoch_secs();
        let reservation = self.controller.active_reservation();

        let delivered = match (&reservation, heartbeat::build_pulse(&self.controller)) {
            (Some(r), Some(pulse)) => {
                let to = Location(r.scheduler_location.clone());
                let timeout = Duration::from_secs(self.config.node.msg_timeout_secs);
                Some(send_json(self.fabric.as_ref(), &to, &pulse, timeout).await.is_ok())
            }
            _ => None,
        };

        let outcome = heartbeat::tick(&self.controller, now, delivered);
        for effect in outcome.effects {
            if effects_tx.send(effect).await.is_err() {
                return;
            }
        }
    }

    /// One tick of the service-window timer (spec §4.1), opening or
    /// closing the window and applying whatever effects that produces.
    pub async fn service_window_tick(self: &Arc<Self>, effects_tx: &mpsc::Sender<ControllerEffect>) {
        let now = self.controller.clock().epoch_secs();
        let outcome = timer::tick(&self.controller, now);
        for effect in outcome.effects {
            if effects_tx.send(effect).await.is_err() {
                return;
            }
        }
    }

    async fn apply_effect(self: &Arc<Self>, effect: ControllerEffect, shutdown: &CancellationToken) {
        match effect {
            ControllerEffect::PersistClientPayload { bytes, .. } => {
                if let Err(e) = tokio::fs::write(self.client_payload_path(), bytes).await {
                    tracing::warn!(error = %e, "failed to persist client payload");
                }
            }
            ControllerEffect::LaunchSpawner { auth, slots, scheduler_location, setup_args } => {
                self.launch_spawner(auth, slots, scheduler_location, setup_args).await;
            }
            ControllerEffect::SendToSpawner(cmd) => {
                self.send_to_spawner(cmd).await;
            }
            ControllerEffect::TerminateSpawner => {
                self.terminate_spawner().await;
            }
            ControllerEffect::RemoveClientPayload => {
                let _ = tokio::fs::remove_file(self.client_payload_path()).await;
            }
            ControllerEffect::BroadcastDiscovery => {
                tracing::debug!("discovery broadcast requested (multicast transport not wired up)");
            }
            ControllerEffect::ShutdownNode => {
                shutdown.cancel();
            }
        }
    }

    fn client_payload_path(&self) -> PathBuf {
        self.config.state_dir.join("dispycos_client")
    }

    async fn launch_spawner(
        self: &Arc<Self>,
        auth: AuthToken,
        slots: Vec<SlotId>,
        scheduler_location: String,
        setup_args: Vec<String>,
    ) {
        let endpoints = self.controller.slot_endpoints(&slots);
        let node_addr = format!("127.0.0.1:{}", self.config.node.node_ports.first().copied().unwrap_or(0));
        let slot_spec = endpoints
            .iter()
            .map(|(id, port, name)| format!("{}:{}:{}", id.0, port, name))
            .collect::<Vec<_>>()
            .join(",");

        let mut args = vec![
            node_addr,
            self.config.state_dir.display().to_string(),
            auth.to_string(),
            slot_spec,
            scheduler_location,
        ];
        args.extend(setup_args);

        let program = spawner_binary_path();
        match self.supervisor.spawn(&program.display().to_string(), &args, Some(&self.config.state_dir)).await {
            Ok(mut child) => {
                let pid = child.pid;
                let (Some(stdin), Some(stdout)) = (child.child.stdin.take(), child.child.stdout.take()) else {
                    tracing::error!("spawner child missing piped stdio, aborting launch");
                    return;
                };
                *self.spawner.lock().await = Some(SpawnerLink { stdin, pid });
                if let Err(e) = lifecycle::write_node_pid_file(&self.config, Some(pid)) {
                    tracing::warn!(error = %e, "failed to update pid file with spawner pid");
                }

                let runtime = Arc::clone(self);
                tokio::spawn(async move {
                    runtime.watch_spawner(child.child, stdout).await;
                });
                tracing::info!(pid, "spawner launched");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn fabric-spawner");
            }
        }
    }

    /// Reads [`SpawnerEvent`]s off the spawner's stdout until it closes,
    /// then reaps the child and clears the link.
    async fn watch_spawner(self: Arc<Self>, mut child: tokio::process::Child, stdout: tokio::process::ChildStdout) {
        let mut reader = BufReader::new(stdout);
        loop {
            match framing::read_message::<_, SpawnerEvent>(&mut reader, Duration::from_secs(3600)).await {
                Ok(SpawnerEvent::Started { slots }) => {
                    tracing::info!(?slots, "spawner reported workers started");
                }
                Ok(SpawnerEvent::RestartAck) => {
                    tracing::debug!("spawner acked restart-policy update");
                }
                Ok(SpawnerEvent::Closed) => {
                    tracing::info!("spawner closed");
                    break;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "spawner event stream ended");
                    break;
                }
            }
        }
        let _ = child.wait().await;
        *self.spawner.lock().await = None;
    }

    async fn send_to_spawner(&self, cmd: SpawnerCommand) {
        let mut guard = self.spawner.lock().await;
        let Some(link) = guard.as_mut() else {
            tracing::debug!(?cmd, "no spawner running, dropping command");
            return;
        };
        match framing::encode(&cmd) {
            Ok(bytes) => {
                if let Err(e) = link.stdin.write_all(&bytes).await {
                    tracing::warn!(error = %e, "failed to write command to spawner stdin");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode spawner command"),
        }
    }

    async fn terminate_spawner(&self) {
        let link = self.spawner.lock().await.take();
        let Some(link) = link else { return };
        let _ = self
            .supervisor
            .escalate_shutdown(link.pid, std::process::id(), "fabric-spawner", Duration::from_millis(500))
            .await;
    }
}

fn spawner_binary_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("fabric-spawner")))
        .unwrap_or_else(|| PathBuf::from("fabric-spawner"))
}
