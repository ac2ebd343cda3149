// SPDX-License-Identifier: MIT

//! The spawner: the node's sole direct child, responsible for bringing
//! up the reserved workers and supervising them for the reservation's
//! lifetime (spec §4.3). Talks to the node over its own stdin/stdout
//! (a duplex pipe, not the messaging fabric) and to its workers over
//! their piped stdout (the worker→spawner queue, spec §4.3 step 6).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use fabric_adapters::ProcessSupervisor;
use fabric_core::{InstanceId, SlotId};
use fabric_wire::{framing, SpawnerCommand, SpawnerEvent, WorkerQueueMsg};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;

const BRING_UP_WINDOW: Duration = Duration::from_secs(12);

struct WorkerSlot {
    id: SlotId,
    port: u16,
    name: String,
    iid: InstanceId,
    child: Option<Child>,
    restart: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fabric_daemon::init_tracing();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    if argv.len() < 5 {
        anyhow::bail!(
            "usage: fabric-spawner <node_addr> <state_dir> <auth> <slot_spec> <scheduler_location> [setup_args...]"
        );
    }
    let node_addr = argv[0].clone();
    let state_dir = PathBuf::from(&argv[1]);
    let auth = argv[2].clone();
    let slot_spec = argv[3].clone();
    let scheduler_location = argv[4].clone();
    let setup_args = argv[5..].to_vec();

    if let Some(user) = fabric_daemon::env::spawn_user() {
        fabric_adapters::drop_to_user(&user)?;
        tracing::info!(user, "dropped spawner privileges before launching workers");
    }

    let supervisor = ProcessSupervisor::new();

    if !setup_args.is_empty() {
        run_setup_hook(&setup_args, &state_dir).await;
    }

    let mut slots: Vec<WorkerSlot> = slot_spec
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|entry| {
            let mut parts = entry.splitn(3, ':');
            let id: u32 = parts.next()?.parse().ok()?;
            let port: u16 = parts.next()?.parse().ok()?;
            let name = parts.next()?.to_string();
            Some(WorkerSlot { id: SlotId(id), port, name, iid: InstanceId::INITIAL, child: None, restart: false })
        })
        .collect();

    let (queue_tx, mut queue_rx) = mpsc::channel::<WorkerQueueMsg>(256);
    for slot in &mut slots {
        spawn_worker(&supervisor, &node_addr, &auth, &scheduler_location, &state_dir, slot, queue_tx.clone()).await;
    }

    let mut stdout = tokio::io::stdout();
    let started: Vec<SlotId> = tokio::select! {
        started = collect_bring_up(&mut queue_rx, slots.iter().map(|s| s.id).collect()) => started,
        _ = tokio::time::sleep(BRING_UP_WINDOW) => {
            tracing::warn!("bring-up window elapsed before every worker registered");
            Vec::new()
        }
    };
    let _ = framing::write_message(&mut stdout, &SpawnerEvent::Started { slots: started }, Duration::from_secs(5)).await;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut restart_servers = false;

    loop {
        tokio::select! {
            cmd = framing::read_message::<_, SpawnerCommand>(&mut stdin, Duration::from_secs(3600)) => {
                match cmd {
                    Ok(SpawnerCommand::CloseServer { slot, terminate, restart }) if slot.0 == 0 => {
                        restart_servers = restart;
                        let _ = framing::write_message(&mut stdout, &SpawnerEvent::RestartAck, Duration::from_secs(5)).await;
                        let _ = terminate;
                    }
                    Ok(SpawnerCommand::CloseServer { slot, terminate, restart }) => {
                        if let Some(s) = slots.iter_mut().find(|s| s.id == slot) {
                            s.restart = restart;
                            if let Some(child) = s.child.as_ref().and_then(|c| c.id()) {
                                let grace = if terminate { Duration::from_millis(100) } else { Duration::from_secs(2) };
                                let _ = supervisor.escalate_shutdown(child, std::process::id(), "fabric-worker", grace).await;
                            }
                        }
                    }
                    Ok(SpawnerCommand::Quit) => {
                        shut_down_all(&supervisor, &mut slots).await;
                        let _ = framing::write_message(&mut stdout, &SpawnerEvent::Closed, Duration::from_secs(5)).await;
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::info!(error = %e, "node pipe closed, shutting down");
                        shut_down_all(&supervisor, &mut slots).await;
                        return Ok(());
                    }
                }
            }
            Some(msg) = queue_rx.recv() => {
                handle_worker_exit(&supervisor, &node_addr, &auth, &scheduler_location, &state_dir, &mut slots, msg, restart_servers, queue_tx.clone()).await;
            }
        }
    }
}

async fn run_setup_hook(setup_args: &[String], cwd: &std::path::Path) {
    let Some((program, args)) = setup_args.split_first() else { return };
    match tokio::process::Command::new(program).args(args).current_dir(cwd).status().await {
        Ok(status) if status.success() => tracing::info!(program, "node-setup hook completed"),
        Ok(status) => tracing::warn!(program, ?status, "node-setup hook exited non-zero"),
        Err(e) => tracing::warn!(program, error = %e, "failed to run node-setup hook"),
    }
}

async fn spawn_worker(
    supervisor: &ProcessSupervisor,
    node_addr: &str,
    auth: &str,
    scheduler_location: &str,
    state_dir: &std::path::Path,
    slot: &mut WorkerSlot,
    queue_tx: mpsc::Sender<WorkerQueueMsg>,
) {
    let program = worker_binary_path();
    let args = vec![
        node_addr.to_string(),
        auth.to_string(),
        slot.id.0.to_string(),
        slot.port.to_string(),
        slot.name.clone(),
        slot.iid.0.to_string(),
        scheduler_location.to_string(),
    ];
    match supervisor.spawn(&program.display().to_string(), &args, Some(state_dir)).await {
        Ok(mut supervised) => {
            let Some(stdout) = supervised.child.stdout.take() else {
                tracing::error!(slot = slot.id.0, "worker missing piped stdout");
                return;
            };
            let pid = supervised.pid;
            let id = slot.id;
            let iid = slot.iid;
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout);
                loop {
                    match framing::read_message::<_, WorkerQueueMsg>(&mut reader, Duration::from_secs(3600)).await {
                        Ok(msg) => {
                            if queue_tx.send(msg).await.is_err() {
                                return;
                            }
                        }
                        Err(_) => {
                            let _ = queue_tx
                                .send(WorkerQueueMsg { slot: id, iid, pid, alive: None, exit_status: None })
                                .await;
                            return;
                        }
                    }
                }
            });
            slot.child = Some(supervised.child);
        }
        Err(e) => tracing::error!(slot = slot.id.0, error = %e, "failed to spawn fabric-worker"),
    }
}

async fn collect_bring_up(queue_rx: &mut mpsc::Receiver<WorkerQueueMsg>, mut pending: Vec<SlotId>) -> Vec<SlotId> {
    let mut started = Vec::new();
    while !pending.is_empty() {
        let Some(msg) = queue_rx.recv().await else { break };
        if msg.alive == Some(true) {
            pending.retain(|s| *s != msg.slot);
            started.push(msg.slot);
        }
    }
    started
}

async fn handle_worker_exit(
    supervisor: &ProcessSupervisor,
    node_addr: &str,
    auth: &str,
    scheduler_location: &str,
    state_dir: &std::path::Path,
    slots: &mut [WorkerSlot],
    msg: WorkerQueueMsg,
    restart_servers: bool,
    queue_tx: mpsc::Sender<WorkerQueueMsg>,
) {
    if msg.alive.is_some() {
        return;
    }
    let Some(slot) = slots.iter_mut().find(|s| s.id == msg.slot) else { return };
    slot.child = None;
    let should_restart = slot.restart || restart_servers;
    slot.restart = false;
    if !should_restart {
        tracing::info!(slot = slot.id.0, "worker exited, no restart requested");
        return;
    }
    slot.iid = slot.iid.next();
    tracing::info!(slot = slot.id.0, iid = slot.iid.0, "respawning worker");
    spawn_worker(supervisor, node_addr, auth, scheduler_location, state_dir, slot, queue_tx).await;
}

async fn shut_down_all(supervisor: &ProcessSupervisor, slots: &mut [WorkerSlot]) {
    for slot in slots.iter_mut() {
        if let Some(pid) = slot.child.as_ref().and_then(|c| c.id()) {
            let _ = supervisor.escalate_shutdown(pid, std::process::id(), "fabric-worker", Duration::from_millis(200)).await;
        }
        slot.child = None;
    }
}

fn worker_binary_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("fabric-worker")))
        .unwrap_or_else(|| PathBuf::from("fabric-worker"))
}
