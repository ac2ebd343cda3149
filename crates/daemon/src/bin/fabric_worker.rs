// SPDX-License-Identifier: MIT

//! A single reserved slot's worker process (spec §4.4). Registers on the
//! messaging fabric, hands its PID to the node over the same fabric,
//! then serves [`WorkerRequest`]s delivered to its inbox until told to
//! close.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fabric_adapters::{send_json, Location, TcpFabric};
use fabric_core::{AuthToken, InstanceId, SlotId};
use fabric_wire::{
    framing, Job, NodeRequest, NodeResponse, ServerStatus, ServerStatusEvent, TaskOutcome, TaskResult,
    WorkerQueueMsg, WorkerRequest, WorkerResponse,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// How long `Close` waits for live tasks to finish before closing anyway
/// (spec §4.4 step 6).
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fabric_daemon::init_tracing();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    if argv.len() < 7 {
        anyhow::bail!("usage: fabric-worker <node_addr> <auth> <slot> <port> <name> <iid> <scheduler_location>");
    }
    let node_addr = argv[0].clone();
    let auth = AuthToken::from_hex(&argv[1]).ok_or_else(|| anyhow::anyhow!("malformed auth token"))?;
    let slot = SlotId(argv[2].parse()?);
    let port: u16 = argv[3].parse()?;
    let name = argv[4].clone();
    let iid = InstanceId(argv[5].parse()?);
    let scheduler_location = argv[6].clone();
    let pid = std::process::id();

    let fabric = TcpFabric::new();
    let (_location, mut inbox) = fabric.register_with_inbox_at(&name, port).await?;
    tracing::info!(slot = slot.0, port, "worker registered on fabric");

    let timeout = Duration::from_secs(5);
    notify_scheduler(&fabric, &scheduler_location, slot, iid, ServerStatus::Discovered, timeout).await;

    let node_location = Location(node_addr.clone());
    let register_resp: Option<NodeResponse> = send_request(&node_location, &NodeRequest::ServerTask {
        auth: Some(auth),
        slot,
        iid,
        pid,
        alive: true,
    }, timeout).await;
    match register_resp {
        Some(NodeResponse::Ok) => tracing::info!(slot = slot.0, "node acknowledged registration"),
        other => tracing::warn!(slot = slot.0, ?other, "node did not cleanly acknowledge registration"),
    }

    let mut stdout = tokio::io::stdout();
    report_queue(&mut stdout, slot, iid, pid, Some(true), None).await;
    notify_scheduler(&fabric, &scheduler_location, slot, iid, ServerStatus::Initialized, timeout).await;

    let (results_tx, mut results_rx) = mpsc::channel::<TaskResult>(64);
    let mut job_count = 0usize;
    let live_tasks = Arc::new(AtomicUsize::new(0));

    let (exit_status, close_status) = loop {
        tokio::select! {
            Some(bytes) = inbox.recv() => {
                let Ok(req) = framing::decode::<WorkerRequest>(&bytes) else {
                    tracing::warn!("dropping undecodable worker request");
                    continue;
                };
                match handle_request(req, &fabric, &results_tx, &mut job_count, &live_tasks).await {
                    Action::Continue => {}
                    Action::Drain => break drain_then_exit(&mut inbox, &mut results_rx, &fabric, &live_tasks, timeout).await,
                    Action::Exit(exit) => break exit,
                }
            }
            Some(result) = results_rx.recv() => {
                let to = Location(result.task_location.clone());
                if let Err(e) = send_json(&fabric, &to, &result, timeout).await {
                    tracing::warn!(error = %e, "failed to deliver task result");
                }
            }
        }
    };

    notify_scheduler(&fabric, &scheduler_location, slot, iid, close_status, timeout).await;
    report_queue(&mut stdout, slot, iid, pid, None, Some(exit_status)).await;
    notify_scheduler(&fabric, &scheduler_location, slot, iid, ServerStatus::Disconnected, timeout).await;
    Ok(())
}

/// What the main loop should do after handling one request.
enum Action {
    Continue,
    /// `Close`: wait for live tasks before exiting (spec §4.4 step 6).
    Drain,
    /// `Terminate`: exit immediately with `(exit_status, status_on_close)`.
    Exit((i32, ServerStatus)),
}

async fn handle_request(
    req: WorkerRequest,
    fabric: &TcpFabric,
    results_tx: &mpsc::Sender<TaskResult>,
    job_count: &mut usize,
    live_tasks: &Arc<AtomicUsize>,
) -> Action {
    match req {
        WorkerRequest::Run { reply_location, job, .. } => {
            *job_count += 1;
            live_tasks.fetch_add(1, Ordering::AcqRel);
            let results_tx = results_tx.clone();
            let live_tasks = Arc::clone(live_tasks);
            tokio::spawn(async move {
                let value = run_job(job).await;
                let _ = results_tx.send(TaskResult { task_location: reply_location, value }).await;
                live_tasks.fetch_sub(1, Ordering::AcqRel);
            });
            Action::Continue
        }
        WorkerRequest::Close { restart: _, .. } => Action::Drain,
        WorkerRequest::Terminate { restart: _, .. } => Action::Exit((1, ServerStatus::Abandoned)),
        WorkerRequest::Status { .. } => {
            tracing::debug!(jobs = *job_count, "status requested");
            Action::Continue
        }
        WorkerRequest::Peers { peers, .. } => {
            tracing::debug!(?peers, "peer list updated");
            Action::Continue
        }
        WorkerRequest::NumJobs { reply_location, .. } => {
            let to = Location(reply_location);
            let _ = send_json(fabric, &to, &WorkerResponse::NumJobs { count: *job_count }, Duration::from_secs(5)).await;
            Action::Continue
        }
        WorkerRequest::EnableServer { setup_args, .. } => {
            if let Some((program, args)) = setup_args.split_first() {
                match tokio::process::Command::new(program).args(args).status().await {
                    Ok(status) if status.success() => tracing::info!(program, "setup hook completed"),
                    Ok(status) => tracing::warn!(program, ?status, "setup hook exited non-zero"),
                    Err(e) => tracing::warn!(program, error = %e, "failed to run setup hook"),
                }
            }
            Action::Continue
        }
    }
}

/// Waits up to [`DRAIN_TIMEOUT`] for `live_tasks` to reach zero, still
/// delivering task results as they land, and bails out early with
/// `Abandoned` if a `Terminate` arrives on the inbox during the wait.
async fn drain_then_exit(
    inbox: &mut mpsc::Receiver<Vec<u8>>,
    results_rx: &mut mpsc::Receiver<TaskResult>,
    fabric: &TcpFabric,
    live_tasks: &Arc<AtomicUsize>,
    timeout: Duration,
) -> (i32, ServerStatus) {
    if live_tasks.load(Ordering::Acquire) == 0 {
        return (0, ServerStatus::Closed);
    }
    tracing::info!(live = live_tasks.load(Ordering::Acquire), "draining live tasks before close");
    let deadline = tokio::time::sleep(DRAIN_TIMEOUT);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::warn!(live = live_tasks.load(Ordering::Acquire), "drain timed out, closing anyway");
                return (0, ServerStatus::Closed);
            }
            Some(result) = results_rx.recv() => {
                let to = Location(result.task_location.clone());
                if let Err(e) = send_json(fabric, &to, &result, timeout).await {
                    tracing::warn!(error = %e, "failed to deliver task result while draining");
                }
                if live_tasks.load(Ordering::Acquire) == 0 {
                    return (0, ServerStatus::Closed);
                }
            }
            Some(bytes) = inbox.recv() => {
                if let Ok(WorkerRequest::Terminate { .. }) = framing::decode::<WorkerRequest>(&bytes) {
                    tracing::info!("terminate received while draining, abandoning live tasks");
                    return (1, ServerStatus::Abandoned);
                }
            }
        }
    }
}

/// Post a `ServerStatusEvent` directly to the scheduler (spec §5: the
/// worker↔scheduler channel is a direct peer connection, not brokered
/// through the node). Best-effort: a failed delivery is logged, not
/// retried, since the scheduler also derives liveness from pulses.
async fn notify_scheduler(
    fabric: &TcpFabric,
    scheduler_location: &str,
    slot: SlotId,
    iid: InstanceId,
    status: ServerStatus,
    timeout: Duration,
) {
    if scheduler_location.is_empty() {
        return;
    }
    let to = Location(scheduler_location.to_string());
    let event = ServerStatusEvent { slot, iid, status };
    if let Err(e) = send_json(fabric, &to, &event, timeout).await {
        tracing::debug!(?status, error = %e, "failed to notify scheduler of status change");
    }
}

/// Executes the fixed task vocabulary negotiated at client admit time
/// (spec §9 redesign flag). `echo` and `sleep` stand in for the handful
/// of built-in jobs a deployment would actually register.
async fn run_job(job: Job) -> TaskOutcome {
    match job.code.0.as_str() {
        "echo" => TaskOutcome::Value { json: job.args },
        "sleep" => {
            let secs = job.args.as_f64().unwrap_or(0.0).max(0.0);
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
            TaskOutcome::Value { json: serde_json::json!({"slept_secs": secs}) }
        }
        other => TaskOutcome::Error { message: format!("unknown task handle {other:?}") },
    }
}

async fn send_request(to: &Location, req: &NodeRequest, timeout: Duration) -> Option<NodeResponse> {
    use tokio::net::TcpStream;
    let addr: std::net::SocketAddr = to.0.parse().ok()?;
    let mut stream = tokio::time::timeout(timeout, TcpStream::connect(addr)).await.ok()?.ok()?;
    framing::write_message(&mut stream, req, timeout).await.ok()?;
    framing::read_message(&mut stream, timeout).await.ok()
}

async fn report_queue(
    stdout: &mut tokio::io::Stdout,
    slot: SlotId,
    iid: InstanceId,
    pid: u32,
    alive: Option<bool>,
    exit_status: Option<i32>,
) {
    let msg = WorkerQueueMsg { slot, iid, pid, alive, exit_status };
    if let Ok(bytes) = framing::encode(&msg) {
        let _ = stdout.write_all(&bytes).await;
    }
}
