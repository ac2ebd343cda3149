// SPDX-License-Identifier: MIT

//! The cleanup engine (spec §4.5): reclaims per-worker scratch
//! directories, removes stale PID files, and — on node bootstrap with
//! `clean` set — kills a prior instance found via its PID file before
//! binding.

use fabric_adapters::{ProcessSupervisor, SupervisorError};
use nix::sys::signal::Signal;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("another node instance is already running (pid file present, clean not requested)")]
    InstanceAlreadyRunning,
    #[error("failed to clear stale pid file after killing prior instance")]
    StalePidFilePersists,
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// `{pid, ppid, spawner_pid}` persisted at `<dest>/server-0.pid` (spec §6).
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct NodePidInfo {
    pub pid: u32,
    pub ppid: u32,
    pub spawner_pid: Option<u32>,
}

/// Per-worker scratch directory, removed on worker close (spec §4.5).
pub fn worker_scratch_dir(dest_path: &Path, slot: u32) -> PathBuf {
    dest_path.join(format!("dispycos_server_{slot}"))
}

pub async fn remove_worker_scratch(dest_path: &Path, slot: u32) -> std::io::Result<()> {
    let dir = worker_scratch_dir(dest_path, slot);
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to remove worker scratch, tolerating");
            Ok(())
        }
    }
}

/// Bootstrap cleanup: if a previous node's PID file exists, escalate-kill
/// it and its spawner/workers, then remove the file. Refuses to start if
/// the PID file cannot be cleared (spec §4.5, §6 exit code −1).
pub async fn clean_prior_instance(pid_file: &Path, supervisor: &ProcessSupervisor) -> Result<(), CleanupError> {
    let Ok(bytes) = tokio::fs::read(pid_file).await else {
        return Ok(());
    };
    let Ok(info): Result<NodePidInfo, _> = serde_json::from_slice(&bytes) else {
        let _ = tokio::fs::remove_file(pid_file).await;
        return Ok(());
    };

    if let Some(spawner_pid) = info.spawner_pid {
        let _ = supervisor
            .escalate_shutdown(spawner_pid, info.pid, "fabric-spawner", Duration::from_millis(200))
            .await;
    }
    supervisor.escalate_shutdown(info.pid, info.ppid, "fabricd", Duration::from_millis(200)).await?;

    for _ in 0..20 {
        if !pid_file.exists() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    // Escalation above already tried SIGKILL; if the file is still there,
    // the prior process likely never removed it on exit. Remove it
    // ourselves since we've verified it is no longer alive.
    if !process_alive(info.pid) {
        let _ = tokio::fs::remove_file(pid_file).await;
        return Ok(());
    }
    Err(CleanupError::StalePidFilePersists)
}

fn process_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None::<Signal>).is_ok()
}

/// Refuse to start when a PID file exists and `clean` was not requested.
pub fn refuse_if_running(pid_file: &Path) -> Result<(), CleanupError> {
    if pid_file.exists() {
        return Err(CleanupError::InstanceAlreadyRunning);
    }
    Ok(())
}
