// SPDX-License-Identifier: MIT

//! Daemon lifecycle: lock acquisition, stale-instance cleanup, and
//! shutdown teardown (spec §4.5, §6 "Persisted state"). Grounded on the
//! teacher's `lifecycle::startup`/`DaemonState::shutdown` ordering: lock
//! first (it is what prevents races), then directories, then bind.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use fs2::FileExt;
use thiserror::Error;
use tracing::{info, warn};

use fabric_adapters::ProcessSupervisor;
use fabric_core::AuthToken;
use fabric_engine::{clean_prior_instance, refuse_if_running, CleanupError, NodePidInfo};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine a state directory (set FABRIC_STATE_DIR or HOME)")]
    NoStateDir,
    #[error("failed to acquire lock, is fabricd already running? {0}")]
    LockFailed(#[source] std::io::Error),
    #[error("failed to bind admin socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Cleanup(#[from] CleanupError),
}

/// Acquire the exclusive lock, refusing (or clearing, with `clean`) a
/// prior instance first. Returns the open lock file — keep it alive for
/// the process lifetime; the OS releases the lock on drop/exit.
pub async fn startup(config: &Config, supervisor: &ProcessSupervisor) -> Result<File, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    if config.clean {
        clean_prior_instance(&config.pid_path, supervisor).await?;
    } else {
        refuse_if_running(&config.pid_path)?;
    }

    let lock_file =
        OpenOptions::new().write(true).create(true).truncate(false).open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;

    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }

    info!(state_dir = %config.state_dir.display(), "node lifecycle startup complete");
    Ok(lock_file)
}

/// Persist `<dest>/server-0.pid` (spec §6, §5 "Node pid_file"). Called
/// once at startup and again whenever the spawner's pid becomes known
/// or is reaped.
pub fn write_node_pid_file(config: &Config, spawner_pid: Option<u32>) -> std::io::Result<()> {
    let info = NodePidInfo {
        pid: std::process::id(),
        ppid: nix::unistd::getppid().as_raw() as u32,
        spawner_pid,
    };
    let bytes = serde_json::to_vec(&info)?;
    std::fs::write(&config.pid_path, bytes)
}

fn node_auth_path(config: &Config) -> PathBuf {
    config.state_dir.join("node_auth")
}

/// Persist the node-wide admin token so the local CLI (which shares this
/// host's filesystem, not the network) can authenticate admin requests
/// without the token ever crossing a wire. Readable only by the owner.
pub fn write_node_auth(config: &Config, auth: AuthToken) -> std::io::Result<()> {
    let path = node_auth_path(config);
    std::fs::write(&path, auth.to_string())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

pub fn read_node_auth(config: &Config) -> std::io::Result<AuthToken> {
    let raw = std::fs::read_to_string(node_auth_path(config))?;
    AuthToken::from_hex(raw.trim())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed node_auth file"))
}

/// Remove every file this process created, in the reverse order they
/// were created.
pub fn shutdown(config: &Config) {
    info!("node shutting down");
    for path in [&config.socket_path, &config.pid_path, &config.lock_path, &node_auth_path(config)] {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove file on shutdown");
            }
        }
    }
}
