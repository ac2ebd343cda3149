// SPDX-License-Identifier: MIT

//! Privilege drop for the spawner process (spec §2 supplement): when the
//! node daemon is started with an elevated effective UID — e.g. to bind
//! a privileged port — the spawner it launches drops to an unprivileged
//! user before executing any worker.
//!
//! Grounded on the original node daemon's pre-fork `setuid`/`setgid`
//! calls; re-expressed through `nix::unistd` with group dropped before
//! user, per the usual privilege-drop ordering (dropping the user first
//! would forfeit the rights needed to change the group).

use nix::unistd::{self, Gid, Uid, User};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    #[error("user lookup failed: {0}")]
    Lookup(#[source] nix::Error),
    #[error("setgid failed: {0}")]
    SetGid(#[source] nix::Error),
    #[error("setuid failed: {0}")]
    SetUid(#[source] nix::Error),
}

/// Drop the process's effective privileges to `username`, if the
/// process is currently running as root. A no-op when already
/// unprivileged, so callers can invoke this unconditionally.
pub fn drop_to_user(username: &str) -> Result<(), PrivilegeError> {
    if !unistd::Uid::effective().is_root() {
        return Ok(());
    }
    let user = User::from_name(username)
        .map_err(PrivilegeError::Lookup)?
        .ok_or_else(|| PrivilegeError::UnknownUser(username.to_string()))?;

    unistd::setgid(Gid::from_raw(user.gid.as_raw())).map_err(PrivilegeError::SetGid)?;
    unistd::setuid(Uid::from_raw(user.uid.as_raw())).map_err(PrivilegeError::SetUid)?;
    Ok(())
}
