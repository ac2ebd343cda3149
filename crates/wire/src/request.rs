// SPDX-License-Identifier: MIT

//! Scheduler → node message contract (spec §4.1).

use fabric_core::{AuthToken, SlotId};
use serde::{Deserialize, Serialize};

/// Request from a scheduler (or local admin) to the node controller.
///
/// `auth` is validated on every variant except `DispycosNodeInfo` and the
/// bootstrap case of `ServerTask` (a worker's first registration arrives
/// before it has learned the reservation's token): a node-wide auth
/// field alongside each variant rather than a generic envelope keeps
/// each request self-describing instead of needing a shared wrapper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "req")]
pub enum NodeRequest {
    /// Unauthenticated system-info probe.
    DispycosNodeInfo,

    /// Ask to reserve `cpus` slots for a pulse interval.
    Reserve {
        cpus: u32,
        pulse_interval_secs: u64,
        status_location: String,
        client_location: String,
        #[serde(default)]
        abandon_zombie: bool,
    },

    /// Persist the client payload and launch the spawner.
    Client { auth: AuthToken, client_payload: Vec<u8>, setup_args: Vec<String> },

    /// Tear the reservation down, optionally relaunching immediately.
    Release {
        auth: AuthToken,
        #[serde(default)]
        terminate: bool,
        #[serde(default)]
        restart: bool,
        #[serde(default)]
        setup_args: Vec<String>,
    },

    /// Local admin: close the active client gracefully.
    Close { auth: AuthToken },
    /// Local admin: close the active client and shut the node down.
    Quit { auth: AuthToken },
    /// Local admin: force-terminate everything and shut the node down.
    Terminate { auth: AuthToken },

    /// Close (and optionally restart) a single worker.
    CloseServer {
        auth: AuthToken,
        slot: SlotId,
        #[serde(default)]
        terminate: bool,
        #[serde(default)]
        restart: bool,
    },

    /// Update the abandon-zombie policy for the active reservation.
    AbandonZombie { auth: AuthToken, flag: bool },

    /// Worker → node registration/unregistration (spec §4.3 step 4,
    /// §4.4 step 2). `auth` is `None` only during the bootstrap
    /// handshake before the worker has learned the reservation's token.
    ServerTask {
        auth: Option<AuthToken>,
        slot: SlotId,
        iid: fabric_core::InstanceId,
        pid: u32,
        /// `false` signals the worker's final message (it is exiting).
        alive: bool,
    },

    /// List live worker endpoints.
    Status { auth: AuthToken },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_round_trips_through_json() {
        let req = NodeRequest::Reserve {
            cpus: 2,
            pulse_interval_secs: 10,
            status_location: "sched:9000".into(),
            client_location: "client:9001".into(),
            abandon_zombie: false,
        };
        let json = serde_json::to_string(&req).expect("serialize");
        let back: NodeRequest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(req, back);
    }

    #[test]
    fn server_task_bootstrap_has_no_auth() {
        let req = NodeRequest::ServerTask {
            auth: None,
            slot: SlotId(1),
            iid: fabric_core::InstanceId(0),
            pid: 4242,
            alive: true,
        };
        let json = serde_json::to_string(&req).expect("serialize");
        assert!(json.contains("\"auth\":null"));
    }
}
