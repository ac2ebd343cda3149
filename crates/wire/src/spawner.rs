// SPDX-License-Identifier: MIT

//! Node ↔ spawner duplex pipe protocol (spec §4.3), and the
//! worker → spawner multi-producer single-consumer queue protocol.

use fabric_core::{InstanceId, SlotId};
use serde::{Deserialize, Serialize};

/// Sent from the node down the pipe to the spawner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum SpawnerCommand {
    /// Close (and optionally restart) one worker. `slot == 0` instead
    /// updates the spawner-wide `restart_servers` policy and is ack'd
    /// with `SpawnerEvent::RestartAck`.
    CloseServer { slot: SlotId, terminate: bool, restart: bool },
    /// Clear all restart flags and broadcast quit to every worker.
    Quit,
}

/// Sent from the spawner up the pipe to the node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "evt")]
pub enum SpawnerEvent {
    /// Subset of requested slots that registered within the bring-up
    /// deadline (spec §4.3 step 4, ~12s).
    Started { slots: Vec<SlotId> },
    /// Ack for `CloseServer { slot: 0, .. }`.
    RestartAck,
    /// The spawner is exiting; node should reap it.
    Closed,
}

/// Sent from a worker onto the spawner's MPSC queue (spec §4.3 step 6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerQueueMsg {
    pub slot: SlotId,
    pub iid: InstanceId,
    pub pid: u32,
    /// `None` once the worker has exited; `Some(true)` while registering.
    pub alive: Option<bool>,
    /// Exit status the spawner uses to decide whether the exit was clean.
    pub exit_status: Option<i32>,
}
