// SPDX-License-Identifier: MIT

//! Scheduler/node ↔ worker message contract (spec §4.4).

use fabric_core::AuthToken;
use serde::{Deserialize, Serialize};

/// A unit of work dispatched to a worker. `code` is a plugin handle
/// rather than a source blob — the statically-typed replacement for the
/// original's dynamic `exec()` of a code string (spec §9 redesign flag
/// "Dynamic code execution").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub code: PluginHandle,
    pub name: String,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
}

/// Identifies a task vocabulary entry negotiated at client admit time
/// (spec §9: "a fixed task vocabulary negotiated at client admit time").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PluginHandle(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "req")]
pub enum WorkerRequest {
    Run { reply_location: String, job: Job, auth: AuthToken },
    Close { auth: AuthToken, #[serde(default)] restart: bool },
    Terminate { auth: AuthToken, #[serde(default)] restart: bool },
    Status { auth: AuthToken },
    Peers { auth: AuthToken, peers: Vec<String> },
    NumJobs { auth: AuthToken, reply_location: String },
    EnableServer { auth: AuthToken, setup_args: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "resp")]
pub enum WorkerResponse {
    /// The spawned task handle, or the run-request's own failure
    /// (bind/deserialize error) reported back synchronously.
    Running { task_location: String },
    RunFailed { error: String },
    NumJobs { count: usize },
    Ok,
}

/// Status events a worker emits to the scheduler over its peer channel.
/// Ordering is guaranteed per-slot by the FIFO peer channel (spec §5):
/// `Discovered < Initialized < (Closed | Abandoned) < Disconnected`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServerStatus {
    Discovered,
    Initialized,
    Closed,
    Abandoned,
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerStatusEvent {
    pub slot: fabric_core::SlotId,
    pub iid: fabric_core::InstanceId,
    pub status: ServerStatus,
}

/// Forwarded by the worker's completion monitor once a task finishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub task_location: String,
    /// The serialized result, or a fallback describing its type when it
    /// could not be serialized (spec §7, "Task execution").
    pub value: TaskOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum TaskOutcome {
    Value { json: serde_json::Value },
    Unserializable { type_name: String },
    Error { message: String },
}


impl PartialOrd for ServerStatus {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerStatus {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(s: &ServerStatus) -> u8 {
            match s {
                ServerStatus::Discovered => 0,
                ServerStatus::Initialized => 1,
                ServerStatus::Closed | ServerStatus::Abandoned => 2,
                ServerStatus::Disconnected => 3,
            }
        }
        rank(self).cmp(&rank(other))
    }
}
