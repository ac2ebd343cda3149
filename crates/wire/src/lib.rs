// SPDX-License-Identifier: MIT

//! fabric-wire: message types and framing for the compute-fabric daemon.
//!
//! Every channel the node speaks over — the scheduler-facing fabric
//! connection, the node↔spawner duplex pipe, the worker→spawner queue,
//! and the scheduler/node↔worker channel — exchanges one of the typed
//! enums defined here, length-prefixed per [`framing`].
#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

pub mod framing;
pub mod pulse;
pub mod request;
pub mod response;
pub mod spawner;
pub mod worker;

pub use framing::{decode, encode, read_message, write_message, ProtocolError, MAX_MESSAGE_BYTES};
pub use pulse::Pulse;
pub use request::NodeRequest;
pub use response::{AvailInfo, NodeInfo, NodeResponse};
pub use spawner::{SpawnerCommand, SpawnerEvent, WorkerQueueMsg};
pub use worker::{
    Job, PluginHandle, ServerStatus, ServerStatusEvent, TaskOutcome, TaskResult, WorkerRequest,
    WorkerResponse,
};
