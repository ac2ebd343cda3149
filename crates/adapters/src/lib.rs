// SPDX-License-Identifier: MIT

//! fabric-adapters: process supervision, privilege drop, and the
//! peer-messaging transport abstraction the engine builds on.
#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

pub mod fabric;
pub mod loopback_fabric;
pub mod privilege;
pub mod supervisor;
pub mod tcp_fabric;
pub mod telemetry;

pub use fabric::{send_json, FabricError, Location, MessagingFabric, PeerStatus, PeerStatusEvent};
pub use loopback_fabric::LoopbackFabric;
pub use privilege::{drop_to_user, PrivilegeError};
pub use supervisor::{ProcessSupervisor, SupervisedChild, SupervisorError};
pub use tcp_fabric::TcpFabric;
pub use telemetry::{NullTelemetry, ProcTelemetry, Telemetry};
