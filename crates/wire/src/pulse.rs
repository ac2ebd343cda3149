// SPDX-License-Identifier: MIT

//! Heartbeat telemetry sent node → scheduler (spec §4.2).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pulse {
    pub cpu_percent: f32,
    pub memory_free_bytes: u64,
    pub disk_free_bytes: u64,
    pub swap_percent: f32,
}
