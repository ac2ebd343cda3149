// SPDX-License-Identifier: MIT

//! Node → scheduler replies (spec §4.1).

use fabric_core::{AuthToken, SlotId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub addr: String,
    pub cpus: u32,
    pub platform: String,
    pub avail_info: AvailInfo,
}

/// Availability telemetry sampled for `dispycos_node_info` and pulses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AvailInfo {
    pub cpu_percent: f32,
    pub memory_free_bytes: u64,
    pub disk_free_bytes: u64,
    pub swap_percent: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "resp")]
pub enum NodeResponse {
    NodeInfo(NodeInfo),

    /// `auth: None` means the reservation was refused (busy, out of
    /// service window, or `cpus` out of range).
    Reserved { cpus: u32, auth: Option<AuthToken> },

    /// Effective cpu count after worker bring-up (may be less than
    /// reserved if some workers failed to start, spec §7).
    ClientAck { cpus: u32 },

    Status { auth: AuthToken, servers: Vec<SlotId> },

    Ok,
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_refusal_has_no_auth() {
        let resp = NodeResponse::Reserved { cpus: 0, auth: None };
        let json = serde_json::to_string(&resp).expect("serialize");
        let back: NodeResponse = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(resp, back);
    }
}
