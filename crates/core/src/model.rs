// SPDX-License-Identifier: MIT

//! The node's data model (spec §3): configuration, slots and reservation
//! state shared between `fabric-engine`, `fabric-adapters` and the
//! `fabric-daemon` binaries.

use crate::auth::AuthToken;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable identity of a reservable slot. `0` is reserved for the node
/// itself and is never handed out by `reserve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct SlotId(pub u32);

/// Monotonically increasing instance counter for a slot's worker,
/// bumped on every respawn so a late message from the previous worker
/// process is recognized as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct InstanceId(pub u64);

impl InstanceId {
    pub const INITIAL: InstanceId = InstanceId(0);

    pub fn next(self) -> InstanceId {
        InstanceId(self.0 + 1)
    }
}

/// Single-writer (worker), single-reader (node heartbeat) cell holding the
/// epoch-seconds timestamp of a slot's most recent task progress.
///
/// Modeled as a shared `AtomicU64` rather than a cross-process shared
/// integer: the node and its workers are separate OS processes here too,
/// so a deployment wanting the timestamp visible across a restart would
/// back this with a memory-mapped file; this type is the in-process view
/// both sides read/write through.
#[derive(Debug, Clone)]
pub struct BusyTimeCell(Arc<AtomicU64>);

impl BusyTimeCell {
    pub fn new(initial_epoch_secs: u64) -> Self {
        Self(Arc::new(AtomicU64::new(initial_epoch_secs)))
    }

    pub fn touch(&self, epoch_secs: u64) {
        self.0.store(epoch_secs, Ordering::Release);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Reset to zero on slot teardown.
    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

impl Default for BusyTimeCell {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Immutable node configuration (spec §3, §6).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub num_cpus: u32,
    /// Length `num_cpus + 1`; index 0 is the node's own control port.
    pub node_ports: Vec<u16>,
    pub udp_port: u16,
    pub name: String,
    pub dest_path: PathBuf,
    pub certfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
    pub msg_timeout_secs: u64,
    pub min_pulse_interval_secs: u64,
    pub max_pulse_interval_secs: u64,
    pub zombie_period_secs: u64,
    pub ping_interval_secs: u64,
    /// `-1` unlimited, `>=0` bounded (spec §4.1 "Service-count policy").
    pub serve_count: i64,
    pub service_start: Option<ServiceTime>,
    pub service_stop: Option<ServiceTime>,
    pub service_end: Option<ServiceTime>,
    pub ipv4_udp_multicast: bool,
    pub peers: Vec<String>,
    /// Cap, in bytes, on a file reference admitted as part of a dispatched
    /// job's payload. `None` disables the check (supplemented from
    /// `dispycosnode.py`'s `max_file_size`, see SPEC_FULL §2).
    pub max_file_size: Option<u64>,
}

/// Local wall-clock time-of-day, minute resolution (`HH:MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServiceTime {
    pub hour: u8,
    pub minute: u8,
}

impl ServiceTime {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let (h, m) = s.split_once(':').ok_or_else(|| ConfigError::InvalidServiceTime(s.to_string()))?;
        let hour: u8 = h.parse().map_err(|_| ConfigError::InvalidServiceTime(s.to_string()))?;
        let minute: u8 = m.parse().map_err(|_| ConfigError::InvalidServiceTime(s.to_string()))?;
        if hour > 23 || minute > 59 {
            return Err(ConfigError::InvalidServiceTime(s.to_string()));
        }
        Ok(Self { hour, minute })
    }

    /// Seconds since local midnight.
    pub fn seconds_of_day(&self) -> u32 {
        self.hour as u32 * 3600 + self.minute as u32 * 60
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid service time {0:?}, expected HH:MM")]
    InvalidServiceTime(String),
    #[error("msg_timeout must be at least 1 second")]
    MsgTimeoutTooSmall,
    #[error("min_pulse_interval must be at least msg_timeout")]
    MinPulseBelowMsgTimeout,
    #[error("max_pulse_interval must be at least min_pulse_interval")]
    MaxPulseBelowMin,
    #[error("zombie_period must be at least min_pulse_interval")]
    ZombiePeriodTooSmall,
    #[error("service_start must be before service_stop")]
    ServiceStartAfterStop,
    #[error("service_start must be before service_end")]
    ServiceStartAfterEnd,
    #[error("service_stop must be before service_end")]
    ServiceStopAfterEnd,
    #[error("at least one of service_stop or service_end must be set when service_start is set")]
    ServiceWindowIncomplete,
    #[error("node_ports must have exactly num_cpus + 1 entries, got {got} for {cpus} cpus")]
    WrongPortCount { got: usize, cpus: u32 },
}

impl NodeConfig {
    /// Validate the cross-field invariants spec.md §6 and
    /// `dispycosnode.py::_dispycos_node` enforce before the node starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.msg_timeout_secs < 1 {
            return Err(ConfigError::MsgTimeoutTooSmall);
        }
        if self.min_pulse_interval_secs < self.msg_timeout_secs {
            return Err(ConfigError::MinPulseBelowMsgTimeout);
        }
        if self.max_pulse_interval_secs < self.min_pulse_interval_secs {
            return Err(ConfigError::MaxPulseBelowMin);
        }
        if self.zombie_period_secs > 0 && self.zombie_period_secs < self.min_pulse_interval_secs {
            return Err(ConfigError::ZombiePeriodTooSmall);
        }
        if self.node_ports.len() != (self.num_cpus as usize + 1) {
            return Err(ConfigError::WrongPortCount { got: self.node_ports.len(), cpus: self.num_cpus });
        }
        if let Some(start) = self.service_start {
            if self.service_stop.is_none() && self.service_end.is_none() {
                return Err(ConfigError::ServiceWindowIncomplete);
            }
            if let Some(stop) = self.service_stop {
                if start >= stop {
                    return Err(ConfigError::ServiceStartAfterStop);
                }
            }
            if let Some(end) = self.service_end {
                if start >= end {
                    return Err(ConfigError::ServiceStartAfterEnd);
                }
            }
            if let (Some(stop), Some(end)) = (self.service_stop, self.service_end) {
                if stop >= end {
                    return Err(ConfigError::ServiceStopAfterEnd);
                }
            }
        }
        Ok(())
    }

    /// Effective heartbeat period: `min(interval, zombie_period/3)` when
    /// zombie detection is enabled, else `interval` — ticking at a third
    /// of the zombie period keeps detection from lagging the grace window.
    pub fn effective_heartbeat_secs(&self, interval_secs: u64) -> u64 {
        if self.zombie_period_secs > 0 {
            interval_secs.min(self.zombie_period_secs / 3).max(1)
        } else {
            interval_secs
        }
    }
}

/// One CPU worth of reservable capacity (spec §3 "Server slot").
#[derive(Debug, Clone)]
pub struct ServerSlot {
    pub id: SlotId,
    pub iid: InstanceId,
    pub port: u16,
    pub name: String,
    /// `Some` when a worker is registered for this slot this reservation.
    pub task: Option<WorkerEndpoint>,
    pub busy_time: BusyTimeCell,
    pub pid_file: PathBuf,
    /// Per-slot restart-on-exit flag; wins for a single respawn over the
    /// spawner-wide policy, then clears (Open Question 3 in SPEC_FULL).
    pub restart: bool,
}

impl ServerSlot {
    pub fn new(id: SlotId, port: u16, name: String, pid_file: PathBuf) -> Self {
        Self {
            id,
            iid: InstanceId::INITIAL,
            port,
            name,
            task: None,
            busy_time: BusyTimeCell::default(),
            pid_file,
            restart: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.task.is_none()
    }
}

/// Opaque address of a worker's messaging-fabric endpoint. Peers are
/// compared by address, never held as owning references (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct WorkerEndpoint {
    pub slot: SlotId,
    pub iid: InstanceId,
    pub pid: u32,
}

/// Node-wide reservation state; at most one is live on a node at a time.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub auth: AuthToken,
    pub scheduler_location: String,
    pub client_location: String,
    pub cpus_reserved: Vec<SlotId>,
    pub interval_secs: u64,
    pub abandon_zombie: bool,
    pub served: u64,
}
