// SPDX-License-Identifier: MIT

//! Host availability telemetry sampled for `dispycos_node_info` replies
//! and pulses (spec §4.1, §4.2). Best-effort: a sampler that cannot read
//! the host returns `None` rather than fabricating numbers, matching the
//! original's "if availability telemetry is obtainable" qualifier.

use fabric_wire::AvailInfo;

pub trait Telemetry: Send + Sync + 'static {
    fn sample(&self) -> Option<AvailInfo>;
}

/// Reads `/proc/meminfo` and `statvfs` on the destination path; no
/// cpu/swap sampling (that needs two time-separated `/proc/stat` reads,
/// which the heartbeat timer is free to add by holding a previous
/// sample, not this stateless sampler).
#[derive(Debug, Clone)]
pub struct ProcTelemetry {
    pub disk_path: std::path::PathBuf,
}

impl ProcTelemetry {
    pub fn new(disk_path: impl Into<std::path::PathBuf>) -> Self {
        Self { disk_path: disk_path.into() }
    }
}

impl Telemetry for ProcTelemetry {
    #[cfg(target_os = "linux")]
    fn sample(&self) -> Option<AvailInfo> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        let mem_available_kb = meminfo.lines().find_map(|line| {
            line.strip_prefix("MemAvailable:")
                .and_then(|rest| rest.trim().split_whitespace().next())
                .and_then(|n| n.parse::<u64>().ok())
        })?;
        let swap_total_kb = meminfo.lines().find_map(|line| {
            line.strip_prefix("SwapTotal:")
                .and_then(|rest| rest.trim().split_whitespace().next())
                .and_then(|n| n.parse::<u64>().ok())
        });
        let swap_free_kb = meminfo.lines().find_map(|line| {
            line.strip_prefix("SwapFree:")
                .and_then(|rest| rest.trim().split_whitespace().next())
                .and_then(|n| n.parse::<u64>().ok())
        });
        let swap_percent = match (swap_total_kb, swap_free_kb) {
            (Some(total), Some(free)) if total > 0 => {
                (1.0 - (free as f32 / total as f32)) * 100.0
            }
            _ => 0.0,
        };

        let disk_free_bytes = nix::sys::statvfs::statvfs(&self.disk_path)
            .ok()
            .map(|stat| stat.blocks_available() * stat.fragment_size())
            .unwrap_or(0);

        Some(AvailInfo {
            cpu_percent: 0.0,
            memory_free_bytes: mem_available_kb * 1024,
            disk_free_bytes,
            swap_percent,
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&self) -> Option<AvailInfo> {
        None
    }
}

/// Always reports no telemetry; used in tests and non-Linux builds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetry;

impl Telemetry for NullTelemetry {
    fn sample(&self) -> Option<AvailInfo> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_telemetry_reports_nothing() {
        assert!(NullTelemetry.sample().is_none());
    }
}
