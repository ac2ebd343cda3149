// SPDX-License-Identifier: MIT

//! Centralized environment variable access — one place that knows
//! every env var name the daemon reads.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Resolve state directory: `FABRIC_STATE_DIR` > `XDG_STATE_HOME/fabric` > `~/.local/state/fabric`.
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("FABRIC_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("fabric"));
    }
    let home = dirs::home_dir().ok_or(LifecycleError::NoStateDir)?;
    Ok(home.join(".local/state/fabric"))
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

pub fn num_cpus() -> u32 {
    match std::env::var("FABRIC_CPUS").ok().and_then(|s| s.parse::<i64>().ok()) {
        Some(0) | None => num_cpus::get() as u32,
        Some(n) if n > 0 => n as u32,
        Some(n) => (num_cpus::get() as i64 + n).max(1) as u32,
    }
}

pub fn name() -> String {
    std::env::var("FABRIC_NAME").unwrap_or_else(|_| {
        hostname_fallback()
    })
}

fn hostname_fallback() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "fabric-node".to_string())
}

pub fn udp_port() -> u16 {
    env_u32("FABRIC_UDP_PORT", 9700) as u16
}

pub fn msg_timeout() -> Duration {
    Duration::from_secs(env_u64("FABRIC_MSG_TIMEOUT_SECS", 5))
}

pub fn min_pulse_interval() -> u64 {
    env_u64("FABRIC_MIN_PULSE_INTERVAL_SECS", 10)
}

pub fn max_pulse_interval() -> u64 {
    env_u64("FABRIC_MAX_PULSE_INTERVAL_SECS", 60)
}

pub fn zombie_period() -> u64 {
    env_u64("FABRIC_ZOMBIE_PERIOD_SECS", 0)
}

pub fn ping_interval() -> u64 {
    env_u64("FABRIC_PING_INTERVAL_SECS", 0)
}

pub fn serve_count() -> i64 {
    std::env::var("FABRIC_SERVE_COUNT").ok().and_then(|s| s.parse().ok()).unwrap_or(-1)
}

pub fn clean_on_start() -> bool {
    std::env::var("FABRIC_CLEAN").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

pub fn max_file_size() -> Option<u64> {
    std::env::var("FABRIC_MAX_FILE_SIZE").ok().and_then(|s| s.parse().ok())
}

pub fn spawn_user() -> Option<String> {
    std::env::var("FABRIC_SPAWN_USER").ok().filter(|s| !s.is_empty())
}

/// Whether this process is attached to a controlling terminal (spec.md
/// §2 supplement: "Daemon vs. foreground detection").
pub fn interactive() -> bool {
    use std::io::IsTerminal;
    std::io::stdin().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_on_start_accepts_one_true_and_mixed_case_true() {
        std::env::remove_var("FABRIC_CLEAN");
        assert!(!clean_on_start());
        std::env::set_var("FABRIC_CLEAN", "1");
        assert!(clean_on_start());
        std::env::set_var("FABRIC_CLEAN", "True");
        assert!(clean_on_start());
        std::env::set_var("FABRIC_CLEAN", "0");
        assert!(!clean_on_start());
        std::env::remove_var("FABRIC_CLEAN");
    }

    #[test]
    fn serve_count_defaults_to_unlimited() {
        std::env::remove_var("FABRIC_SERVE_COUNT");
        assert_eq!(serve_count(), -1);
        std::env::set_var("FABRIC_SERVE_COUNT", "3");
        assert_eq!(serve_count(), 3);
        std::env::remove_var("FABRIC_SERVE_COUNT");
    }

    #[test]
    fn max_file_size_is_none_unless_set_and_parseable() {
        std::env::remove_var("FABRIC_MAX_FILE_SIZE");
        assert_eq!(max_file_size(), None);
        std::env::set_var("FABRIC_MAX_FILE_SIZE", "4096");
        assert_eq!(max_file_size(), Some(4096));
        std::env::set_var("FABRIC_MAX_FILE_SIZE", "not-a-number");
        assert_eq!(max_file_size(), None);
        std::env::remove_var("FABRIC_MAX_FILE_SIZE");
    }

    #[test]
    fn spawn_user_treats_empty_string_as_unset() {
        std::env::remove_var("FABRIC_SPAWN_USER");
        assert_eq!(spawn_user(), None);
        std::env::set_var("FABRIC_SPAWN_USER", "");
        assert_eq!(spawn_user(), None);
        std::env::set_var("FABRIC_SPAWN_USER", "worker");
        assert_eq!(spawn_user(), Some("worker".to_string()));
        std::env::remove_var("FABRIC_SPAWN_USER");
    }

    #[test]
    fn num_cpus_accepts_negative_offsets_from_the_detected_count() {
        std::env::remove_var("FABRIC_CPUS");
        let detected = num_cpus::get() as u32;
        assert_eq!(num_cpus(), detected);
        std::env::set_var("FABRIC_CPUS", "2");
        assert_eq!(num_cpus(), 2);
        std::env::set_var("FABRIC_CPUS", "-1");
        assert_eq!(num_cpus(), (detected as i64 - 1).max(1) as u32);
        std::env::remove_var("FABRIC_CPUS");
    }
}
