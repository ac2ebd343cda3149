// SPDX-License-Identifier: MIT

//! Daemon configuration: paths plus the `NodeConfig` data model (spec §3,
//! §6), loaded and validated once at startup, resolving every path
//! relative to one fixed state directory.

use std::path::PathBuf;

use fabric_core::{NodeConfig, ServiceTime};
use thiserror::Error;

use crate::env;
use crate::lifecycle::LifecycleError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Node(#[from] fabric_core::ConfigError),
    #[error("invalid {0} env var: {1:?}")]
    InvalidEnv(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
    pub lock_path: PathBuf,
    pub pid_path: PathBuf,
    pub log_path: PathBuf,
    pub clean: bool,
    pub interactive: bool,
}

impl Config {
    /// Load configuration for the node daemon. Fixed paths under
    /// `FABRIC_STATE_DIR` (or XDG/`HOME` fallback); one node serves one
    /// host. `dest_path` (spec §6 "Persisted state") is the same
    /// directory, matching the original's single scratch root.
    pub fn from_env() -> Result<Self, ConfigError> {
        let state_dir = env::state_dir()?;
        let num_cpus = env::num_cpus();

        let node_ports = parse_node_ports(num_cpus)?;

        let service_start = parse_service_time("FABRIC_SERVICE_START")?;
        let service_stop = parse_service_time("FABRIC_SERVICE_STOP")?;
        let service_end = parse_service_time("FABRIC_SERVICE_END")?;

        let node = NodeConfig {
            num_cpus,
            node_ports,
            udp_port: env::udp_port(),
            name: env::name(),
            dest_path: state_dir.clone(),
            certfile: std::env::var("FABRIC_CERTFILE").ok().map(PathBuf::from),
            keyfile: std::env::var("FABRIC_KEYFILE").ok().map(PathBuf::from),
            msg_timeout_secs: env::msg_timeout().as_secs(),
            min_pulse_interval_secs: env::min_pulse_interval(),
            max_pulse_interval_secs: env::max_pulse_interval(),
            zombie_period_secs: env::zombie_period(),
            ping_interval_secs: env::ping_interval(),
            serve_count: env::serve_count(),
            service_start,
            service_stop,
            service_end,
            ipv4_udp_multicast: std::env::var("FABRIC_IPV4_UDP_MULTICAST").is_ok(),
            peers: std::env::var("FABRIC_PEERS")
                .ok()
                .map(|s| s.split(',').filter(|p| !p.is_empty()).map(str::to_string).collect())
                .unwrap_or_default(),
            max_file_size: env::max_file_size(),
        };
        node.validate()?;

        Ok(Self {
            socket_path: state_dir.join("fabricd.sock"),
            lock_path: state_dir.join("fabricd.lock"),
            pid_path: state_dir.join("server-0.pid"),
            log_path: state_dir.join("fabricd.log"),
            state_dir,
            node,
            clean: env::clean_on_start(),
            interactive: env::interactive(),
        })
    }
}

/// `FABRIC_NODE_PORTS` as either a comma list or a `"START-END"` range
/// (spec §2 supplement); defaults to `9700..=9700+num_cpus`.
fn parse_node_ports(num_cpus: u32) -> Result<Vec<u16>, ConfigError> {
    let Ok(raw) = std::env::var("FABRIC_NODE_PORTS") else {
        return Ok((0..=num_cpus as u16).map(|i| 9700 + i).collect());
    };
    if let Some((start, end)) = raw.split_once('-') {
        let start: u16 = start.trim().parse().map_err(|_| ConfigError::InvalidEnv("FABRIC_NODE_PORTS", raw.clone()))?;
        let end: u16 = end.trim().parse().map_err(|_| ConfigError::InvalidEnv("FABRIC_NODE_PORTS", raw.clone()))?;
        return Ok((start..=end).collect());
    }
    raw.split(',')
        .map(|p| p.trim().parse::<u16>().map_err(|_| ConfigError::InvalidEnv("FABRIC_NODE_PORTS", raw.clone())))
        .collect()
}

fn parse_service_time(var: &'static str) -> Result<Option<ServiceTime>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => Ok(Some(ServiceTime::parse(&raw)?)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `FABRIC_NODE_PORTS` is process-global, so every case that touches it
    // lives in one test run sequentially rather than racing in parallel
    // `#[test]` functions against the same variable.
    #[test]
    fn parse_node_ports_covers_default_comma_range_and_garbage_forms() {
        std::env::remove_var("FABRIC_NODE_PORTS");
        assert_eq!(parse_node_ports(3).expect("default ports"), vec![9700, 9701, 9702, 9703]);

        std::env::set_var("FABRIC_NODE_PORTS", "9800,9801,9802");
        assert_eq!(parse_node_ports(0).expect("comma ports"), vec![9800, 9801, 9802]);

        std::env::set_var("FABRIC_NODE_PORTS", "9900-9903");
        assert_eq!(parse_node_ports(3).expect("range ports"), vec![9900, 9901, 9902, 9903]);

        std::env::set_var("FABRIC_NODE_PORTS", "not-a-port");
        let err = parse_node_ports(1).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv("FABRIC_NODE_PORTS", _)));

        std::env::remove_var("FABRIC_NODE_PORTS");
    }

    #[test]
    fn parse_service_time_is_none_when_unset() {
        std::env::remove_var("FABRIC_CONFIG_TEST_SERVICE_TIME");
        let parsed = parse_service_time("FABRIC_CONFIG_TEST_SERVICE_TIME").expect("unset is ok");
        assert!(parsed.is_none());
    }

    #[test]
    fn parse_service_time_rejects_malformed_values() {
        std::env::set_var("FABRIC_CONFIG_TEST_SERVICE_TIME_BAD", "noon");
        let err = parse_service_time("FABRIC_CONFIG_TEST_SERVICE_TIME_BAD").unwrap_err();
        std::env::remove_var("FABRIC_CONFIG_TEST_SERVICE_TIME_BAD");
        assert!(matches!(err, ConfigError::Node(fabric_core::ConfigError::InvalidServiceTime(_))));
    }
}
