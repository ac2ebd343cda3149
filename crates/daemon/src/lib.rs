// SPDX-License-Identifier: MIT

//! fabric-daemon: the node process, its spawner, and its workers (spec
//! §2). Three binaries share this crate's configuration, lifecycle, and
//! transport plumbing.
#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod env;
pub mod lifecycle;
pub mod listener;
pub mod node_loop;

pub use config::{Config, ConfigError};
pub use lifecycle::LifecycleError;

/// Shared `tracing` init for all three binaries — env-filter driven,
/// defaulting to `info`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
