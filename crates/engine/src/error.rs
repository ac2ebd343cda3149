// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no active reservation")]
    NoReservation,
    #[error("slot {0:?} does not exist")]
    UnknownSlot(fabric_core::SlotId),
    #[error("config error: {0}")]
    Config(#[from] fabric_core::ConfigError),
}
