// SPDX-License-Identifier: MIT

//! The heartbeat/service-window timer (spec §4.2). A pure function of
//! `(now, controller state)` producing effects — ticked by the daemon's
//! async loop on `effective_heartbeat_secs`, in the same timer-driven
//! effect style the controller itself uses, but expressed as a single
//! `tick()` rather than a per-job timer table, since a node has exactly
//! one reservation live at a time.

use crate::controller::NodeController;
use crate::effects::ControllerEffect;
use fabric_core::Clock;
use fabric_wire::{Pulse, SpawnerCommand};

/// Consecutive pulse delivery failures after which the reservation is
/// torn down (spec §4.2 step 2).
pub const MAX_CONSECUTIVE_PULSE_FAILURES: u32 = 5;

/// A zombie slot whose lag exceeds `zombie_period` is closed gracefully;
/// beyond `ZOMBIE_FORCE_MULTIPLIER * zombie_period` it is force-terminated
/// (spec §4.2 step 3).
pub const ZOMBIE_FORCE_MULTIPLIER: u64 = 2;

pub struct HeartbeatOutcome {
    pub effects: Vec<ControllerEffect>,
    pub pulse_delivered: Option<bool>,
}

/// One heartbeat tick. `pulse_delivery` reports whether the tick's pulse
/// send (if any) succeeded — supplied by the caller since only it can
/// await the fabric send within `msg_timeout`.
pub fn tick<C: Clock>(
    controller: &NodeController<C>,
    now_epoch_secs: u64,
    pulse_delivery: Option<bool>,
) -> HeartbeatOutcome {
    let mut effects = Vec::new();

    let Some(reservation) = controller.active_reservation() else {
        if controller.discovery_enabled() && controller.config().ping_interval_secs > 0 {
            effects.push(ControllerEffect::BroadcastDiscovery);
        }
        return HeartbeatOutcome { effects, pulse_delivered: None };
    };

    // Step 1/2: pulse delivery and failure escalation.
    if let Some(delivered) = pulse_delivery {
        let failures = controller.record_pulse_result(delivered);
        if failures >= MAX_CONSECUTIVE_PULSE_FAILURES {
            tracing::warn!(auth = %reservation.auth, failures, "scheduler unreachable, closing reservation");
            effects.push(ControllerEffect::SendToSpawner(SpawnerCommand::Quit));
            effects.push(ControllerEffect::RemoveClientPayload);
        }
    }

    // Step 3: zombie detection.
    let zombie_period = controller.config().zombie_period_secs;
    if zombie_period > 0 {
        let mut reserved_slots = controller.reserved_slots();
        let mut zombie_count = 0usize;
        for slot in &reserved_slots {
            let Some(busy_time) = controller.slot_busy_time(*slot) else { continue };
            if busy_time == 0 {
                continue;
            }
            let lag = now_epoch_secs.saturating_sub(busy_time);
            if lag > zombie_period {
                zombie_count += 1;
                let force = lag > ZOMBIE_FORCE_MULTIPLIER * zombie_period;
                tracing::debug!(?slot, lag, force, "zombie slot detected");
                effects.push(ControllerEffect::SendToSpawner(SpawnerCommand::CloseServer {
                    slot: *slot,
                    terminate: force,
                    restart: false,
                }));
            }
        }
        if reservation.abandon_zombie && !reserved_slots.is_empty() && zombie_count == reserved_slots.len() {
            tracing::info!(auth = %reservation.auth, "all reserved slots zombie, abandoning reservation");
            effects.push(ControllerEffect::SendToSpawner(SpawnerCommand::Quit));
            effects.push(ControllerEffect::RemoveClientPayload);
        }
        reserved_slots.clear();
    }

    HeartbeatOutcome { effects, pulse_delivered: pulse_delivery }
}

/// Build the outbound pulse message for the current tick, if telemetry is
/// obtainable (spec §4.2 step 1: "if availability telemetry is obtainable").
/// Returns `None` when no reservation is active or telemetry can't be read,
/// in which case no pulse is sent this tick.
pub fn build_pulse<C: Clock>(controller: &NodeController<C>) -> Option<Pulse> {
    controller.active_reservation()?;
    let avail = controller.telemetry().sample()?;
    Some(Pulse {
        cpu_percent: avail.cpu_percent,
        memory_free_bytes: avail.memory_free_bytes,
        disk_free_bytes: avail.disk_free_bytes,
        swap_percent: avail.swap_percent,
    })
}
