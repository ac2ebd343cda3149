// SPDX-License-Identifier: MIT

//! The service-window timer (spec §4.1 "Service window"). A pure
//! function of `(now, controller state)` producing effects, in the same
//! style as [`crate::heartbeat`]: the daemon's async loop ticks it on a
//! short interval and forwards whatever effects come back. Grounded on
//! `dispycosnode.py`'s `service_times_proc`/`service_available`: three
//! optional boundaries a day — `start` opens the window, `stop`
//! gracefully closes whatever is running, `end` force-terminates it —
//! each firing once and then rearming 24 hours later.

use crate::controller::NodeController;
use crate::effects::ControllerEffect;
use fabric_core::{Clock, NodeConfig, ServiceTime};
use fabric_wire::SpawnerCommand;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// The next epoch-seconds instant each configured boundary is due to
/// fire. `None` for a boundary that was never configured.
#[derive(Debug, Clone, Copy)]
pub struct WindowSchedule {
    pub next_start: Option<u64>,
    pub next_stop: Option<u64>,
    pub next_end: Option<u64>,
}

impl WindowSchedule {
    /// Today's occurrence of each boundary, computed from `now`. If a
    /// boundary's time-of-day has already passed today it still lands in
    /// the past here — `tick` treats that as already due and fires it on
    /// its first call, matching `service_times_proc`'s initial
    /// `task.sleep(start - now)` with a negative duration.
    pub fn new(config: &NodeConfig, now: u64) -> Self {
        Self {
            next_start: config.service_start.map(|t| today_at(now, t)),
            next_stop: config.service_stop.map(|t| today_at(now, t)),
            next_end: config.service_end.map(|t| today_at(now, t)),
        }
    }
}

fn today_at(now: u64, t: ServiceTime) -> u64 {
    let midnight = now - (now % SECS_PER_DAY);
    midnight + t.seconds_of_day() as u64
}

pub struct TimerOutcome {
    pub effects: Vec<ControllerEffect>,
}

/// One service-window tick. Fires at most one transition per boundary
/// per call, advancing that boundary 24h into the future once fired so
/// the next call doesn't refire it.
pub fn tick<C: Clock>(controller: &NodeController<C>, now_epoch_secs: u64) -> TimerOutcome {
    let mut effects = Vec::new();
    if controller.config().service_start.is_none() {
        return TimerOutcome { effects };
    }

    let mut schedule = controller.window_schedule();

    if let Some(next_start) = schedule.next_start {
        if now_epoch_secs >= next_start {
            tracing::info!("service window opened");
            controller.set_service_open(true);
            effects.push(ControllerEffect::BroadcastDiscovery);
            schedule.next_start = Some(next_start + SECS_PER_DAY);
        }
    }

    if let Some(next_stop) = schedule.next_stop {
        if now_epoch_secs >= next_stop {
            tracing::info!("service window closing, releasing active servers gracefully");
            for slot in controller.reserved_slots() {
                effects.push(ControllerEffect::SendToSpawner(SpawnerCommand::CloseServer {
                    slot,
                    terminate: false,
                    restart: false,
                }));
            }
            controller.set_service_open(false);
            schedule.next_stop = Some(next_stop + SECS_PER_DAY);
        }
    }

    if let Some(next_end) = schedule.next_end {
        if now_epoch_secs >= next_end {
            tracing::info!("service window end reached, force-terminating and releasing");
            for slot in controller.reserved_slots() {
                effects.push(ControllerEffect::SendToSpawner(SpawnerCommand::CloseServer {
                    slot,
                    terminate: true,
                    restart: false,
                }));
            }
            effects.push(ControllerEffect::TerminateSpawner);
            effects.push(ControllerEffect::RemoveClientPayload);
            controller.set_service_open(false);
            schedule.next_end = Some(next_end + SECS_PER_DAY);
        }
    }

    controller.set_window_schedule(schedule);
    TimerOutcome { effects }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_adapters::NullTelemetry;
    use fabric_core::{FakeClock, InstanceId, SlotId};
    use fabric_wire::{NodeRequest, NodeResponse};
    use std::sync::Arc;

    fn window_config(start: &str, stop: Option<&str>, end: Option<&str>) -> NodeConfig {
        NodeConfig {
            num_cpus: 2,
            node_ports: vec![9700, 9701, 9702],
            udp_port: 9703,
            name: "n".into(),
            dest_path: std::env::temp_dir(),
            certfile: None,
            keyfile: None,
            msg_timeout_secs: 5,
            min_pulse_interval_secs: 2,
            max_pulse_interval_secs: 10,
            zombie_period_secs: 0,
            ping_interval_secs: 0,
            serve_count: -1,
            service_start: Some(ServiceTime::parse(start).unwrap()),
            service_stop: stop.map(|s| ServiceTime::parse(s).unwrap()),
            service_end: end.map(|s| ServiceTime::parse(s).unwrap()),
            ipv4_udp_multicast: false,
            peers: vec![],
            max_file_size: None,
        }
    }

    #[test]
    fn reservation_refused_before_window_opens() {
        let ctl = NodeController::new(window_config("08:00", Some("17:00"), None), FakeClock::new(), Arc::new(NullTelemetry));
        assert!(!ctl.service_open());
        let (resp, _) = ctl.handle_request(NodeRequest::Reserve {
            cpus: 1,
            pulse_interval_secs: 5,
            status_location: "s".into(),
            client_location: "c".into(),
            abandon_zombie: false,
        });
        assert_eq!(resp, NodeResponse::Reserved { cpus: 0, auth: None });
    }

    #[test]
    fn tick_past_start_opens_the_window_and_admits_reservations() {
        let ctl = NodeController::new(window_config("08:00", Some("17:00"), None), FakeClock::new(), Arc::new(NullTelemetry));
        let start = 8 * 3600;
        let outcome = tick(&ctl, start);
        assert!(ctl.service_open());
        assert!(outcome.effects.iter().any(|e| matches!(e, ControllerEffect::BroadcastDiscovery)));

        let (resp, _) = ctl.handle_request(NodeRequest::Reserve {
            cpus: 1,
            pulse_interval_secs: 5,
            status_location: "s".into(),
            client_location: "c".into(),
            abandon_zombie: false,
        });
        assert!(matches!(resp, NodeResponse::Reserved { cpus: 1, .. }));
    }

    #[test]
    fn tick_past_stop_closes_active_servers_gracefully() {
        let ctl = NodeController::new(window_config("08:00", Some("17:00"), None), FakeClock::new(), Arc::new(NullTelemetry));
        tick(&ctl, 8 * 3600);
        let (resp, _) = ctl.handle_request(NodeRequest::Reserve {
            cpus: 1,
            pulse_interval_secs: 5,
            status_location: "s".into(),
            client_location: "c".into(),
            abandon_zombie: false,
        });
        let NodeResponse::Reserved { auth: Some(auth), .. } = resp else { panic!("expected grant") };
        ctl.handle_request(NodeRequest::ServerTask {
            auth: Some(auth),
            slot: SlotId(1),
            iid: InstanceId::INITIAL,
            pid: 7,
            alive: true,
        });

        let outcome = tick(&ctl, 17 * 3600);
        assert!(!ctl.service_open());
        assert!(outcome.effects.iter().any(|e| matches!(
            e,
            ControllerEffect::SendToSpawner(SpawnerCommand::CloseServer { terminate: false, .. })
        )));
    }

    #[test]
    fn tick_past_end_force_terminates_and_releases() {
        let ctl = NodeController::new(
            window_config("08:00", Some("17:00"), Some("18:00")),
            FakeClock::new(),
            Arc::new(NullTelemetry),
        );
        tick(&ctl, 8 * 3600);
        let outcome = tick(&ctl, 18 * 3600);
        assert!(outcome.effects.iter().any(|e| matches!(e, ControllerEffect::TerminateSpawner)));
        assert!(outcome.effects.iter().any(|e| matches!(e, ControllerEffect::RemoveClientPayload)));
    }

    #[test]
    fn boundary_advances_24h_after_firing_and_does_not_refire() {
        let ctl = NodeController::new(window_config("08:00", Some("17:00"), None), FakeClock::new(), Arc::new(NullTelemetry));
        let first = tick(&ctl, 8 * 3600);
        assert_eq!(first.effects.len(), 1);
        let second = tick(&ctl, 8 * 3600 + 10);
        assert!(second.effects.is_empty());
        let schedule = ctl.window_schedule();
        assert_eq!(schedule.next_start, Some(8 * 3600 + SECS_PER_DAY));
    }

    #[test]
    fn unconfigured_window_is_always_open_and_never_ticks() {
        let ctl = NodeController::new(
            NodeConfig {
                num_cpus: 1,
                node_ports: vec![9700, 9701],
                udp_port: 9702,
                name: "n".into(),
                dest_path: std::env::temp_dir(),
                certfile: None,
                keyfile: None,
                msg_timeout_secs: 5,
                min_pulse_interval_secs: 2,
                max_pulse_interval_secs: 10,
                zombie_period_secs: 0,
                ping_interval_secs: 0,
                serve_count: -1,
                service_start: None,
                service_stop: None,
                service_end: None,
                ipv4_udp_multicast: false,
                peers: vec![],
                max_file_size: None,
            },
            FakeClock::new(),
            Arc::new(NullTelemetry),
        );
        assert!(ctl.service_open());
        let outcome = tick(&ctl, 1_000_000);
        assert!(outcome.effects.is_empty());
    }
}
