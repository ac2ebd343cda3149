// SPDX-License-Identifier: MIT

//! End-to-end scenario tests against the node controller (spec §8).

use fabric_adapters::NullTelemetry;
use fabric_core::{FakeClock, InstanceId, NodeConfig, SlotId};
use fabric_engine::{heartbeat_tick, ControllerEffect, NodeController};
use fabric_wire::{NodeRequest, NodeResponse, SpawnerCommand};
use std::sync::Arc;

fn config(num_cpus: u32, min: u64, max: u64, zombie: u64) -> NodeConfig {
    let mut ports = vec![9700u16];
    ports.extend((1..=num_cpus).map(|i| 9700 + i as u16));
    NodeConfig {
        num_cpus,
        node_ports: ports,
        udp_port: 9800,
        name: "scenario-node".into(),
        dest_path: std::env::temp_dir(),
        certfile: None,
        keyfile: None,
        msg_timeout_secs: 5,
        min_pulse_interval_secs: min,
        max_pulse_interval_secs: max,
        zombie_period_secs: zombie,
        ping_interval_secs: 0,
        serve_count: -1,
        service_start: None,
        service_stop: None,
        service_end: None,
        ipv4_udp_multicast: false,
        peers: vec![],
        max_file_size: None,
    }
}

/// Scenario 1: happy path — 4-CPU node, reserve 2, run to completion,
/// release, node returns to idle with 4 free slots and served == 1.
#[test]
fn happy_path_returns_node_to_idle() {
    let ctl = NodeController::new(config(4, 5, 10, 0), FakeClock::new(), Arc::new(NullTelemetry));

    let (resp, _) = ctl.handle_request(NodeRequest::Reserve {
        cpus: 2,
        pulse_interval_secs: 7,
        status_location: "scheduler:1".into(),
        client_location: "client:1".into(),
        abandon_zombie: false,
    });
    let NodeResponse::Reserved { auth: Some(auth), .. } = resp else { panic!("expected grant") };
    assert_eq!(ctl.free_cpus(), 2);

    let (resp, effects) =
        ctl.handle_request(NodeRequest::Client { auth, client_payload: b"client-blob".to_vec(), setup_args: vec![] });
    assert_eq!(resp, NodeResponse::ClientAck { cpus: 2 });
    assert!(effects.iter().any(|e| matches!(e, ControllerEffect::LaunchSpawner { .. })));

    for (i, slot) in ctl.reserved_slots().into_iter().enumerate() {
        let (resp, _) = ctl.handle_request(NodeRequest::ServerTask {
            auth: Some(auth),
            slot,
            iid: InstanceId::INITIAL,
            pid: 1000 + i as u32,
            alive: true,
        });
        assert_eq!(resp, NodeResponse::Ok);
    }
    assert_eq!(ctl.free_cpus(), 2); // still 2 idle slots not part of this reservation

    let (resp, _) =
        ctl.handle_request(NodeRequest::Release { auth, terminate: false, restart: false, setup_args: vec![] });
    assert_eq!(resp, NodeResponse::Ok);
    assert_eq!(ctl.free_cpus(), 4);
    assert!(ctl.active_reservation().is_none());
}

/// Scenario 3: zombie detection with abandon_zombie — a single-slot
/// reservation whose worker stops updating busy_time past zombie_period
/// is force-terminated and, since it is the only reserved slot, the
/// whole reservation is abandoned.
#[test]
fn zombie_detection_with_abandon_flag_releases_reservation() {
    let ctl = NodeController::new(config(2, 2, 10, 6), FakeClock::new(), Arc::new(NullTelemetry));
    let (resp, _) = ctl.handle_request(NodeRequest::Reserve {
        cpus: 1,
        pulse_interval_secs: 2,
        status_location: "s".into(),
        client_location: "c".into(),
        abandon_zombie: true,
    });
    let NodeResponse::Reserved { auth: Some(auth), .. } = resp else { panic!("expected grant") };
    ctl.handle_request(NodeRequest::Client { auth, client_payload: vec![], setup_args: vec![] });
    let slot = ctl.reserved_slots()[0];
    ctl.handle_request(NodeRequest::ServerTask { auth: Some(auth), slot, iid: InstanceId::INITIAL, pid: 7, alive: true });

    let outcome_at_6s = heartbeat_tick(&ctl, 6, None);
    assert!(outcome_at_6s
        .effects
        .iter()
        .any(|e| matches!(e, ControllerEffect::SendToSpawner(SpawnerCommand::CloseServer { terminate: false, .. }))));

    let outcome_at_13s = heartbeat_tick(&ctl, 13, None);
    assert!(outcome_at_13s.effects.iter().any(|e| matches!(e, ControllerEffect::RemoveClientPayload)));
}

/// Scenario 4: restart worker — close_server{restart:true} while idle
/// bumps the slot's iid and it is the only caller who can register
/// again under the new iid.
#[test]
fn restart_worker_bumps_iid_and_drops_stale_registration() {
    let ctl = NodeController::new(config(4, 5, 10, 0), FakeClock::new(), Arc::new(NullTelemetry));
    let (resp, _) = ctl.handle_request(NodeRequest::Reserve {
        cpus: 1,
        pulse_interval_secs: 5,
        status_location: "s".into(),
        client_location: "c".into(),
        abandon_zombie: false,
    });
    let NodeResponse::Reserved { auth: Some(auth), .. } = resp else { panic!("expected grant") };
    let slot = SlotId(1);
    ctl.handle_request(NodeRequest::Client { auth, client_payload: vec![], setup_args: vec![] });
    ctl.handle_request(NodeRequest::ServerTask { auth: Some(auth), slot, iid: InstanceId::INITIAL, pid: 1, alive: true });

    let (resp, effects) =
        ctl.handle_request(NodeRequest::CloseServer { auth, slot, terminate: false, restart: true });
    assert_eq!(resp, NodeResponse::Ok);
    assert!(effects.iter().any(|e| matches!(e, ControllerEffect::SendToSpawner(SpawnerCommand::CloseServer { restart: true, .. }))));

    let new_iid = ctl.bump_slot_iid(slot).expect("slot exists");
    assert!(new_iid > InstanceId::INITIAL);

    // A registration still carrying the old iid is dropped.
    let (resp, _) = ctl.handle_request(NodeRequest::ServerTask {
        auth: Some(auth),
        slot,
        iid: InstanceId::INITIAL,
        pid: 2,
        alive: true,
    });
    assert_eq!(resp, NodeResponse::Ok);

    // Registration under the new iid succeeds.
    let (resp, _) =
        ctl.handle_request(NodeRequest::ServerTask { auth: Some(auth), slot, iid: new_iid, pid: 3, alive: true });
    assert_eq!(resp, NodeResponse::Ok);
}
