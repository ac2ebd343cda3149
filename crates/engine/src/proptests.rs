// SPDX-License-Identifier: MIT

//! Property tests for the invariants enumerated in spec §8.

use crate::controller::NodeController;
use fabric_adapters::NullTelemetry;
use fabric_core::{AuthToken, FakeClock, InstanceId, NodeConfig, SlotId};
use fabric_wire::{NodeRequest, NodeResponse};
use proptest::prelude::*;
use std::sync::Arc;

fn test_config(num_cpus: u32) -> NodeConfig {
    let mut ports = vec![9700u16];
    ports.extend((1..=num_cpus).map(|i| 9700 + i as u16));
    NodeConfig {
        num_cpus,
        node_ports: ports,
        udp_port: 9800,
        name: "prop-node".into(),
        dest_path: std::env::temp_dir(),
        certfile: None,
        keyfile: None,
        msg_timeout_secs: 5,
        min_pulse_interval_secs: 2,
        max_pulse_interval_secs: 20,
        zombie_period_secs: 0,
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

fn controller(num_cpus: u32) -> NodeController<FakeClock> {
    NodeController::new(test_config(num_cpus), FakeClock::new(), Arc::new(NullTelemetry))
}

#[derive(Debug, Clone)]
enum Op {
    Reserve { cpus: u32 },
    Release { use_real_auth: bool },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u32..=4).prop_map(|cpus| Op::Reserve { cpus }),
        any::<bool>().prop_map(|use_real_auth| Op::Release { use_real_auth }),
    ]
}

proptest! {
    /// P1 (at-most-one-client): across any interleaving of reserve/release,
    /// a grant while a reservation is already active never happens.
    #[test]
    fn p1_at_most_one_client(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let ctl = controller(4);
        let mut current_auth: Option<AuthToken> = None;

        for op in ops {
            match op {
                Op::Reserve { cpus } => {
                    let had_reservation_before = current_auth.is_some();
                    let (resp, _) = ctl.handle_request(NodeRequest::Reserve {
                        cpus,
                        pulse_interval_secs: 5,
                        status_location: "s".into(),
                        client_location: "c".into(),
                        abandon_zombie: false,
                    });
                    if let NodeResponse::Reserved { auth: Some(auth), .. } = resp {
                        prop_assert!(!had_reservation_before, "granted a second reservation while one was active");
                        current_auth = Some(auth);
                    }
                }
                Op::Release { use_real_auth } => {
                    let auth = if use_real_auth {
                        current_auth.unwrap_or_else(AuthToken::generate)
                    } else {
                        AuthToken::generate()
                    };
                    let (resp, _) = ctl.handle_request(NodeRequest::Release {
                        auth,
                        terminate: false,
                        restart: false,
                        setup_args: vec![],
                    });
                    if matches!(resp, NodeResponse::Ok) && Some(auth) == current_auth {
                        current_auth = None;
                    }
                }
            }
        }
    }

    /// P2 (iid-monotonic): repeated respawns of the same slot strictly
    /// increase its iid, never repeat or go backwards.
    #[test]
    fn p2_iid_monotonic(respawns in 1usize..20) {
        let ctl = controller(2);
        let mut last = InstanceId::INITIAL;
        for _ in 0..respawns {
            let next = ctl.bump_slot_iid(SlotId(1)).expect("slot exists");
            prop_assert!(next > last);
            last = next;
        }
    }

    /// P3 (auth-gated): every state-mutating request with a wrong auth
    /// token leaves free_cpus and the active reservation unchanged.
    #[test]
    fn p3_auth_gated(wrong_auth in any::<[u8; 20]>()) {
        let ctl = controller(4);
        let (resp, _) = ctl.handle_request(NodeRequest::Reserve {
            cpus: 2,
            pulse_interval_secs: 5,
            status_location: "s".into(),
            client_location: "c".into(),
            abandon_zombie: false,
        });
        let NodeResponse::Reserved { auth: Some(real_auth), .. } = resp else {
            return Ok(());
        };
        let bogus = AuthToken::from_hex(&wrong_auth.iter().map(|b| format!("{b:02x}")).collect::<String>())
            .unwrap_or_else(AuthToken::generate);
        prop_assume!(bogus != real_auth);

        let free_before = ctl.free_cpus();
        let (resp, effects) = ctl.handle_request(NodeRequest::AbandonZombie { auth: bogus, flag: true });
        prop_assert!(matches!(resp, NodeResponse::Error { .. }), "expected an error response");
        prop_assert!(effects.is_empty());
        prop_assert_eq!(ctl.free_cpus(), free_before);
        prop_assert!(ctl.active_reservation().is_some());
    }
}
