// SPDX-License-Identifier: MIT

//! The node controller: owns reservation state, authenticates every
//! inbound message, and drives the spawner through a reservation's
//! lifecycle (spec §4.1). A state struct generic over its `Clock`,
//! guarded by `parking_lot::Mutex`, with `tracing` at every state
//! transition, returning "effects" that describe spawner/fabric actions
//! rather than performing them itself.

use crate::effects::ControllerEffect;
use crate::timer::WindowSchedule;
use fabric_core::{AuthToken, BusyTimeCell, Clock, InstanceId, NodeConfig, Reservation, ServerSlot, SlotId};
use fabric_wire::{AvailInfo, NodeInfo, NodeRequest, NodeResponse};
use parking_lot::Mutex;
use std::sync::Arc;

/// Bookkeeping alongside the core `Reservation` that does not belong in
/// `fabric-core` (it's controller-local policy, not shared data model).
struct ActiveReservation {
    reservation: Reservation,
    restart_servers: bool,
    consecutive_pulse_failures: u32,
}

pub struct NodeController<C: Clock> {
    config: NodeConfig,
    node_auth: AuthToken,
    clock: C,
    telemetry: Arc<dyn fabric_adapters::Telemetry>,
    slots: Mutex<Vec<ServerSlot>>,
    reservation: Mutex<Option<ActiveReservation>>,
    discovery_enabled: Mutex<bool>,
    served: Mutex<i64>,
    /// Whether the service window currently admits new reservations
    /// (spec §4.1 "Service window"). Always `true` when no
    /// `service_start` is configured.
    service_open: Mutex<bool>,
    window: Mutex<WindowSchedule>,
}

impl<C: Clock> NodeController<C> {
    pub fn new(config: NodeConfig, clock: C, telemetry: Arc<dyn fabric_adapters::Telemetry>) -> Self {
        let dest_path = config.dest_path.clone();
        let slots = (1..=config.num_cpus)
            .map(|id| {
                let port = config.node_ports.get(id as usize).copied().unwrap_or(0);
                ServerSlot::new(
                    SlotId(id),
                    port,
                    format!("{}_server-{}", config.name, id),
                    dest_path.join(format!("server-{id}.pid")),
                )
            })
            .collect();
        let serve_count = config.serve_count;
        let service_open = config.service_start.is_none();
        let window = WindowSchedule::new(&config, clock.epoch_secs());
        Self {
            config,
            node_auth: AuthToken::generate(),
            clock,
            telemetry,
            slots: Mutex::new(slots),
            reservation: Mutex::new(None),
            discovery_enabled: Mutex::new(true),
            served: Mutex::new(serve_count),
            service_open: Mutex::new(service_open),
            window: Mutex::new(window),
        }
    }

    pub fn node_auth(&self) -> AuthToken {
        self.node_auth
    }

    /// `free = |{slot : slot.task = None}|` (spec §4.1).
    pub fn free_cpus(&self) -> u32 {
        self.slots.lock().iter().filter(|s| s.is_idle()).count() as u32
    }

    fn reservation_auth_matches(&self, auth: AuthToken) -> bool {
        self.reservation.lock().as_ref().is_some_and(|r| r.reservation.auth == auth)
    }

    /// The single entry point for every scheduler/admin/worker message.
    /// Synchronous and effect-returning (see [`ControllerEffect`]) so the
    /// reservation state machine is testable without a runtime.
    pub fn handle_request(&self, req: NodeRequest) -> (NodeResponse, Vec<ControllerEffect>) {
        match req {
            NodeRequest::DispycosNodeInfo => (self.node_info(), vec![]),
            NodeRequest::Reserve { cpus, pulse_interval_secs, status_location, client_location, abandon_zombie } => {
                self.handle_reserve(cpus, pulse_interval_secs, status_location, client_location, abandon_zombie)
            }
            NodeRequest::Client { auth, client_payload, setup_args } => {
                self.handle_client(auth, client_payload, setup_args)
            }
            NodeRequest::Release { auth, terminate, restart, setup_args } => {
                self.handle_release(auth, terminate, restart, setup_args)
            }
            NodeRequest::Close { auth } => self.handle_admin_close(auth, false),
            NodeRequest::Quit { auth } => self.handle_admin_close(auth, false),
            NodeRequest::Terminate { auth } => self.handle_admin_close(auth, true),
            NodeRequest::CloseServer { auth, slot, terminate, restart } => {
                self.handle_close_server(auth, slot, terminate, restart)
            }
            NodeRequest::AbandonZombie { auth, flag } => self.handle_abandon_zombie(auth, flag),
            NodeRequest::ServerTask { auth, slot, iid, pid, alive } => {
                self.handle_server_task(auth, slot, iid, pid, alive)
            }
            NodeRequest::Status { auth } => self.handle_status(auth),
        }
    }

    fn node_info(&self) -> NodeResponse {
        let avail_info = self.telemetry.sample().unwrap_or(AvailInfo {
            cpu_percent: 0.0,
            memory_free_bytes: 0,
            disk_free_bytes: 0,
            swap_percent: 0.0,
        });
        NodeResponse::NodeInfo(NodeInfo {
            name: self.config.name.clone(),
            addr: format!("0.0.0.0:{}", self.config.node_ports.first().copied().unwrap_or(0)),
            cpus: self.config.num_cpus,
            platform: std::env::consts::OS.to_string(),
            avail_info,
        })
    }

    fn handle_reserve(
        &self,
        cpus: u32,
        pulse_interval_secs: u64,
        status_location: String,
        client_location: String,
        abandon_zombie: bool,
    ) -> (NodeResponse, Vec<ControllerEffect>) {
        let refused = (NodeResponse::Reserved { cpus: 0, auth: None }, vec![]);

        if !*self.service_open.lock() {
            return refused;
        }
        if !*self.discovery_enabled.lock() {
            return refused;
        }
        if self.reservation.lock().is_some() {
            // I1: at most one reservation active.
            return refused;
        }
        let free = self.free_cpus();
        if cpus == 0 || cpus > free {
            return refused;
        }
        let interval = pulse_interval_secs
            .clamp(self.config.min_pulse_interval_secs, self.config.max_pulse_interval_secs);

        let auth = AuthToken::generate();
        let reservation = Reservation {
            auth,
            scheduler_location: status_location,
            client_location,
            cpus_reserved: Vec::new(),
            interval_secs: interval,
            abandon_zombie,
            served: 0,
        };
        *self.reservation.lock() =
            Some(ActiveReservation { reservation, restart_servers: false, consecutive_pulse_failures: 0 });
        *self.discovery_enabled.lock() = false;

        tracing::info!(cpus, auth = %auth, "reservation granted");
        (NodeResponse::Reserved { cpus, auth: Some(auth) }, vec![])
    }

    fn handle_client(
        &self,
        auth: AuthToken,
        client_payload: Vec<u8>,
        setup_args: Vec<String>,
    ) -> (NodeResponse, Vec<ControllerEffect>) {
        if !self.reservation_auth_matches(auth) {
            return (NodeResponse::Error { message: "auth mismatch".into() }, vec![]);
        }
        let free_slots: Vec<SlotId> = {
            let slots = self.slots.lock();
            slots.iter().filter(|s| s.is_idle()).map(|s| s.id).collect()
        };
        let scheduler_location = {
            let mut reservation = self.reservation.lock();
            let Some(active) = reservation.as_mut() else {
                return (NodeResponse::Error { message: "no active reservation".into() }, vec![]);
            };
            active.reservation.cpus_reserved = free_slots.clone();
            active.reservation.scheduler_location.clone()
        };
        tracing::info!(auth = %auth, slots = free_slots.len(), "client accepted, launching spawner");
        (
            NodeResponse::ClientAck { cpus: free_slots.len() as u32 },
            vec![
                ControllerEffect::PersistClientPayload { auth, bytes: client_payload },
                ControllerEffect::LaunchSpawner { auth, slots: free_slots, scheduler_location, setup_args },
            ],
        )
    }

    fn handle_release(
        &self,
        auth: AuthToken,
        terminate: bool,
        restart: bool,
        setup_args: Vec<String>,
    ) -> (NodeResponse, Vec<ControllerEffect>) {
        if !self.reservation_auth_matches(auth) {
            return (NodeResponse::Error { message: "auth mismatch".into() }, vec![]);
        }
        let (reserved_slots, serve_count_exhausted) = self.teardown_reservation();
        let mut effects = vec![
            ControllerEffect::SendToSpawner(fabric_wire::SpawnerCommand::Quit),
            ControllerEffect::RemoveClientPayload,
        ];
        if terminate {
            effects.push(ControllerEffect::TerminateSpawner);
        }
        if serve_count_exhausted {
            tracing::info!("bounded serve_count reached 0, shutting node down");
            effects.push(ControllerEffect::ShutdownNode);
        }
        if restart {
            let auth = AuthToken::generate();
            let reservation = Reservation {
                auth,
                scheduler_location: String::new(),
                client_location: String::new(),
                cpus_reserved: reserved_slots,
                interval_secs: self.config.max_pulse_interval_secs,
                abandon_zombie: false,
                served: 0,
            };
            *self.reservation.lock() =
                Some(ActiveReservation { reservation, restart_servers: false, consecutive_pulse_failures: 0 });
            effects.push(ControllerEffect::LaunchSpawner {
                auth,
                slots: self.slots.lock().iter().map(|s| s.id).collect(),
                scheduler_location: String::new(),
                setup_args,
            });
        }
        (NodeResponse::Ok, effects)
    }

    /// Clears the reservation and every slot's task, returning the set
    /// of slots that had been reserved (spec §4.5 cleanup) and whether
    /// this release just exhausted a bounded `serve_count` (spec §4.1
    /// "Service-count policy": reaching 0 closes the node). Unlimited
    /// (`-1`) never exhausts, since the decrement guard below never runs.
    fn teardown_reservation(&self) -> (Vec<SlotId>, bool) {
        let reserved = self
            .reservation
            .lock()
            .take()
            .map(|a| a.reservation.cpus_reserved)
            .unwrap_or_default();
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if reserved.contains(&slot.id) {
                slot.task = None;
                slot.busy_time.reset();
            }
        }
        *self.discovery_enabled.lock() = true;
        let mut served = self.served.lock();
        if *served > 0 {
            *served -= 1;
        }
        let exhausted = *served == 0;
        (reserved, exhausted)
    }

    fn handle_admin_close(&self, auth: AuthToken, terminate: bool) -> (NodeResponse, Vec<ControllerEffect>) {
        if auth != self.node_auth {
            return (NodeResponse::Error { message: "auth mismatch".into() }, vec![]);
        }
        let _ = self.teardown_reservation();
        let mut effects = vec![ControllerEffect::RemoveClientPayload];
        if terminate {
            effects.push(ControllerEffect::TerminateSpawner);
        } else {
            effects.push(ControllerEffect::SendToSpawner(fabric_wire::SpawnerCommand::Quit));
        }
        effects.push(ControllerEffect::ShutdownNode);
        (NodeResponse::Ok, effects)
    }

    fn handle_close_server(
        &self,
        auth: AuthToken,
        slot: SlotId,
        terminate: bool,
        restart: bool,
    ) -> (NodeResponse, Vec<ControllerEffect>) {
        if !self.reservation_auth_matches(auth) {
            return (NodeResponse::Error { message: "auth mismatch".into() }, vec![]);
        }
        // slot == 0 is the spawner-wide restart-policy sentinel (spec §4.3 step 5).
        if slot.0 == 0 {
            if let Some(active) = self.reservation.lock().as_mut() {
                active.restart_servers = restart;
            }
            return (NodeResponse::Ok, vec![ControllerEffect::SendToSpawner(
                fabric_wire::SpawnerCommand::CloseServer { slot, terminate, restart },
            )]);
        }
        if !self.slots.lock().iter().any(|s| s.id == slot) {
            return (NodeResponse::Error { message: format!("unknown slot {slot:?}") }, vec![]);
        }
        (
            NodeResponse::Ok,
            vec![ControllerEffect::SendToSpawner(fabric_wire::SpawnerCommand::CloseServer {
                slot,
                terminate,
                restart,
            })],
        )
    }

    fn handle_abandon_zombie(&self, auth: AuthToken, flag: bool) -> (NodeResponse, Vec<ControllerEffect>) {
        if !self.reservation_auth_matches(auth) {
            return (NodeResponse::Error { message: "auth mismatch".into() }, vec![]);
        }
        if let Some(active) = self.reservation.lock().as_mut() {
            active.reservation.abandon_zombie = flag;
        }
        (NodeResponse::Ok, vec![])
    }

    /// Worker registration/unregistration (spec §4.3 step 4, §4.4 step 2,
    /// I4: messages whose `iid` mismatches the slot's current `iid` are
    /// dropped). `auth: None` is only valid for the bootstrap handshake
    /// before the worker has learned the reservation token.
    fn handle_server_task(
        &self,
        auth: Option<AuthToken>,
        slot_id: SlotId,
        iid: InstanceId,
        pid: u32,
        alive: bool,
    ) -> (NodeResponse, Vec<ControllerEffect>) {
        if let Some(auth) = auth {
            if !self.reservation_auth_matches(auth) {
                return (NodeResponse::Error { message: "auth mismatch".into() }, vec![]);
            }
        }
        let mut slots = self.slots.lock();
        let Some(slot) = slots.iter_mut().find(|s| s.id == slot_id) else {
            return (NodeResponse::Error { message: format!("unknown slot {slot_id:?}") }, vec![]);
        };
        if iid != slot.iid {
            tracing::debug!(?slot_id, expected = ?slot.iid, got = ?iid, "dropping server_task with stale iid");
            return (NodeResponse::Ok, vec![]);
        }
        if alive {
            slot.task = Some(fabric_core::WorkerEndpoint { slot: slot_id, iid, pid });
            slot.busy_time = BusyTimeCell::new(self.clock.epoch_secs());
            tracing::info!(?slot_id, pid, "worker registered");
        } else {
            slot.task = None;
            slot.busy_time.reset();
            tracing::info!(?slot_id, pid, "worker unregistered");
        }
        (NodeResponse::Ok, vec![])
    }

    fn handle_status(&self, auth: AuthToken) -> (NodeResponse, Vec<ControllerEffect>) {
        if !self.reservation_auth_matches(auth) {
            return (NodeResponse::Error { message: "auth mismatch".into() }, vec![]);
        }
        let servers = self.slots.lock().iter().filter(|s| s.task.is_some()).map(|s| s.id).collect();
        (NodeResponse::Status { auth, servers }, vec![])
    }

    /// Advance a slot to the next `iid` for a respawn, so a late message
    /// carrying the old instance id is recognized as stale and dropped.
    /// Used by the spawner-supervision path when it decides to respawn
    /// a slot.
    pub fn bump_slot_iid(&self, slot_id: SlotId) -> Option<InstanceId> {
        let mut slots = self.slots.lock();
        let slot = slots.iter_mut().find(|s| s.id == slot_id)?;
        slot.iid = slot.iid.next();
        Some(slot.iid)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn active_reservation(&self) -> Option<Reservation> {
        self.reservation.lock().as_ref().map(|a| a.reservation.clone())
    }

    pub fn restart_servers_policy(&self) -> bool {
        self.reservation.lock().as_ref().is_some_and(|a| a.restart_servers)
    }

    pub fn record_pulse_result(&self, delivered: bool) -> u32 {
        let mut reservation = self.reservation.lock();
        let Some(active) = reservation.as_mut() else { return 0 };
        if delivered {
            active.consecutive_pulse_failures = 0;
        } else {
            active.consecutive_pulse_failures += 1;
        }
        active.consecutive_pulse_failures
    }

    pub fn slot_busy_time(&self, slot_id: SlotId) -> Option<u64> {
        self.slots.lock().iter().find(|s| s.id == slot_id).map(|s| s.busy_time.get())
    }

    pub fn reserved_slots(&self) -> Vec<SlotId> {
        self.reservation.lock().as_ref().map(|a| a.reservation.cpus_reserved.clone()).unwrap_or_default()
    }

    /// `(id, port, name)` for each requested slot, in the order given —
    /// what `LaunchSpawner` hands the spawner process on its argv so it
    /// knows which port and name each worker binds under.
    pub fn slot_endpoints(&self, ids: &[SlotId]) -> Vec<(SlotId, u16, String)> {
        let slots = self.slots.lock();
        ids.iter()
            .filter_map(|id| slots.iter().find(|s| s.id == *id).map(|s| (s.id, s.port, s.name.clone())))
            .collect()
    }

    pub fn set_discovery_enabled(&self, enabled: bool) {
        *self.discovery_enabled.lock() = enabled;
    }

    pub fn discovery_enabled(&self) -> bool {
        *self.discovery_enabled.lock()
    }

    /// Whether the service window currently admits new reservations.
    pub fn service_open(&self) -> bool {
        *self.service_open.lock()
    }

    pub fn set_service_open(&self, open: bool) {
        *self.service_open.lock() = open;
    }

    pub(crate) fn window_schedule(&self) -> WindowSchedule {
        *self.window.lock()
    }

    pub(crate) fn set_window_schedule(&self, schedule: WindowSchedule) {
        *self.window.lock() = schedule;
    }

    pub fn telemetry(&self) -> &Arc<dyn fabric_adapters::Telemetry> {
        &self.telemetry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_adapters::NullTelemetry;
    use fabric_core::FakeClock;

    fn test_config(num_cpus: u32) -> NodeConfig {
        let mut ports = vec![9700u16];
        ports.extend((1..=num_cpus).map(|i| 9700 + i as u16));
        NodeConfig {
            num_cpus,
            node_ports: ports,
            udp_port: 9701,
            name: "test-node".into(),
            dest_path: std::env::temp_dir(),
            certfile: None,
            keyfile: None,
            msg_timeout_secs: 5,
            min_pulse_interval_secs: 5,
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
        }
    }

    fn controller(num_cpus: u32) -> NodeController<FakeClock> {
        NodeController::new(test_config(num_cpus), FakeClock::new(), Arc::new(NullTelemetry))
    }

    #[test]
    fn reserve_grants_when_idle_and_within_capacity() {
        let ctl = controller(4);
        let (resp, _) = ctl.handle_request(NodeRequest::Reserve {
            cpus: 2,
            pulse_interval_secs: 7,
            status_location: "s".into(),
            client_location: "c".into(),
            abandon_zombie: false,
        });
        match resp {
            NodeResponse::Reserved { cpus, auth } => {
                assert_eq!(cpus, 2);
                assert!(auth.is_some());
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn second_reserve_while_busy_is_refused() {
        let ctl = controller(4);
        ctl.handle_request(NodeRequest::Reserve {
            cpus: 2,
            pulse_interval_secs: 7,
            status_location: "s".into(),
            client_location: "c".into(),
            abandon_zombie: false,
        });
        let (resp, _) = ctl.handle_request(NodeRequest::Reserve {
            cpus: 1,
            pulse_interval_secs: 7,
            status_location: "s2".into(),
            client_location: "c2".into(),
            abandon_zombie: false,
        });
        assert_eq!(resp, NodeResponse::Reserved { cpus: 0, auth: None });
    }

    #[test]
    fn reserve_more_than_free_cpus_is_refused() {
        let ctl = controller(2);
        let (resp, _) = ctl.handle_request(NodeRequest::Reserve {
            cpus: 3,
            pulse_interval_secs: 7,
            status_location: "s".into(),
            client_location: "c".into(),
            abandon_zombie: false,
        });
        assert_eq!(resp, NodeResponse::Reserved { cpus: 0, auth: None });
    }

    #[test]
    fn client_with_wrong_auth_is_rejected() {
        let ctl = controller(4);
        let (resp, effects) = ctl.handle_request(NodeRequest::Client {
            auth: AuthToken::generate(),
            client_payload: vec![],
            setup_args: vec![],
        });
        assert!(matches!(resp, NodeResponse::Error { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn client_after_reserve_launches_spawner() {
        let ctl = controller(4);
        let (reserved, _) = ctl.handle_request(NodeRequest::Reserve {
            cpus: 2,
            pulse_interval_secs: 7,
            status_location: "s".into(),
            client_location: "c".into(),
            abandon_zombie: false,
        });
        let NodeResponse::Reserved { auth: Some(auth), .. } = reserved else { panic!("expected grant") };
        let (resp, effects) =
            ctl.handle_request(NodeRequest::Client { auth, client_payload: b"blob".to_vec(), setup_args: vec![] });
        assert_eq!(resp, NodeResponse::ClientAck { cpus: 2 });
        assert!(effects.iter().any(|e| matches!(e, ControllerEffect::LaunchSpawner { .. })));
    }

    #[test]
    fn release_returns_node_to_idle() {
        let ctl = controller(4);
        let (reserved, _) = ctl.handle_request(NodeRequest::Reserve {
            cpus: 2,
            pulse_interval_secs: 7,
            status_location: "s".into(),
            client_location: "c".into(),
            abandon_zombie: false,
        });
        let NodeResponse::Reserved { auth: Some(auth), .. } = reserved else { panic!("expected grant") };
        ctl.handle_request(NodeRequest::Client { auth, client_payload: vec![], setup_args: vec![] });
        ctl.handle_request(NodeRequest::ServerTask { auth: Some(auth), slot: SlotId(1), iid: InstanceId::INITIAL, pid: 111, alive: true });

        let (resp, _) = ctl.handle_request(NodeRequest::Release { auth, terminate: false, restart: false, setup_args: vec![] });
        assert_eq!(resp, NodeResponse::Ok);
        assert_eq!(ctl.free_cpus(), 4);
        assert!(ctl.active_reservation().is_none());
    }

    #[test]
    fn server_task_with_stale_iid_is_dropped() {
        let ctl = controller(4);
        let (reserved, _) = ctl.handle_request(NodeRequest::Reserve {
            cpus: 1,
            pulse_interval_secs: 7,
            status_location: "s".into(),
            client_location: "c".into(),
            abandon_zombie: false,
        });
        let NodeResponse::Reserved { auth: Some(auth), .. } = reserved else { panic!("expected grant") };
        ctl.bump_slot_iid(SlotId(1));
        let (resp, _) = ctl.handle_request(NodeRequest::ServerTask {
            auth: Some(auth),
            slot: SlotId(1),
            iid: InstanceId::INITIAL,
            pid: 1,
            alive: true,
        });
        assert_eq!(resp, NodeResponse::Ok);
        assert!(ctl.slots.lock().iter().find(|s| s.id == SlotId(1)).unwrap().task.is_none());
    }

    #[test]
    fn close_server_zero_updates_restart_policy() {
        let ctl = controller(4);
        let (reserved, _) = ctl.handle_request(NodeRequest::Reserve {
            cpus: 1,
            pulse_interval_secs: 7,
            status_location: "s".into(),
            client_location: "c".into(),
            abandon_zombie: false,
        });
        let NodeResponse::Reserved { auth: Some(auth), .. } = reserved else { panic!("expected grant") };
        ctl.handle_request(NodeRequest::CloseServer { auth, slot: SlotId(0), terminate: false, restart: true });
        assert!(ctl.restart_servers_policy());
    }

    #[test]
    fn admin_close_requires_node_auth_not_reservation_auth() {
        let ctl = controller(4);
        let (reserved, _) = ctl.handle_request(NodeRequest::Reserve {
            cpus: 1,
            pulse_interval_secs: 7,
            status_location: "s".into(),
            client_location: "c".into(),
            abandon_zombie: false,
        });
        let NodeResponse::Reserved { auth: Some(auth), .. } = reserved else { panic!("expected grant") };
        let (resp, _) = ctl.handle_request(NodeRequest::Close { auth });
        assert!(matches!(resp, NodeResponse::Error { .. }));
        let (resp, _) = ctl.handle_request(NodeRequest::Close { auth: ctl.node_auth() });
        assert_eq!(resp, NodeResponse::Ok);
    }

    #[test]
    fn release_shuts_down_once_bounded_serve_count_is_exhausted() {
        let mut config = test_config(2);
        config.serve_count = 1;
        let ctl = NodeController::new(config, FakeClock::new(), Arc::new(NullTelemetry));
        let (reserved, _) = ctl.handle_request(NodeRequest::Reserve {
            cpus: 1,
            pulse_interval_secs: 7,
            status_location: "s".into(),
            client_location: "c".into(),
            abandon_zombie: false,
        });
        let NodeResponse::Reserved { auth: Some(auth), .. } = reserved else { panic!("expected grant") };
        let (_, effects) = ctl.handle_request(NodeRequest::Release { auth, terminate: false, restart: false, setup_args: vec![] });
        assert!(effects.iter().any(|e| matches!(e, ControllerEffect::ShutdownNode)));
    }

    #[test]
    fn release_with_unlimited_serve_count_never_shuts_down() {
        let ctl = controller(2);
        let (reserved, _) = ctl.handle_request(NodeRequest::Reserve {
            cpus: 1,
            pulse_interval_secs: 7,
            status_location: "s".into(),
            client_location: "c".into(),
            abandon_zombie: false,
        });
        let NodeResponse::Reserved { auth: Some(auth), .. } = reserved else { panic!("expected grant") };
        let (_, effects) = ctl.handle_request(NodeRequest::Release { auth, terminate: false, restart: false, setup_args: vec![] });
        assert!(!effects.iter().any(|e| matches!(e, ControllerEffect::ShutdownNode)));
    }
}
