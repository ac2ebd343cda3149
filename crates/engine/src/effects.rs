// SPDX-License-Identifier: MIT

//! Side effects the node controller requests but does not perform
//! itself. Keeping `NodeController::handle_request` synchronous and
//! side-effect-free (besides updating its own state) makes the
//! reservation state machine directly unit- and property-testable; the
//! daemon event loop is what actually spawns processes and talks to the
//! messaging fabric.

use fabric_core::{AuthToken, SlotId};
use fabric_wire::SpawnerCommand;

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEffect {
    /// Persist the client's payload to `<dest_path>/dispycos_client`
    /// before the spawner is launched (spec §4.3 step 1).
    PersistClientPayload { auth: AuthToken, bytes: Vec<u8> },
    /// Launch the spawner subprocess with the given slot list. Carries
    /// the scheduler's status location so it can be threaded down to
    /// each worker, which posts its own `ServerStatusEvent`s directly
    /// to the scheduler (spec §5: worker↔scheduler is a direct peer
    /// channel, not brokered through the node).
    LaunchSpawner { auth: AuthToken, slots: Vec<SlotId>, scheduler_location: String, setup_args: Vec<String> },
    /// Forward a command down the node↔spawner duplex pipe.
    SendToSpawner(SpawnerCommand),
    /// Escalate-kill the spawner and every worker it owns.
    TerminateSpawner,
    /// Remove the persisted client payload (spec §4.5, reservation close).
    RemoveClientPayload,
    /// Re-enable peer discovery broadcasts (service window open / ping).
    BroadcastDiscovery,
    /// Stop the node process entirely (quit/terminate/serve_count reached 0).
    ShutdownNode,
}
