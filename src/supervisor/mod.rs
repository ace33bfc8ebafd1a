//! # Module supervisor: spawn, readiness, teardown.
//!
//! The supervisor takes the compiled config's instance list and turns it
//! into a live worker fleet, then enforces the all-or-nothing liveness
//! policy over it.
//!
//! ## Architecture
//! ```text
//! CompiledConfig ──► Fleet::start()
//!                        │
//!                        ├──► ReadyTracker::register() per instance
//!                        │        └──► bus handler ──► barrier under mutex
//!                        │
//!                        ├──► artifact::probe() ──► spawn::spawn_worker()
//!                        │        └──► pre_exec: pdeathsig → caps → identity
//!                        │
//!                        └──► Fleet::supervise()
//!                              ├──► OS signal ──► teardown, clean exit
//!                              ├──► bus lost  ──► teardown, failure exit
//!                              └──► any child exit ──► teardown, failure exit
//!
//! teardown: unregister ready handlers (before clearing, under the mutex)
//!           → SIGTERM all → grace wait → SIGKILL stragglers
//! ```
//!
//! ## Rules
//! - The live-workers map and the ready-info map share one mutex
//!   ([`FleetState`]); the supervision future and the bus event loop are the
//!   only writers.
//! - Standalone instances are registered for readiness but never spawned.
//! - Ready flags are monotonic: a flag never goes back from true to false.

mod artifact;
mod fleet;
mod privileges;
mod ready;
mod spawn;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::bus::HandlerToken;

pub use artifact::{probe, Artifact, ArtifactKind};
pub use fleet::Fleet;
pub use privileges::{resolve_capabilities, ResolvedUser};
#[cfg(unix)]
pub use privileges::{
    apply_identity, drop_privileges, keep_caps, resolve_user, set_ambient_caps,
};
pub use ready::ReadyTracker;

/// Readiness record of one instance.
#[derive(Default)]
pub(crate) struct ReadyInfo {
    pub(crate) ready: bool,
    pub(crate) token: Option<HandlerToken>,
}

/// State shared between the supervision future and the bus handlers.
///
/// One mutex guards both maps so the teardown path can unregister handlers
/// and clear readiness without a ready handler interleaving.
#[derive(Default)]
pub(crate) struct FleetState {
    /// Live workers, keyed by OS process id.
    pub(crate) workers: HashMap<i32, String>,
    /// Readiness per registered instance.
    pub(crate) ready: HashMap<String, ReadyInfo>,
    /// Latched once the global ready signal has been published.
    pub(crate) barrier_fired: bool,
    /// Latched once the waiting-for-standalone state has been reported.
    pub(crate) waiting_reported: bool,
}

pub(crate) type SharedState = Arc<Mutex<FleetState>>;
