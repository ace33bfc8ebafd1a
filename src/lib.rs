//! # chargevisor
//!
//! **Chargevisor** is the control plane of a modular, message-bus-based
//! runtime for EV charging infrastructure. A single manager process
//! compiles a declarative deployment description into a fully linked
//! configuration graph, spawns one worker process per module instance with
//! a language-appropriate environment and dropped privileges, and gates the
//! fleet behind a distributed readiness barrier coordinated over MQTT.
//!
//! ## Areas
//!
//! | Area              | Description                                                      | Key types                                   |
//! |-------------------|------------------------------------------------------------------|---------------------------------------------|
//! | **Compiler**      | Manifests, interfaces, types and errors linked into one graph.   | [`Compiler`], [`CompiledConfig`]            |
//! | **Schemas**       | The five fixed schemas and their reference-resolving validator.  | [`SchemaRegistry`], [`SchemaKind`]          |
//! | **Settings**      | Prefix-derived layout, override merging, bus endpoint.           | [`Settings`], [`Overrides`]                 |
//! | **Supervision**   | Artifact probing, spawn, readiness barrier, fleet teardown.      | [`Fleet`], [`ReadyTracker`], [`Artifact`]   |
//! | **Bus**           | Pub/sub access with revocable topic handlers.                    | [`BusClient`], [`MqttBus`], [`LocalBus`]    |
//! | **Errors**        | One typed family per phase, all carrying stable labels.          | [`BootError`], [`ConfigError`], …           |
//!
//! ## Lifecycle
//!
//! ```text
//! deployment.yaml ─► Compiler ─► CompiledConfig ─► Fleet::start()
//!                                                       │
//!                             workers publish <prefix>/<instance>/ready
//!                                                       │
//!                                  barrier ─► <prefix>ready = true
//!                                                       │
//!                        any worker exit ─► teardown ─► manager exits ≠ 0
//! ```
//!
//! The policy is all-or-nothing: there is no per-worker restart. A dead
//! worker takes the fleet down and the manager exits so an external
//! supervisor can restart the whole stack.

pub mod bus;
pub mod config;
pub mod error;
pub mod model;
pub mod schema;
pub mod settings;
pub mod status_fifo;
pub mod supervisor;

// ---- Public re-exports ----

pub use bus::{BusClient, BusHandler, HandlerToken, LocalBus, MqttBus, Qos};
pub use config::{CompiledConfig, Compiler, ErrorDeclaration};
pub use error::{
    ArtifactError, BootError, CompileError, ConfigError, InterfaceError, RuntimeError, SchemaError,
    SuperviseError,
};
pub use model::{ConfigEntry, Mapping, ModuleTierMappings, TelemetryConfig};
pub use schema::{SchemaKind, SchemaRegistry};
pub use settings::{MqttEndpoint, Overrides, Settings};
pub use status_fifo::StatusFifo;
pub use supervisor::{Artifact, ArtifactKind, Fleet, ReadyTracker};
