//! # Error types used by the manager.
//!
//! Each phase of the manager has its own error family:
//!
//! - [`BootError`]: failures before a config graph exists (bad prefix,
//!   unreadable deployment document, bus connect, identity drop).
//! - [`SchemaError`]: a document does not validate against its schema.
//! - [`ConfigError`]: semantic violations in the compiled graph.
//! - [`InterfaceError`]: interface resolver failures (conflicts, cycles,
//!   dangling error references).
//! - [`ArtifactError`]: supervisor-level failures locating or spawning a
//!   worker artifact.
//! - [`RuntimeError`]: failures while the fleet is live.
//!
//! All types provide `as_label()` returning a short stable snake_case label
//! for logs and metrics.
//!
//! Propagation policy: everything raised during the compile phase is fatal
//! and terminates boot ([`CompileError`] folds the two families that can
//! occur there). Errors during supervision are logged and trigger fleet
//! teardown. Errors inside readiness handlers are logged and ignored at the
//! barrier.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised before the configuration graph exists.
///
/// These are terminal: the manager exits non-zero without touching any
/// worker process.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BootError {
    /// The installation prefix does not exist or is not a directory.
    #[error("installation prefix '{}' does not exist or is not a directory", path.display())]
    InvalidPrefix {
        /// The offending prefix path.
        path: PathBuf,
    },
    /// The deployment document could not be found.
    #[error("deployment config '{}' not found", path.display())]
    MissingConfigFile {
        /// The path that was probed.
        path: PathBuf,
    },
    /// A file could not be read.
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A document could not be parsed as YAML or JSON.
    #[error("failed to parse '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },
    /// The deployment document root is not a mapping of module instances.
    #[error("deployment config root must be a mapping of module instances, found {found}")]
    InvalidDeployment {
        /// A short description of what was found instead (e.g. "string").
        found: String,
    },
    /// One of the five fixed schemas failed to load or compile.
    #[error("failed to load schema '{name}': {message}")]
    Schema { name: String, message: String },
    /// The message bus endpoint refused the connection.
    #[error("cannot connect to message bus at {endpoint}: {message}")]
    BusConnect { endpoint: String, message: String },
    /// Dropping to the configured unprivileged identity failed.
    #[error("cannot switch to user '{user}': {message}")]
    IdentityDrop { user: String, message: String },
}

impl BootError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BootError::InvalidPrefix { .. } => "boot_invalid_prefix",
            BootError::MissingConfigFile { .. } => "boot_missing_config_file",
            BootError::Io { .. } => "boot_io",
            BootError::Parse { .. } => "boot_parse",
            BootError::InvalidDeployment { .. } => "boot_invalid_deployment",
            BootError::Schema { .. } => "boot_schema",
            BootError::BusConnect { .. } => "boot_bus_connect",
            BootError::IdentityDrop { .. } => "boot_identity_drop",
        }
    }
}

/// A document failed schema validation.
///
/// Carries the document origin (a path or a synthetic marker like
/// `<deployment>`) and the JSON pointer of the first violation.
#[derive(Error, Debug)]
#[error("'{path}' does not validate at '{pointer}': {message}")]
pub struct SchemaError {
    /// Origin of the offending document.
    pub path: String,
    /// JSON pointer to the violating node.
    pub pointer: String,
    /// Validator message.
    pub message: String,
}

/// Semantic violations in the compiled configuration graph.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A module instance references a module type that is not in the store.
    #[error("module instance '{instance}' references unknown module type '{module_type}'")]
    UnknownModuleType {
        instance: String,
        module_type: String,
    },
    /// An implementation config block names an implementation the manifest
    /// does not declare.
    #[error("module instance '{instance}' configures unknown implementation '{implementation}'")]
    UnknownImplementation {
        instance: String,
        implementation: String,
    },
    /// A required config entry (one without a default) is absent.
    #[error("module instance '{instance}' is missing config entry '{entry}'")]
    MissingConfigEntry { instance: String, entry: String },
    /// A config entry is unknown to the schema or carries the wrong type.
    #[error("module instance '{instance}' has invalid config entry '{entry}': {message}")]
    InvalidConfigEntry {
        instance: String,
        entry: String,
        message: String,
    },
    /// A requirement's connection list violates its `[min, max]` bounds or
    /// points at a provider that does not exist.
    #[error("requirement '{requirement}' of module instance '{instance}' is unsatisfied: {detail}")]
    UnsatisfiedRequirement {
        instance: String,
        requirement: String,
        detail: String,
    },
    /// A connected provider implements a different interface than required.
    #[error(
        "requirement '{requirement}' of module instance '{instance}' needs interface \
         '{expected}' but the connected provider implements '{found}'"
    )]
    InterfaceMismatch {
        instance: String,
        requirement: String,
        expected: String,
        found: String,
    },
    /// An interface named by a manifest has no definition file.
    #[error("interface '{interface}' required by module type '{module_type}' is not defined")]
    MissingInterface {
        interface: String,
        module_type: String,
    },
    /// A manifest, interface, type or error file could not be read or parsed.
    #[error("failed to load '{}': {message}", path.display())]
    Document { path: PathBuf, message: String },
    /// A document failed schema validation.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// The interface resolver failed.
    #[error(transparent)]
    Interface(#[from] InterfaceError),
}

impl ConfigError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::UnknownModuleType { .. } => "config_unknown_module_type",
            ConfigError::UnknownImplementation { .. } => "config_unknown_implementation",
            ConfigError::MissingConfigEntry { .. } => "config_missing_entry",
            ConfigError::InvalidConfigEntry { .. } => "config_invalid_entry",
            ConfigError::UnsatisfiedRequirement { .. } => "config_unsatisfied_requirement",
            ConfigError::InterfaceMismatch { .. } => "config_interface_mismatch",
            ConfigError::MissingInterface { .. } => "config_missing_interface",
            ConfigError::Document { .. } => "config_document",
            ConfigError::Schema(_) => "config_schema",
            ConfigError::Interface(_) => "config_interface",
        }
    }
}

/// Failures while resolving an interface inheritance chain.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum InterfaceError {
    /// A command or variable name is redefined along a parent chain.
    #[error("interface '{interface}' redefines {field} entry '{key}' of its parent chain")]
    Conflict {
        interface: String,
        /// Which merge field clashed: `vars` or `cmds`.
        field: &'static str,
        key: String,
    },
    /// The parent chain loops back onto itself.
    #[error("interface inheritance cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
    /// An error reference does not resolve to any declared error.
    #[error("unknown error reference '{reference}'")]
    UnknownErrorRef { reference: String },
}

impl InterfaceError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            InterfaceError::Conflict { .. } => "interface_conflict",
            InterfaceError::Cycle { .. } => "interface_cycle",
            InterfaceError::UnknownErrorRef { .. } => "interface_unknown_error",
        }
    }
}

/// Supervisor-level failures locating or spawning worker artifacts.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// No artifact was found for the module type.
    #[error(
        "module instance '{instance}' ({module_type}) has no binary, script or python artifact; \
         probed: {}", probed.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
    )]
    Missing {
        instance: String,
        module_type: String,
        /// Every path probed, in probe order.
        probed: Vec<PathBuf>,
    },
    /// The worker process failed before or during `exec`.
    #[error("spawning worker for module instance '{instance}' failed: {message}")]
    SpawnFailed { instance: String, message: String },
    /// A declared capability name is not known on this system.
    #[error("unknown capability '{name}'")]
    CapabilityUnknown { name: String },
}

impl ArtifactError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            ArtifactError::Missing { .. } => "artifact_missing",
            ArtifactError::SpawnFailed { .. } => "artifact_spawn_failed",
            ArtifactError::CapabilityUnknown { .. } => "artifact_capability_unknown",
        }
    }
}

/// Failures while the fleet is live.
///
/// Any of these triggers fleet teardown and a non-zero manager exit so an
/// external supervisor can restart the whole stack.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A live worker exited. The all-or-nothing policy makes this fatal.
    #[error("worker '{instance}' (pid {pid}) exited with status {status}")]
    WorkerExited {
        instance: String,
        pid: i32,
        status: String,
    },
    /// The message bus connection was lost and could not be re-established.
    #[error("message bus disconnected: {message}")]
    BusDisconnected { message: String },
    /// A syscall in the supervision path failed unexpectedly.
    #[error("syscall {call} failed: {message}")]
    Syscall { call: &'static str, message: String },
}

impl RuntimeError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::WorkerExited { .. } => "runtime_worker_exited",
            RuntimeError::BusDisconnected { .. } => "runtime_bus_disconnected",
            RuntimeError::Syscall { .. } => "runtime_syscall",
        }
    }
}

/// Union of the error families that can surface while compiling the
/// configuration graph. Both are fatal at boot.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Boot(#[from] BootError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CompileError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            CompileError::Boot(e) => e.as_label(),
            CompileError::Config(e) => e.as_label(),
        }
    }
}

impl From<SchemaError> for CompileError {
    fn from(e: SchemaError) -> Self {
        CompileError::Config(ConfigError::Schema(e))
    }
}

impl From<InterfaceError> for CompileError {
    fn from(e: InterfaceError) -> Self {
        CompileError::Config(ConfigError::Interface(e))
    }
}

/// Union of the error families that can surface while starting or
/// supervising the worker fleet.
#[derive(Error, Debug)]
pub enum SuperviseError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl SuperviseError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            SuperviseError::Artifact(e) => e.as_label(),
            SuperviseError::Runtime(e) => e.as_label(),
        }
    }
}
