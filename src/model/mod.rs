//! # Data model shared across the compiler and the supervisor.
//!
//! - [`document`]: dynamic tree loading (YAML default, JSON legacy).
//! - [`ConfigEntry`]: the scalar sum type config values narrow into.
//! - [`Mapping`] / [`ModuleTierMappings`]: (evse, connector) coordinates.
//! - [`TelemetryConfig`]: optional per-instance telemetry entry.

pub mod document;

mod entry;
mod mapping;
mod telemetry;

pub use entry::ConfigEntry;
pub use mapping::{Mapping, ModuleTierMappings};
pub use telemetry::TelemetryConfig;

pub(crate) use mapping::parse_instance_mappings;
pub(crate) use telemetry::parse_instance_telemetry;
