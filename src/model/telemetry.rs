//! Per-instance telemetry configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Telemetry settings of one module instance, when configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Grouping id under which the instance's telemetry is published.
    pub id: i64,
}

/// Extracts the telemetry block of one instance entry, if any.
pub(crate) fn parse_instance_telemetry(entry: &Value) -> Option<TelemetryConfig> {
    let id = entry.get("telemetry")?.get("id")?.as_i64()?;
    Some(TelemetryConfig { id })
}
