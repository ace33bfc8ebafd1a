//! Tier mappings: the (evse, connector) coordinate of an instance.
//!
//! A module instance may declare a top-level `evse`/`connector` pair, which
//! becomes the default for every implementation; a `mapping` block can
//! override the coordinate per implementation id. No mapping at all means
//! the instance is mapped to the charging-station root.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A two-level charging-station coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    /// EVSE index.
    pub evse: u32,
    /// Connector index within the EVSE, if mapped that deep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector: Option<u32>,
}

/// Tier mappings of one module instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleTierMappings {
    /// Instance-wide default mapping.
    pub module: Option<Mapping>,
    /// Per-implementation overrides.
    pub implementations: HashMap<String, Mapping>,
}

impl ModuleTierMappings {
    /// Resolves the mapping of one implementation: its override if present,
    /// the module default otherwise. `None` means charging-station root.
    pub fn resolve(&self, implementation: &str) -> Option<Mapping> {
        self.implementations
            .get(implementation)
            .copied()
            .or(self.module)
    }
}

fn mapping_from(value: &Value) -> Option<Mapping> {
    let evse = value.get("evse")?.as_u64()? as u32;
    let connector = value
        .get("connector")
        .and_then(Value::as_u64)
        .map(|c| c as u32);
    Some(Mapping { evse, connector })
}

/// Extracts the tier mappings of one instance entry from the deployment
/// document.
pub(crate) fn parse_instance_mappings(entry: &Value) -> ModuleTierMappings {
    let module = entry
        .get("evse")
        .and_then(Value::as_u64)
        .map(|evse| Mapping {
            evse: evse as u32,
            connector: entry
                .get("connector")
                .and_then(Value::as_u64)
                .map(|c| c as u32),
        });

    let mut implementations = HashMap::new();
    if let Some(overrides) = entry.get("mapping").and_then(Value::as_object) {
        for (impl_id, coordinate) in overrides {
            if let Some(mapping) = mapping_from(coordinate) {
                implementations.insert(impl_id.clone(), mapping);
            }
        }
    }

    ModuleTierMappings {
        module,
        implementations,
    }
}
