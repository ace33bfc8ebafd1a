//! Scalar config values.
//!
//! Module and implementation config entries are one of four scalar shapes.
//! Schema validation narrows the shape before the variant is stored, so a
//! successful compile guarantees every entry converts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single validated config entry value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigEntry {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
}

impl ConfigEntry {
    /// Narrows a JSON value into a config entry.
    ///
    /// Whole numbers narrow to `Integer`, other numbers to `Number`.
    /// Non-scalar values return `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(ConfigEntry::Boolean(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(ConfigEntry::Integer(i))
                } else {
                    n.as_f64().map(ConfigEntry::Number)
                }
            }
            Value::String(s) => Some(ConfigEntry::String(s.clone())),
            _ => None,
        }
    }

    /// Name of the variant, matching JSON schema type names.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigEntry::Boolean(_) => "boolean",
            ConfigEntry::Integer(_) => "integer",
            ConfigEntry::Number(_) => "number",
            ConfigEntry::String(_) => "string",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn narrows_scalars() {
        assert_eq!(
            ConfigEntry::from_value(&json!("hi")),
            Some(ConfigEntry::String("hi".into()))
        );
        assert_eq!(
            ConfigEntry::from_value(&json!(true)),
            Some(ConfigEntry::Boolean(true))
        );
        assert_eq!(
            ConfigEntry::from_value(&json!(42)),
            Some(ConfigEntry::Integer(42))
        );
        assert_eq!(
            ConfigEntry::from_value(&json!(2.5)),
            Some(ConfigEntry::Number(2.5))
        );
    }

    #[test]
    fn rejects_composites() {
        assert_eq!(ConfigEntry::from_value(&json!([1, 2])), None);
        assert_eq!(ConfigEntry::from_value(&json!({"a": 1})), None);
        assert_eq!(ConfigEntry::from_value(&Value::Null), None);
    }
}
