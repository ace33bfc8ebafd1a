//! Loading of tree-shaped documents.
//!
//! Deployment, manifest, interface, type and error-declaration documents are
//! all handled as one dynamic tree ([`serde_json::Value`]) with validated
//! projections. Files are content-sniffed by extension: `.json` parses as
//! JSON (the legacy format), everything else as YAML.

use std::fs;
use std::path::Path;

use serde_json::Value;

/// Why a document could not be loaded.
#[derive(Debug)]
pub enum LoadError {
    /// The file could not be read.
    Io(std::io::Error),
    /// The content is not valid YAML/JSON.
    Parse(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "{e}"),
            LoadError::Parse(msg) => write!(f, "{msg}"),
        }
    }
}

/// Loads a document from `path`, sniffing the format by extension.
///
/// An empty file parses as `null`, matching the YAML empty-document rule.
pub fn load_document(path: &Path) -> Result<Value, LoadError> {
    let content = fs::read_to_string(path).map_err(LoadError::Io)?;
    parse_document(&content, is_json(path))
}

/// Parses `content` as JSON or YAML into a dynamic tree.
pub fn parse_document(content: &str, json: bool) -> Result<Value, LoadError> {
    if content.trim().is_empty() {
        return Ok(Value::Null);
    }
    if json {
        serde_json::from_str(content).map_err(|e| LoadError::Parse(e.to_string()))
    } else {
        serde_yaml::from_str(content).map_err(|e| LoadError::Parse(e.to_string()))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

/// Finds `<dir>/<stem>.yaml`, falling back to the legacy `.json` spelling.
pub fn find_document(dir: &Path, stem: &str) -> Option<std::path::PathBuf> {
    for ext in ["yaml", "json"] {
        let candidate = dir.join(format!("{stem}.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Short kind name of a JSON value, for error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    }
}
