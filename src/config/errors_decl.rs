//! # Error declarations and their reference grammar.
//!
//! Error-declaration-list files live in the errors directory; each declares
//! a set of `{name, description}` entries, namespaced by the file they live
//! in. Manifests and interfaces reference errors in one of three shapes:
//!
//! - `file#Name`: a single named error,
//! - `file#/errors/Name`: identical semantics, tolerated for schema
//!   uniformity,
//! - `file`: every error declared in that file.
//!
//! Files are parsed and validated once, then cached for process lifetime.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::Value;

use crate::error::{ConfigError, InterfaceError};
use crate::model::document;
use crate::schema::{SchemaKind, SchemaRegistry};

/// One declared error: namespace (the declaring file), name, description.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ErrorDeclaration {
    pub namespace: String,
    pub name: String,
    pub description: String,
}

impl ErrorDeclaration {
    /// Fully qualified error type name (`namespace/Name`).
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Cache of error-declaration-list files.
pub struct ErrorStore {
    dir: PathBuf,
    registry: Arc<SchemaRegistry>,
    files: RwLock<HashMap<String, Arc<Vec<ErrorDeclaration>>>>,
}

impl ErrorStore {
    pub fn new(dir: PathBuf, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            dir,
            registry,
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves a reference to the list of error declarations it names.
    ///
    /// A reference that points at a nonexistent file or error name yields
    /// [`InterfaceError::UnknownErrorRef`]; an unreadable or invalid file is
    /// a document/schema error.
    pub fn resolve_ref(&self, reference: &str) -> Result<Vec<ErrorDeclaration>, ConfigError> {
        let (file, name) = match reference.split_once('#') {
            None => (reference, None),
            Some((file, fragment)) => {
                let name = fragment.strip_prefix("/errors/").unwrap_or(fragment);
                (file, Some(name))
            }
        };
        if file.is_empty() || name.is_some_and(str::is_empty) {
            return Err(InterfaceError::UnknownErrorRef {
                reference: reference.into(),
            }
            .into());
        }

        let declarations = self.load_file(file, reference)?;
        match name {
            None => Ok(declarations.as_ref().clone()),
            Some(name) => declarations
                .iter()
                .find(|d| d.name == name)
                .cloned()
                .map(|d| vec![d])
                .ok_or_else(|| {
                    InterfaceError::UnknownErrorRef {
                        reference: reference.into(),
                    }
                    .into()
                }),
        }
    }

    fn load_file(
        &self,
        file: &str,
        reference: &str,
    ) -> Result<Arc<Vec<ErrorDeclaration>>, ConfigError> {
        if let Some(cached) = self.files.read().expect("error cache poisoned").get(file) {
            return Ok(Arc::clone(cached));
        }

        let path = document::find_document(&self.dir, file).ok_or_else(|| {
            ConfigError::from(InterfaceError::UnknownErrorRef {
                reference: reference.into(),
            })
        })?;
        let doc = document::load_document(&path).map_err(|e| ConfigError::Document {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let duration =
            self.registry
                .validate(&doc, SchemaKind::ErrorDeclarationList, &path.display().to_string())?;
        tracing::debug!(file, ?duration, "validated error declaration list");

        let declarations: Vec<ErrorDeclaration> = doc
            .get("errors")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| {
                        Some(ErrorDeclaration {
                            namespace: file.to_string(),
                            name: e.get("name")?.as_str()?.to_string(),
                            description: e
                                .get("description")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let declarations = Arc::new(declarations);
        self.files
            .write()
            .expect("error cache poisoned")
            .insert(file.to_string(), Arc::clone(&declarations));
        Ok(declarations)
    }
}
