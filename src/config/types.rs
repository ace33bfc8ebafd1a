//! # Type store: loads and serves type definition files.
//!
//! Types are addressed as `/<file>#/<Name>`; the file part maps to a
//! document under the types directory, the fragment is a JSON pointer from
//! that document's root. Files are parsed once and cached for process
//! lifetime. Raw loads feed the schema registry's reference resolver (a
//! validator dereferencing a type URI must not recurse into validation);
//! validated loads are what the compiler records in the compiled config.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::error::ConfigError;
use crate::model::document;
use crate::schema::{SchemaKind, SchemaRegistry};

/// Cache of parsed type definition files, keyed by their `/file` part.
#[derive(Debug)]
pub struct TypeStore {
    dir: PathBuf,
    docs: RwLock<HashMap<String, Arc<Value>>>,
    validated: RwLock<HashSet<String>>,
}

impl TypeStore {
    /// Creates an empty store over the given types directory.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            docs: RwLock::new(HashMap::new()),
            validated: RwLock::new(HashSet::new()),
        }
    }

    /// Loads and caches the type file for `file` (e.g. `/test_type`)
    /// without schema validation.
    pub fn load_raw(&self, file: &str) -> Result<Arc<Value>, ConfigError> {
        if let Some(doc) = self.docs.read().expect("type cache poisoned").get(file) {
            return Ok(Arc::clone(doc));
        }

        let stem = file.trim_start_matches('/');
        let path = document::find_document(&self.dir, stem).ok_or_else(|| {
            ConfigError::Document {
                path: self.dir.join(stem),
                message: "type definition file not found".into(),
            }
        })?;
        let doc = document::load_document(&path).map_err(|e| ConfigError::Document {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let doc = Arc::new(doc);
        self.docs
            .write()
            .expect("type cache poisoned")
            .insert(file.to_string(), Arc::clone(&doc));
        Ok(doc)
    }

    /// Loads the type file and validates it against the type schema once.
    pub fn load_validated(
        &self,
        file: &str,
        registry: &SchemaRegistry,
    ) -> Result<Arc<Value>, ConfigError> {
        let doc = self.load_raw(file)?;
        if !self.validated.read().expect("type cache poisoned").contains(file) {
            registry.validate(&doc, SchemaKind::Type, file)?;
            self.validated
                .write()
                .expect("type cache poisoned")
                .insert(file.to_string());
        }
        Ok(doc)
    }

    /// Resolves a full type URI to its definition node, if loaded.
    pub fn lookup(&self, uri: &str) -> Option<Value> {
        let (file, name) = crate::schema::split_type_uri(uri)?;
        let docs = self.docs.read().expect("type cache poisoned");
        docs.get(file)?.pointer(&format!("/{name}")).cloned()
    }
}
