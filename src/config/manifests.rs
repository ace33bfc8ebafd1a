//! # Manifest store: discovery and validation of module manifests.
//!
//! Every direct subdirectory of the modules dir is a candidate module type;
//! its manifest lives at `<modules>/<type>/manifest.yaml` (or the legacy
//! `.json` spelling). During normal boot, manifests are loaded on first
//! reference and the first invalid one aborts compilation; the bulk dump
//! mode loads everything and reports per-module failures without aborting.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::error::{ConfigError, SchemaError};
use crate::model::document;
use crate::schema::{SchemaKind, SchemaRegistry};

/// Lazily loading cache of validated module manifests, keyed by module type.
pub struct ManifestStore {
    dir: PathBuf,
    registry: Arc<SchemaRegistry>,
    manifests: RwLock<HashMap<String, Arc<Value>>>,
}

impl ManifestStore {
    pub fn new(dir: PathBuf, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            dir,
            registry,
            manifests: RwLock::new(HashMap::new()),
        }
    }

    /// Directory of a module type (where its artifact is probed).
    pub fn module_dir(&self, module_type: &str) -> PathBuf {
        self.dir.join(module_type)
    }

    /// Returns the validated manifest of `module_type`, loading it on first
    /// reference. `Ok(None)` means the module type does not exist; an
    /// existing but broken manifest is an error.
    pub fn get(&self, module_type: &str) -> Result<Option<Arc<Value>>, ConfigError> {
        if let Some(cached) = self
            .manifests
            .read()
            .expect("manifest cache poisoned")
            .get(module_type)
        {
            return Ok(Some(Arc::clone(cached)));
        }

        let module_dir = self.module_dir(module_type);
        if !module_dir.is_dir() {
            return Ok(None);
        }
        let path = match document::find_document(&module_dir, "manifest") {
            Some(path) => path,
            None => return Ok(None),
        };

        let manifest = document::load_document(&path).map_err(|e| ConfigError::Document {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let origin = path.display().to_string();
        let duration = self
            .registry
            .validate(&manifest, SchemaKind::Manifest, &origin)?;
        tracing::debug!(module_type, ?duration, "validated manifest");
        check_requirement_bounds(&manifest, &origin)?;

        let manifest = Arc::new(manifest);
        self.manifests
            .write()
            .expect("manifest cache poisoned")
            .insert(module_type.to_string(), Arc::clone(&manifest));
        Ok(Some(manifest))
    }

    /// Loads every candidate manifest under the modules dir.
    ///
    /// Failures are collected, not fatal; used by the manifest dump mode.
    pub fn load_all(&self) -> (BTreeMap<String, Arc<Value>>, Vec<(String, ConfigError)>) {
        let mut loaded = BTreeMap::new();
        let mut failed = Vec::new();

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                failed.push((
                    self.dir.display().to_string(),
                    ConfigError::Document {
                        path: self.dir.clone(),
                        message: e.to_string(),
                    },
                ));
                return (loaded, failed);
            }
        };

        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let module_type = entry.file_name().to_string_lossy().to_string();
            match self.get(&module_type) {
                Ok(Some(manifest)) => {
                    loaded.insert(module_type, manifest);
                }
                Ok(None) => {}
                Err(e) => failed.push((module_type, e)),
            }
        }
        (loaded, failed)
    }
}

/// Enforces `0 <= min <= max` on every requirement's connection bounds.
fn check_requirement_bounds(manifest: &Value, origin: &str) -> Result<(), ConfigError> {
    let requires = match manifest.get("requires").and_then(Value::as_object) {
        Some(requires) => requires,
        None => return Ok(()),
    };
    for (requirement, spec) in requires {
        let min = spec.get("min_connections").and_then(Value::as_u64).unwrap_or(1);
        let max = spec.get("max_connections").and_then(Value::as_u64).unwrap_or(1);
        if min > max {
            return Err(SchemaError {
                path: origin.into(),
                pointer: format!("/requires/{requirement}"),
                message: format!("min_connections ({min}) exceeds max_connections ({max})"),
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture(manifest: Option<&str>) -> (TempDir, ManifestStore) {
        let dir = TempDir::new().unwrap();
        let schemas = dir.path().join("schemas");
        fs::create_dir_all(&schemas).unwrap();
        for name in [
            "config",
            "manifest",
            "interface",
            "type",
            "error_declaration_list",
        ] {
            fs::write(
                schemas.join(format!("{name}.yaml")),
                "$schema: http://json-schema.org/draft-07/schema#\ntype: object\nrequired: [metadata]\n",
            )
            .unwrap();
        }
        let modules = dir.path().join("modules");
        fs::create_dir_all(modules.join("TESTValidManifest")).unwrap();
        if let Some(content) = manifest {
            fs::write(
                modules.join("TESTValidManifest").join("manifest.yaml"),
                content,
            )
            .unwrap();
        }

        let types = Arc::new(crate::config::TypeStore::new(dir.path().join("types")));
        let registry = Arc::new(SchemaRegistry::load(&schemas, types).unwrap());
        let store = ManifestStore::new(modules, registry);
        (dir, store)
    }

    #[test]
    fn loads_and_caches_valid_manifest() {
        let (_dir, store) = fixture(Some("metadata:\n  license: Apache-2.0\n"));
        let manifest = store.get("TESTValidManifest").unwrap().unwrap();
        assert!(manifest.get("metadata").is_some());
        let again = store.get("TESTValidManifest").unwrap().unwrap();
        assert!(Arc::ptr_eq(&manifest, &again));
    }

    #[test]
    fn unknown_module_type_is_none() {
        let (_dir, store) = fixture(Some("metadata: {}\n"));
        assert!(store.get("DoesNotExist").unwrap().is_none());
        assert!(store.get("TESTValidManifest").unwrap().is_some());
    }

    #[test]
    fn manifest_without_metadata_fails_validation() {
        let (_dir, store) = fixture(Some("description: no metadata here\n"));
        let err = store.get("TESTValidManifest").unwrap_err();
        assert!(matches!(err, ConfigError::Schema(_)));
    }

    #[test]
    fn inverted_requirement_bounds_are_rejected() {
        let (_dir, store) = fixture(Some(
            "metadata: {}\nrequires:\n  grid:\n    interface: energy\n    min_connections: 3\n    max_connections: 1\n",
        ));
        let err = store.get("TESTValidManifest").unwrap_err();
        assert!(matches!(err, ConfigError::Schema(_)));
    }

    #[test]
    fn load_all_collects_failures_without_aborting() {
        let (dir, store) = fixture(Some("metadata: {}\n"));
        let broken = dir.path().join("modules").join("Broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join("manifest.yaml"), "a: [unclosed").unwrap();

        let (loaded, failed) = store.load_all();
        assert!(loaded.contains_key("TESTValidManifest"));
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "Broken");
    }
}
