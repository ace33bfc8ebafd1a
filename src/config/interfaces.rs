//! # Interface resolver: inheritance chains, merge rules, error expansion.
//!
//! Interfaces form a forest via an optional `parent` link. Resolution walks
//! the chain parent-first and merges by field:
//!
//! - `vars`: union; a duplicate key is a conflict.
//! - `cmds`: union; a duplicate key is a conflict.
//! - `errors`: set union; duplicates collapse silently.
//!
//! Error references are expanded into inline declarations in the same pass.
//! Cycle detection uses a visit stack. Resolved interfaces are memoized by
//! name for process lifetime; the ancestry of every resolved interface is
//! kept so requirement matching can honor inheritance.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use crate::config::errors_decl::{ErrorDeclaration, ErrorStore};
use crate::error::{ConfigError, InterfaceError};
use crate::model::document;
use crate::schema::{SchemaKind, SchemaRegistry};

/// Resolver and cache for interface definitions.
pub struct InterfaceResolver {
    dir: PathBuf,
    registry: Arc<SchemaRegistry>,
    errors: Arc<ErrorStore>,
    resolved: RwLock<HashMap<String, Arc<Value>>>,
    ancestry: RwLock<HashMap<String, Vec<String>>>,
}

impl InterfaceResolver {
    pub fn new(dir: PathBuf, registry: Arc<SchemaRegistry>, errors: Arc<ErrorStore>) -> Self {
        Self {
            dir,
            registry,
            errors,
            resolved: RwLock::new(HashMap::new()),
            ancestry: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves `name` into its flat merged definition.
    ///
    /// `module_type` is only used to attribute a missing definition file to
    /// the manifest that asked for it.
    pub fn resolve(&self, name: &str, module_type: &str) -> Result<Arc<Value>, ConfigError> {
        let mut stack = Vec::new();
        self.resolve_inner(name, module_type, &mut stack)
    }

    /// Parent chain of a resolved interface, starting with the interface
    /// itself. `None` if it has not been resolved yet.
    pub fn ancestry(&self, name: &str) -> Option<Vec<String>> {
        self.ancestry
            .read()
            .expect("interface cache poisoned")
            .get(name)
            .cloned()
    }

    fn resolve_inner(
        &self,
        name: &str,
        module_type: &str,
        stack: &mut Vec<String>,
    ) -> Result<Arc<Value>, ConfigError> {
        if let Some(cached) = self
            .resolved
            .read()
            .expect("interface cache poisoned")
            .get(name)
        {
            return Ok(Arc::clone(cached));
        }

        if stack.iter().any(|visited| visited == name) {
            let mut path = stack.clone();
            path.push(name.to_string());
            return Err(InterfaceError::Cycle { path }.into());
        }
        stack.push(name.to_string());

        let definition = self.load_file(name, module_type)?;

        let (mut vars, mut cmds, mut error_set, mut chain) =
            match definition.get("parent").and_then(Value::as_str) {
                Some(parent) => {
                    let resolved_parent = self.resolve_inner(parent, module_type, stack)?;
                    (
                        object_of(&resolved_parent, "vars"),
                        object_of(&resolved_parent, "cmds"),
                        declarations_of(&resolved_parent),
                        self.ancestry(parent).unwrap_or_default(),
                    )
                }
                None => (BTreeMap::new(), BTreeMap::new(), BTreeSet::new(), Vec::new()),
            };

        merge_field(name, "vars", &mut vars, &definition)?;
        merge_field(name, "cmds", &mut cmds, &definition)?;

        if let Some(references) = definition.get("errors").and_then(Value::as_array) {
            for reference in references {
                let reference = reference.as_str().ok_or_else(|| {
                    InterfaceError::UnknownErrorRef {
                        reference: reference.to_string(),
                    }
                })?;
                error_set.extend(self.errors.resolve_ref(reference)?);
            }
        }

        chain.insert(0, name.to_string());

        let resolved = Arc::new(assemble(&definition, vars, cmds, &error_set));

        self.resolved
            .write()
            .expect("interface cache poisoned")
            .insert(name.to_string(), Arc::clone(&resolved));
        self.ancestry
            .write()
            .expect("interface cache poisoned")
            .insert(name.to_string(), chain);

        stack.pop();
        Ok(resolved)
    }

    fn load_file(&self, name: &str, module_type: &str) -> Result<Value, ConfigError> {
        let path = document::find_document(&self.dir, name).ok_or_else(|| {
            ConfigError::MissingInterface {
                interface: name.into(),
                module_type: module_type.into(),
            }
        })?;
        let definition = document::load_document(&path).map_err(|e| ConfigError::Document {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let duration = self.registry.validate(
            &definition,
            SchemaKind::Interface,
            &path.display().to_string(),
        )?;
        tracing::debug!(interface = name, ?duration, "validated interface definition");
        Ok(definition)
    }
}

fn object_of(resolved: &Value, field: &str) -> BTreeMap<String, Value> {
    resolved
        .get(field)
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn declarations_of(resolved: &Value) -> BTreeSet<ErrorDeclaration> {
    resolved
        .get("errors")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| {
                    Some(ErrorDeclaration {
                        namespace: e.get("namespace")?.as_str()?.to_string(),
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
        .unwrap_or_default()
}

fn merge_field(
    interface: &str,
    field: &'static str,
    merged: &mut BTreeMap<String, Value>,
    definition: &Value,
) -> Result<(), InterfaceError> {
    if let Some(own) = definition.get(field).and_then(Value::as_object) {
        for (key, value) in own {
            if merged.contains_key(key) {
                return Err(InterfaceError::Conflict {
                    interface: interface.into(),
                    field,
                    key: key.clone(),
                });
            }
            merged.insert(key.clone(), value.clone());
        }
    }
    Ok(())
}

fn assemble(
    definition: &Value,
    vars: BTreeMap<String, Value>,
    cmds: BTreeMap<String, Value>,
    errors: &BTreeSet<ErrorDeclaration>,
) -> Value {
    let mut resolved = Map::new();
    if let Some(description) = definition.get("description") {
        resolved.insert("description".into(), description.clone());
    }
    resolved.insert("vars".into(), Value::Object(vars.into_iter().collect()));
    resolved.insert("cmds".into(), Value::Object(cmds.into_iter().collect()));
    resolved.insert(
        "errors".into(),
        Value::Array(
            errors
                .iter()
                .map(|d| serde_json::to_value(d).expect("declaration serializes"))
                .collect(),
        ),
    );
    Value::Object(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        resolver: InterfaceResolver,
    }

    fn fixture(interfaces: &[(&str, &str)]) -> Fixture {
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
                "$schema: http://json-schema.org/draft-07/schema#\ntype: object\n",
            )
            .unwrap();
        }

        let interfaces_dir = dir.path().join("interfaces");
        fs::create_dir_all(&interfaces_dir).unwrap();
        for (name, content) in interfaces {
            fs::write(interfaces_dir.join(format!("{name}.yaml")), content).unwrap();
        }

        let errors_dir = dir.path().join("errors");
        fs::create_dir_all(&errors_dir).unwrap();
        fs::write(
            errors_dir.join("example.yaml"),
            "errors:\n  - name: CommunicationFault\n    description: lost contact\n  - name: VendorError\n    description: vendor specific\n",
        )
        .unwrap();

        let types = Arc::new(crate::config::TypeStore::new(dir.path().join("types")));
        let registry = Arc::new(SchemaRegistry::load(&schemas, types).unwrap());
        let errors = Arc::new(ErrorStore::new(errors_dir, Arc::clone(&registry)));
        let resolver = InterfaceResolver::new(interfaces_dir, registry, errors);
        Fixture {
            _dir: dir,
            resolver,
        }
    }

    #[test]
    fn merges_parent_vars_and_cmds() {
        let fx = fixture(&[
            (
                "base",
                "vars:\n  energy:\n    type: number\ncmds:\n  enable:\n    result:\n      type: boolean\n",
            ),
            (
                "child",
                "parent: base\nvars:\n  power:\n    type: number\n",
            ),
        ]);
        let resolved = fx.resolver.resolve("child", "TESTModule").unwrap();
        let vars = resolved.get("vars").unwrap().as_object().unwrap();
        assert!(vars.contains_key("energy"));
        assert!(vars.contains_key("power"));
        assert!(resolved
            .get("cmds")
            .unwrap()
            .as_object()
            .unwrap()
            .contains_key("enable"));
        assert_eq!(
            fx.resolver.ancestry("child").unwrap(),
            vec!["child".to_string(), "base".to_string()]
        );
    }

    #[test]
    fn redefined_var_is_a_conflict() {
        let fx = fixture(&[
            ("base", "vars:\n  energy:\n    type: number\n"),
            ("child", "parent: base\nvars:\n  energy:\n    type: string\n"),
        ]);
        let err = fx.resolver.resolve("child", "TESTModule").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Interface(InterfaceError::Conflict { field: "vars", ref key, .. }) if key == "energy"
        ));
    }

    #[test]
    fn parent_cycle_is_detected() {
        let fx = fixture(&[("a", "parent: b\n"), ("b", "parent: a\n")]);
        let err = fx.resolver.resolve("a", "TESTModule").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Interface(InterfaceError::Cycle { ref path }) if path.len() == 3
        ));
    }

    #[test]
    fn error_references_are_inlined_and_deduplicated() {
        let fx = fixture(&[
            ("base", "errors:\n  - example#CommunicationFault\n"),
            (
                "child",
                "parent: base\nerrors:\n  - example\n",
            ),
        ]);
        let resolved = fx.resolver.resolve("child", "TESTModule").unwrap();
        let errors = resolved.get("errors").unwrap().as_array().unwrap();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn missing_interface_file_is_attributed_to_the_module() {
        let fx = fixture(&[]);
        let err = fx.resolver.resolve("nope", "TESTModule").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingInterface { ref module_type, .. } if module_type == "TESTModule"
        ));
    }
}
