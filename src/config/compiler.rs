//! # Config compiler: from deployment document to compiled graph.
//!
//! The compiler walks the user-supplied deployment document and links every
//! module instance against its manifest, the interfaces those manifests
//! name, the types they reference and the errors they declare.
//!
//! ## Pipeline
//! ```text
//! deployment doc ──► shape check (mapping / null / scalar)
//!       │
//!       ├─► per instance: manifest lookup ─► provides resolution
//!       │        ├─► module config validation (+ defaults)
//!       │        └─► implementation config validation (+ defaults)
//!       │
//!       ├─► requirement resolution (cardinality + interface match)
//!       ├─► tier mappings, telemetry entries
//!       └─► type collection ──► CompiledConfig
//! ```
//!
//! ## Rules
//! - The compiled config is constructed once and read-only afterwards.
//! - Manifest config-entry defaults are materialized into the compiled main
//!   config, so dumping and recompiling is a fixed point.
//! - All maps are key-sorted, so `serialize()` is byte-stable.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};

use crate::config::{ErrorStore, InterfaceResolver, ManifestStore, TypeStore};
use crate::error::{BootError, CompileError, ConfigError};
use crate::model::{
    document, parse_instance_mappings, parse_instance_telemetry, ConfigEntry, Mapping,
    ModuleTierMappings, TelemetryConfig,
};
use crate::schema::{is_type_uri, split_type_uri, SchemaKind, SchemaRegistry};
use crate::settings::Settings;

/// Wires the stores together and drives the compile pipeline.
pub struct Compiler {
    settings: Arc<Settings>,
    registry: Arc<SchemaRegistry>,
    manifests: ManifestStore,
    interfaces: InterfaceResolver,
}

impl Compiler {
    /// Loads the five schemas and prepares the stores. Fails at boot level
    /// if the schema directory is unusable.
    pub fn new(settings: Arc<Settings>) -> Result<Self, BootError> {
        let types = Arc::new(TypeStore::new(settings.types_dir.clone()));
        let registry = Arc::new(SchemaRegistry::load(&settings.schemas_dir, types)?);
        let errors = Arc::new(ErrorStore::new(
            settings.errors_dir.clone(),
            Arc::clone(&registry),
        ));
        let manifests = ManifestStore::new(settings.modules_dir.clone(), Arc::clone(&registry));
        let interfaces = InterfaceResolver::new(
            settings.interfaces_dir.clone(),
            Arc::clone(&registry),
            errors,
        );
        Ok(Self {
            settings,
            registry,
            manifests,
            interfaces,
        })
    }

    /// The manifest store, exposed for the manifest dump mode.
    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    /// Compiles the deployment document referenced by the settings.
    pub fn compile(&self) -> Result<CompiledConfig, CompileError> {
        let started = Instant::now();
        let deployment = self.load_deployment()?;
        let compiled = self.compile_document(&deployment)?;
        tracing::info!(
            instances = compiled.module_names.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "config compiled"
        );
        Ok(compiled)
    }

    fn load_deployment(&self) -> Result<BTreeMap<String, Value>, CompileError> {
        let path = &self.settings.config_file;
        let doc = document::load_document(path).map_err(|e| match e {
            document::LoadError::Io(source) => BootError::Io {
                path: path.clone(),
                source,
            },
            document::LoadError::Parse(message) => BootError::Parse {
                path: path.clone(),
                message,
            },
        })?;

        let instances = match doc {
            Value::Null => BTreeMap::new(),
            Value::Object(map) => {
                let doc = Value::Object(map);
                self.registry.validate(
                    &doc,
                    SchemaKind::Config,
                    &path.display().to_string(),
                )?;
                match doc {
                    Value::Object(map) => map.into_iter().collect(),
                    _ => unreachable!("doc is an object"),
                }
            }
            other => {
                return Err(BootError::InvalidDeployment {
                    found: document::value_kind(&other).into(),
                }
                .into())
            }
        };
        Ok(instances)
    }

    fn compile_document(
        &self,
        instances: &BTreeMap<String, Value>,
    ) -> Result<CompiledConfig, CompileError> {
        let mut main = BTreeMap::new();
        let mut module_names = BTreeMap::new();
        let mut interfaces = BTreeMap::new();
        let mut interface_definitions = BTreeMap::new();
        let mut tier_mappings = BTreeMap::new();
        let mut telemetry = BTreeMap::new();
        let mut standalone = BTreeSet::new();
        let mut manifests: BTreeMap<String, Arc<Value>> = BTreeMap::new();

        for (instance, entry) in instances {
            let module_type = entry
                .get("module")
                .and_then(Value::as_str)
                .ok_or_else(|| ConfigError::UnknownModuleType {
                    instance: instance.clone(),
                    module_type: String::new(),
                })?
                .to_string();

            let manifest = self.manifests.get(&module_type)?.ok_or_else(|| {
                ConfigError::UnknownModuleType {
                    instance: instance.clone(),
                    module_type: module_type.clone(),
                }
            })?;

            // Resolve every provided interface before touching config blocks,
            // so a missing interface is reported over a config typo.
            let mut implementations = BTreeMap::new();
            if let Some(provides) = manifest.get("provides").and_then(Value::as_object) {
                for (impl_id, provision) in provides {
                    let interface = provision
                        .get("interface")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let resolved = self.interfaces.resolve(&interface, &module_type)?;
                    interface_definitions.insert(interface.clone(), (*resolved).clone());
                    implementations.insert(impl_id.clone(), interface);
                }
            }
            interfaces.insert(module_type.clone(), implementations);

            let compiled_entry =
                self.compile_instance(instance, entry, &module_type, &manifest)?;

            if entry.get("standalone").and_then(Value::as_bool).unwrap_or(false) {
                standalone.insert(instance.clone());
            }
            tier_mappings.insert(instance.clone(), parse_instance_mappings(entry));
            if let Some(config) = parse_instance_telemetry(entry) {
                if self.settings.telemetry_enabled {
                    telemetry.insert(instance.clone(), config);
                }
            }

            module_names.insert(instance.clone(), module_type.clone());
            manifests.insert(module_type, manifest);
            main.insert(instance.clone(), compiled_entry);
        }

        self.resolve_requirements(instances, &main, &module_names, &manifests)?;

        let types = self.collect_types(&manifests, &interface_definitions)?;
        let errors = collect_error_map(&interface_definitions);

        Ok(CompiledConfig {
            main: Value::Object(main.into_iter().collect()),
            module_names,
            interfaces,
            interface_definitions,
            types,
            errors,
            tier_mappings,
            telemetry,
            standalone,
            manifests,
        })
    }

    /// Validates and normalizes one instance entry: config blocks checked
    /// against the manifest's schemas, defaults materialized, implementation
    /// blocks present for every provided implementation.
    fn compile_instance(
        &self,
        instance: &str,
        entry: &Value,
        module_type: &str,
        manifest: &Value,
    ) -> Result<Value, CompileError> {
        let origin = format!("<{module_type}/manifest>");

        let module_block = entry.get("config_module").cloned().unwrap_or(json!({}));
        let module_entries = manifest.get("config").cloned().unwrap_or(json!({}));
        let module_schema = entry_block_schema(&module_entries);
        self.registry
            .validate_config_block(&module_block, &module_schema, instance, &origin)?;
        let module_block = apply_defaults(module_block, &module_entries);

        let given_impl_blocks = entry
            .get("config_implementation")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let provides = manifest.get("provides").and_then(Value::as_object);

        for impl_id in given_impl_blocks.keys() {
            let known = provides.map(|p| p.contains_key(impl_id)).unwrap_or(false);
            if !known {
                return Err(ConfigError::UnknownImplementation {
                    instance: instance.into(),
                    implementation: impl_id.clone(),
                }
                .into());
            }
        }

        let mut impl_blocks = BTreeMap::new();
        if let Some(provides) = provides {
            for (impl_id, provision) in provides {
                let block = given_impl_blocks
                    .get(impl_id)
                    .cloned()
                    .unwrap_or(json!({}));
                let entries = provision.get("config").cloned().unwrap_or(json!({}));
                let schema = entry_block_schema(&entries);
                let subject = format!("{instance}/{impl_id}");
                self.registry
                    .validate_config_block(&block, &schema, &subject, &origin)?;
                impl_blocks.insert(impl_id.clone(), apply_defaults(block, &entries));
            }
        }

        let mut compiled = Map::new();
        compiled.insert("module".into(), json!(module_type));
        compiled.insert("config_module".into(), module_block);
        compiled.insert(
            "config_implementation".into(),
            Value::Object(impl_blocks.into_iter().collect()),
        );
        compiled.insert(
            "connections".into(),
            entry.get("connections").cloned().unwrap_or(json!({})),
        );

        let capabilities = entry
            .get("capabilities")
            .or_else(|| manifest.get("capabilities"))
            .cloned();
        if let Some(capabilities) = capabilities {
            compiled.insert("capabilities".into(), capabilities);
        }
        for passthrough in ["standalone", "evse", "connector", "mapping", "telemetry"] {
            if let Some(value) = entry.get(passthrough) {
                compiled.insert(passthrough.into(), value.clone());
            }
        }
        Ok(Value::Object(compiled))
    }

    /// Checks every requirement of every instance against its connections.
    fn resolve_requirements(
        &self,
        instances: &BTreeMap<String, Value>,
        main: &BTreeMap<String, Value>,
        module_names: &BTreeMap<String, String>,
        manifests: &BTreeMap<String, Arc<Value>>,
    ) -> Result<(), ConfigError> {
        for (instance, entry) in instances {
            let module_type = &module_names[instance];
            let manifest = &manifests[module_type];
            let requires = match manifest.get("requires").and_then(Value::as_object) {
                Some(requires) => requires,
                None => continue,
            };

            for (requirement, spec) in requires {
                let required_interface = spec
                    .get("interface")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let min = spec
                    .get("min_connections")
                    .and_then(Value::as_u64)
                    .unwrap_or(1);
                let max = spec
                    .get("max_connections")
                    .and_then(Value::as_u64)
                    .unwrap_or(1);

                let connections = entry
                    .get("connections")
                    .and_then(|c| c.get(requirement))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();

                let count = connections.len() as u64;
                if count < min || count > max {
                    return Err(ConfigError::UnsatisfiedRequirement {
                        instance: instance.clone(),
                        requirement: requirement.clone(),
                        detail: format!(
                            "needs between {min} and {max} connections, found {count}"
                        ),
                    });
                }

                for connection in &connections {
                    self.check_connection(
                        instance,
                        requirement,
                        required_interface,
                        connection,
                        main,
                        module_names,
                        manifests,
                    )?;
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_connection(
        &self,
        instance: &str,
        requirement: &str,
        required_interface: &str,
        connection: &Value,
        main: &BTreeMap<String, Value>,
        module_names: &BTreeMap<String, String>,
        manifests: &BTreeMap<String, Arc<Value>>,
    ) -> Result<(), ConfigError> {
        let unsatisfied = |detail: String| ConfigError::UnsatisfiedRequirement {
            instance: instance.into(),
            requirement: requirement.into(),
            detail,
        };

        let target = connection
            .get("module_id")
            .and_then(Value::as_str)
            .ok_or_else(|| unsatisfied("connection entry lacks a module_id".into()))?;
        let implementation = connection
            .get("implementation_id")
            .and_then(Value::as_str)
            .ok_or_else(|| unsatisfied("connection entry lacks an implementation_id".into()))?;

        if !main.contains_key(target) {
            return Err(unsatisfied(format!(
                "connected module instance '{target}' does not exist"
            )));
        }

        let target_type = &module_names[target];
        let provided_interface = manifests[target_type]
            .get("provides")
            .and_then(|p| p.get(implementation))
            .and_then(|p| p.get("interface"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                unsatisfied(format!(
                    "module instance '{target}' has no implementation '{implementation}'"
                ))
            })?;

        // A provider satisfies the requirement if it implements the required
        // interface directly or anywhere up its parent chain.
        let satisfies = self
            .interfaces
            .ancestry(provided_interface)
            .map(|chain| chain.iter().any(|name| name == required_interface))
            .unwrap_or(false);
        if !satisfies {
            return Err(ConfigError::InterfaceMismatch {
                instance: instance.into(),
                requirement: requirement.into(),
                expected: required_interface.into(),
                found: provided_interface.into(),
            });
        }
        Ok(())
    }

    /// Loads every type file referenced from the used manifests and resolved
    /// interfaces, chasing references between type files to a fixpoint.
    fn collect_types(
        &self,
        manifests: &BTreeMap<String, Arc<Value>>,
        interface_definitions: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, ConfigError> {
        let mut referenced = BTreeSet::new();
        for manifest in manifests.values() {
            collect_type_refs(manifest, &mut referenced);
        }
        for definition in interface_definitions.values() {
            collect_type_refs(definition, &mut referenced);
        }

        let mut types = BTreeMap::new();
        let mut queue: Vec<String> = referenced.into_iter().collect();
        while let Some(file) = queue.pop() {
            if types.contains_key(&file) {
                continue;
            }
            let doc = self
                .registry
                .types()
                .load_validated(&file, &self.registry)?;
            let mut nested = BTreeSet::new();
            collect_type_refs(&doc, &mut nested);
            queue.extend(nested);
            types.insert(file, (*doc).clone());
        }
        Ok(types)
    }
}

/// Builds the object schema a config block is validated against: entries as
/// properties, entries without a default required, nothing else allowed.
fn entry_block_schema(entries: &Value) -> Value {
    let properties = entries.as_object().cloned().unwrap_or_default();
    let required: Vec<&String> = properties
        .iter()
        .filter(|(_, schema)| schema.get("default").is_none())
        .map(|(name, _)| name)
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// Fills entry defaults into a validated config block.
fn apply_defaults(block: Value, entries: &Value) -> Value {
    let mut block = match block {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Some(entries) = entries.as_object() {
        for (name, schema) in entries {
            if let Some(default) = schema.get("default") {
                block.entry(name.clone()).or_insert_with(|| default.clone());
            }
        }
    }
    let sorted: BTreeMap<String, Value> = block.into_iter().collect();
    Value::Object(sorted.into_iter().collect())
}

/// Walks a document tree collecting the file parts of every type URI that
/// appears under a `$ref` key.
fn collect_type_refs(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if key == "$ref" {
                    if let Some(reference) = nested.as_str() {
                        if is_type_uri(reference) {
                            if let Some((file, _)) = split_type_uri(reference) {
                                out.insert(file.to_string());
                            }
                        }
                    }
                }
                collect_type_refs(nested, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_type_refs(item, out);
            }
        }
        _ => {}
    }
}

fn collect_error_map(interface_definitions: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    let mut errors = BTreeMap::new();
    for definition in interface_definitions.values() {
        if let Some(declarations) = definition.get("errors").and_then(Value::as_array) {
            for declaration in declarations {
                let (Some(namespace), Some(name)) = (
                    declaration.get("namespace").and_then(Value::as_str),
                    declaration.get("name").and_then(Value::as_str),
                ) else {
                    continue;
                };
                let description = declaration
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                errors.insert(format!("{namespace}/{name}"), description.to_string());
            }
        }
    }
    errors
}

/// The fully linked configuration object every downstream component reads.
#[derive(Debug)]
pub struct CompiledConfig {
    main: Value,
    module_names: BTreeMap<String, String>,
    interfaces: BTreeMap<String, BTreeMap<String, String>>,
    interface_definitions: BTreeMap<String, Value>,
    types: BTreeMap<String, Value>,
    errors: BTreeMap<String, String>,
    tier_mappings: BTreeMap<String, ModuleTierMappings>,
    telemetry: BTreeMap<String, TelemetryConfig>,
    standalone: BTreeSet<String>,
    manifests: BTreeMap<String, Arc<Value>>,
}

impl CompiledConfig {
    /// True if the deployment contains the given module instance.
    pub fn contains(&self, instance: &str) -> bool {
        self.module_names.contains_key(instance)
    }

    /// The compiled main configuration (instance id → normalized entry).
    pub fn main(&self) -> &Value {
        &self.main
    }

    /// Sorted instance ids.
    pub fn instances(&self) -> impl Iterator<Item = &str> {
        self.module_names.keys().map(String::as_str)
    }

    /// Instance id → module type.
    pub fn module_names(&self) -> &BTreeMap<String, String> {
        &self.module_names
    }

    /// Module type → implementation id → interface name.
    pub fn interfaces(&self) -> &BTreeMap<String, BTreeMap<String, String>> {
        &self.interfaces
    }

    /// Interface name → flat resolved definition.
    pub fn interface_definitions(&self) -> &BTreeMap<String, Value> {
        &self.interface_definitions
    }

    /// Type file (`/file`) → validated type document.
    pub fn types(&self) -> &BTreeMap<String, Value> {
        &self.types
    }

    /// Qualified error name (`namespace/Name`) → description.
    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// Module type → manifest, restricted to used types.
    pub fn manifests(&self) -> &BTreeMap<String, Arc<Value>> {
        &self.manifests
    }

    /// Instances flagged standalone in the deployment document.
    pub fn standalone(&self) -> &BTreeSet<String> {
        &self.standalone
    }

    /// Module type of one instance.
    pub fn module_type_of(&self, instance: &str) -> Option<&str> {
        self.module_names.get(instance).map(String::as_str)
    }

    /// Log-friendly identifier: `ModuleType:instance`.
    pub fn printable_identifier(&self, instance: &str) -> String {
        match self.module_type_of(instance) {
            Some(module_type) => format!("{module_type}:{instance}"),
            None => instance.to_string(),
        }
    }

    /// Declared capabilities of one instance (config override or manifest).
    pub fn capabilities_of(&self, instance: &str) -> Vec<String> {
        self.main
            .get(instance)
            .and_then(|e| e.get("capabilities"))
            .and_then(Value::as_array)
            .map(|caps| {
                caps.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Typed view of one instance's config blocks: the module block under
    /// the synthetic id `!module`, one block per implementation otherwise.
    pub fn module_configs(&self, instance: &str) -> BTreeMap<String, BTreeMap<String, ConfigEntry>> {
        let mut configs = BTreeMap::new();
        let Some(entry) = self.main.get(instance) else {
            return configs;
        };
        if let Some(block) = entry.get("config_module") {
            configs.insert("!module".into(), narrow_block(block));
        }
        if let Some(blocks) = entry.get("config_implementation").and_then(Value::as_object) {
            for (impl_id, block) in blocks {
                configs.insert(impl_id.clone(), narrow_block(block));
            }
        }
        configs
    }

    /// Resolved tier mapping of an implementation, `None` meaning the
    /// charging-station root.
    pub fn tier_mapping(&self, instance: &str, implementation: &str) -> Option<Mapping> {
        self.tier_mappings
            .get(instance)
            .and_then(|tiers| tiers.resolve(implementation))
    }

    /// Telemetry entry of an instance, if configured and enabled.
    pub fn telemetry(&self, instance: &str) -> Option<TelemetryConfig> {
        self.telemetry.get(instance).copied()
    }

    /// Emits the stable JSON-shaped document downstream consumers read.
    pub fn serialize(&self) -> Value {
        json!({
            "main": self.main,
            "module_names": self.module_names,
            "interfaces": self.interfaces,
            "interface_definitions": self.interface_definitions,
            "types": self.types,
            "errors": self.errors,
        })
    }

    /// Writes the compiled main config and the used manifests into `dir`.
    pub fn dump(&self, dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let main = serde_json::to_string_pretty(&self.main)?;
        std::fs::write(dir.join("config.json"), main)?;
        for (module_type, manifest) in &self.manifests {
            let content = serde_json::to_string_pretty(manifest.as_ref())?;
            std::fs::write(dir.join(format!("{module_type}.json")), content)?;
        }
        Ok(())
    }
}

fn narrow_block(block: &Value) -> BTreeMap<String, ConfigEntry> {
    block
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(key, value)| {
                    ConfigEntry::from_value(value).map(|entry| (key.clone(), entry))
                })
                .collect()
        })
        .unwrap_or_default()
}
