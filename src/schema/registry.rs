//! # Schema registry: the five fixed schemas and their validators.
//!
//! Loads `config`, `manifest`, `interface`, `type` and
//! `error_declaration_list` from the schemas directory at startup. Each
//! schema is itself validated against draft-07 before being compiled.
//!
//! ## Reference resolution
//! A validator may encounter two kinds of external references:
//! - the draft-07 meta-schema, served from the validator's built-in copy;
//! - type URIs (`/file#/Name`), served from the [`TypeStore`].
//!
//! Anything else fails with a schema-resolution error. The `uri` format is
//! checked against the type-URI grammar, so a manifest cannot smuggle an
//! arbitrary URL through a `format: uri` string.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonschema::{CompilationOptions, Draft, JSONSchema, SchemaResolver, SchemaResolverError};
use serde_json::Value;
use url::Url;

use crate::config::TypeStore;
use crate::error::{BootError, ConfigError, SchemaError};
use crate::model::document;
use crate::schema::uri::{is_type_uri, split_type_uri};

/// The five fixed schema kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    Config,
    Manifest,
    Interface,
    Type,
    ErrorDeclarationList,
}

impl SchemaKind {
    /// All kinds, in load order.
    pub const ALL: [SchemaKind; 5] = [
        SchemaKind::Config,
        SchemaKind::Manifest,
        SchemaKind::Interface,
        SchemaKind::Type,
        SchemaKind::ErrorDeclarationList,
    ];

    /// File stem of the schema document under the schemas directory.
    pub fn file_stem(self) -> &'static str {
        match self {
            SchemaKind::Config => "config",
            SchemaKind::Manifest => "manifest",
            SchemaKind::Interface => "interface",
            SchemaKind::Type => "type",
            SchemaKind::ErrorDeclarationList => "error_declaration_list",
        }
    }
}

/// Serves type URIs from the type store; everything else is unresolvable.
struct TypeRefResolver {
    types: Arc<TypeStore>,
}

impl SchemaResolver for TypeRefResolver {
    fn resolve(
        &self,
        _root_schema: &Value,
        url: &Url,
        original_reference: &str,
    ) -> Result<Arc<Value>, SchemaResolverError> {
        if let Some((file, _)) = split_type_uri(original_reference) {
            return self
                .types
                .load_raw(file)
                .map_err(|e| anyhow::anyhow!("cannot load type file '{file}': {e}"));
        }
        Err(anyhow::anyhow!(
            "unresolvable schema reference '{original_reference}' ({url})"
        ))
    }
}

fn compile_options(types: &Arc<TypeStore>) -> CompilationOptions {
    let mut options = JSONSchema::options();
    options
        .with_draft(Draft::Draft7)
        .with_meta_schemas()
        .with_resolver(TypeRefResolver {
            types: Arc::clone(types),
        })
        .with_format("uri", is_type_uri)
        .should_validate_formats(true);
    options
}

/// Loaded and compiled schemas plus the shared reference machinery.
#[derive(Debug)]
pub struct SchemaRegistry {
    types: Arc<TypeStore>,
    raw: HashMap<SchemaKind, Value>,
    compiled: HashMap<SchemaKind, JSONSchema>,
}

impl SchemaRegistry {
    /// Loads the five schemas from `schemas_dir`, validating each against
    /// draft-07 and compiling its validator.
    pub fn load(schemas_dir: &Path, types: Arc<TypeStore>) -> Result<Self, BootError> {
        let meta = serde_json::json!({"$ref": "http://json-schema.org/draft-07/schema#"});
        let meta_validator = compile_options(&types)
            .compile(&meta)
            .map_err(|e| BootError::Schema {
                name: "draft-07".into(),
                message: e.to_string(),
            })?;

        let mut raw = HashMap::new();
        let mut compiled = HashMap::new();

        for kind in SchemaKind::ALL {
            let name = kind.file_stem();
            let path = document::find_document(schemas_dir, name).ok_or_else(|| {
                BootError::Schema {
                    name: name.into(),
                    message: format!("not found under '{}'", schemas_dir.display()),
                }
            })?;
            let schema = document::load_document(&path).map_err(|e| BootError::Schema {
                name: name.into(),
                message: e.to_string(),
            })?;

            if let Err(mut errors) = meta_validator.validate(&schema) {
                let first = errors.next().map(|e| e.to_string()).unwrap_or_default();
                return Err(BootError::Schema {
                    name: name.into(),
                    message: format!("does not validate against draft-07: {first}"),
                });
            }

            let validator =
                compile_options(&types)
                    .compile(&schema)
                    .map_err(|e| BootError::Schema {
                        name: name.into(),
                        message: e.to_string(),
                    })?;

            raw.insert(kind, schema);
            compiled.insert(kind, validator);
        }

        Ok(Self {
            types,
            raw,
            compiled,
        })
    }

    /// Raw schema document of the given kind.
    pub fn raw(&self, kind: SchemaKind) -> &Value {
        &self.raw[&kind]
    }

    /// Validates `document` against one of the five fixed schemas.
    ///
    /// Returns the validation duration for coarse startup reporting.
    pub fn validate(
        &self,
        document: &Value,
        kind: SchemaKind,
        origin: &str,
    ) -> Result<Duration, SchemaError> {
        let started = Instant::now();
        check(&self.compiled[&kind], document, origin)?;
        Ok(started.elapsed())
    }

    /// Validates `document` against an ad-hoc `schema` (e.g. a config-entry
    /// schema assembled from a manifest).
    pub fn validate_with(
        &self,
        document: &Value,
        schema: &Value,
        origin: &str,
    ) -> Result<Duration, SchemaError> {
        let started = Instant::now();
        let validator = self.compile(schema, origin)?;
        check(&validator, document, origin)?;
        Ok(started.elapsed())
    }

    /// Validates a module or implementation config block against its entry
    /// schema, classifying the first violation as a missing or an invalid
    /// entry.
    pub fn validate_config_block(
        &self,
        block: &Value,
        schema: &Value,
        instance: &str,
        origin: &str,
    ) -> Result<(), ConfigError> {
        use jsonschema::error::ValidationErrorKind;

        let validator = self.compile(schema, origin)?;
        let mut errors = match validator.validate(block) {
            Ok(()) => return Ok(()),
            Err(errors) => errors,
        };
        let first = match errors.next() {
            Some(err) => err,
            None => return Ok(()),
        };

        let error = match &first.kind {
            ValidationErrorKind::Required { property } => ConfigError::MissingConfigEntry {
                instance: instance.into(),
                entry: property
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| property.to_string()),
            },
            ValidationErrorKind::AdditionalProperties { unexpected } => {
                ConfigError::InvalidConfigEntry {
                    instance: instance.into(),
                    entry: unexpected.join(", "),
                    message: "not declared in the config schema".into(),
                }
            }
            _ => {
                let pointer = first.instance_path.to_string();
                let entry = pointer
                    .trim_start_matches('/')
                    .split('/')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                ConfigError::InvalidConfigEntry {
                    instance: instance.into(),
                    entry,
                    message: first.to_string(),
                }
            }
        };
        Err(error)
    }

    /// Shared type store backing the reference resolver.
    pub fn types(&self) -> &Arc<TypeStore> {
        &self.types
    }

    fn compile(&self, schema: &Value, origin: &str) -> Result<JSONSchema, SchemaError> {
        compile_options(&self.types)
            .compile(schema)
            .map_err(|e| SchemaError {
                path: origin.into(),
                pointer: String::new(),
                message: format!("schema does not compile: {e}"),
            })
    }
}

fn check(validator: &JSONSchema, document: &Value, origin: &str) -> Result<(), SchemaError> {
    if let Err(mut errors) = validator.validate(document) {
        if let Some(first) = errors.next() {
            return Err(SchemaError {
                path: origin.into(),
                pointer: first.instance_path.to_string(),
                message: first.to_string(),
            });
        }
    }
    Ok(())
}
