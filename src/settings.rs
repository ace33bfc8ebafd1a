//! # Runtime settings: directory layout, overrides, bus endpoint.
//!
//! Settings merge three sources in decreasing priority:
//! 1. command-line overrides,
//! 2. an optional `settings.yaml` next to the deployment config,
//! 3. built-in defaults derived from the installation prefix.
//!
//! The MQTT endpoint additionally honors the `MQTT_SERVER_ADDRESS`,
//! `MQTT_SERVER_PORT` and `MQTT_SOCKET_PATH` environment variables, which
//! take precedence over the settings file.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::BootError;
use crate::model::document;

/// Where the message bus listens: a unix socket path wins over host+port.
#[derive(Debug, Clone)]
pub struct MqttEndpoint {
    pub socket_path: Option<PathBuf>,
    pub host: String,
    pub port: u16,
}

impl MqttEndpoint {
    /// Human-readable endpoint for logs and connect errors.
    pub fn describe(&self) -> String {
        match &self.socket_path {
            Some(path) => path.display().to_string(),
            None => format!("{}:{}", self.host, self.port),
        }
    }
}

/// Command-line overrides applied on top of file and default settings.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub prefix: Option<PathBuf>,
    pub config: Option<PathBuf>,
    /// `Some(false)` when `--dontvalidateschema` was given.
    pub validate_schema: Option<bool>,
}

/// Optional per-deployment settings file, `settings.yaml` next to the
/// deployment config.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    mqtt_server_address: Option<String>,
    mqtt_server_port: Option<u16>,
    mqtt_socket_path: Option<PathBuf>,
    mqtt_everest_prefix: Option<String>,
    mqtt_external_prefix: Option<String>,
    telemetry_enabled: Option<bool>,
    validate_schema: Option<bool>,
    run_as_user: Option<String>,
}

/// Fully merged runtime settings, read-only after construction.
#[derive(Debug, Clone)]
pub struct Settings {
    pub prefix: PathBuf,
    pub config_file: PathBuf,

    pub schemas_dir: PathBuf,
    pub modules_dir: PathBuf,
    pub interfaces_dir: PathBuf,
    pub types_dir: PathBuf,
    pub errors_dir: PathBuf,
    pub www_dir: PathBuf,
    pub configs_dir: PathBuf,

    pub mqtt: MqttEndpoint,
    /// Topic prefix of the runtime's own traffic, with trailing slash.
    pub mqtt_everest_prefix: String,
    /// Topic prefix for external (non-runtime) traffic.
    pub mqtt_external_prefix: String,

    pub validate_schema: bool,
    pub telemetry_enabled: bool,
    pub run_as_user: Option<String>,
}

const NAMESPACE: &str = "chargevisor";
const DEFAULT_PREFIX: &str = "/usr";

impl Settings {
    /// Builds settings from the prefix and deployment config location,
    /// applying the merge order described in the module docs.
    pub fn new(overrides: Overrides) -> Result<Self, BootError> {
        let prefix = overrides
            .prefix
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PREFIX));
        if !prefix.is_dir() {
            return Err(BootError::InvalidPrefix { path: prefix });
        }

        let data_dir = prefix.join("share").join(NAMESPACE);
        let configs_dir = if prefix == Path::new(DEFAULT_PREFIX) {
            PathBuf::from("/etc").join(NAMESPACE)
        } else {
            prefix.join("etc").join(NAMESPACE)
        };

        let config_file = resolve_config_file(&configs_dir, overrides.config.as_deref())?;
        let file = load_settings_file(&config_file)?;

        let socket_path = env::var_os("MQTT_SOCKET_PATH")
            .map(PathBuf::from)
            .or(file.mqtt_socket_path);
        let host = env::var("MQTT_SERVER_ADDRESS")
            .ok()
            .or(file.mqtt_server_address)
            .unwrap_or_else(|| "localhost".into());
        let port = env::var("MQTT_SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .or(file.mqtt_server_port)
            .unwrap_or(1883);

        Ok(Self {
            schemas_dir: data_dir.join("schemas"),
            modules_dir: data_dir.join("modules"),
            interfaces_dir: data_dir.join("interfaces"),
            types_dir: data_dir.join("types"),
            errors_dir: data_dir.join("errors"),
            www_dir: data_dir.join("www"),
            configs_dir,
            prefix,
            config_file,
            mqtt: MqttEndpoint {
                socket_path,
                host,
                port,
            },
            mqtt_everest_prefix: with_trailing_slash(
                file.mqtt_everest_prefix.as_deref().unwrap_or("everest"),
            ),
            mqtt_external_prefix: file.mqtt_external_prefix.unwrap_or_default(),
            validate_schema: overrides
                .validate_schema
                .or(file.validate_schema)
                .unwrap_or(true),
            telemetry_enabled: file.telemetry_enabled.unwrap_or(false),
            run_as_user: file.run_as_user,
        })
    }

    /// Topic prefix of one module instance.
    pub fn module_prefix(&self, instance: &str) -> String {
        format!("{}{instance}", self.mqtt_everest_prefix)
    }

    /// Topic a worker publishes its readiness on.
    pub fn ready_topic(&self, instance: &str) -> String {
        format!("{}/ready", self.module_prefix(instance))
    }

    /// Topic the manager publishes the fleet-ready signal on.
    pub fn global_ready_topic(&self) -> String {
        format!("{}ready", self.mqtt_everest_prefix)
    }
}

fn with_trailing_slash(prefix: &str) -> String {
    if prefix.ends_with('/') {
        prefix.into()
    } else {
        format!("{prefix}/")
    }
}

/// Resolves the deployment config path: an explicit path is taken as-is; an
/// extension-less name that does not exist is looked up in the configs dir;
/// without any override the default `config.yaml` is used.
fn resolve_config_file(configs_dir: &Path, given: Option<&Path>) -> Result<PathBuf, BootError> {
    let candidate = match given {
        None => configs_dir.join("config.yaml"),
        Some(path) if !path.exists() && path.extension().is_none() => {
            configs_dir.join(format!("{}.yaml", path.display()))
        }
        Some(path) => path.to_path_buf(),
    };
    if !candidate.is_file() {
        return Err(BootError::MissingConfigFile { path: candidate });
    }
    Ok(candidate)
}

fn load_settings_file(config_file: &Path) -> Result<SettingsFile, BootError> {
    let path = match config_file.parent() {
        Some(parent) => parent.join("settings.yaml"),
        None => return Ok(SettingsFile::default()),
    };
    if !path.is_file() {
        return Ok(SettingsFile::default());
    }
    let doc = document::load_document(&path).map_err(|e| match e {
        document::LoadError::Io(source) => BootError::Io {
            path: path.clone(),
            source,
        },
        document::LoadError::Parse(message) => BootError::Parse {
            path: path.clone(),
            message,
        },
    })?;
    serde_json::from_value(doc).map_err(|e| BootError::Parse {
        path,
        message: e.to_string(),
    })
}
