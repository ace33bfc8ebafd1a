//! Chargevisor manager binary.
//!
//! Thin front-end over the library: parses arguments, initializes logging,
//! and drives boot → compile → spawn → supervise. All business logic lives
//! in the library; this file only maps CLI flags and exit codes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chargevisor::supervisor::{self, ResolvedUser};
use chargevisor::{
    BootError, BusClient, CompileError, CompiledConfig, Compiler, MqttBus, Overrides, Settings,
    StatusFifo, SuperviseError,
};

#[derive(Parser)]
#[command(name = "chargevisor")]
#[command(version)]
#[command(about = "Manager for modular EV charging stacks", long_about = None)]
struct Cli {
    /// Check and validate all config files, then exit (0 = success)
    #[arg(long)]
    check: bool,

    /// Dump the validated main config and all used module manifests into DIR
    #[arg(long, value_name = "DIR")]
    dump: Option<PathBuf>,

    /// Dump manifests of all discovered modules (even unused) into DIR and exit
    #[arg(long, value_name = "DIR")]
    dumpmanifests: Option<PathBuf>,

    /// Prefix path of the installation
    #[arg(long, value_name = "PATH")]
    prefix: Option<PathBuf>,

    /// Full path to a deployment config file; an extension-less name that
    /// does not exist is looked up in the default configs directory
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Module instance id(s) not to start automatically; their readiness is
    /// still awaited (they must be started manually)
    #[arg(long, short = 's', value_name = "ID", num_args = 1..)]
    standalone: Vec<String>,

    /// Module instance id(s) to ignore: neither started nor awaited
    #[arg(long, value_name = "ID", num_args = 1..)]
    ignore: Vec<String>,

    /// Don't validate json schema on every message
    #[arg(long = "dontvalidateschema")]
    dont_validate_schema: bool,

    /// Path to a named pipe used for status updates from the manager
    #[arg(long = "status-fifo", value_name = "PATH", default_value = "")]
    status_fifo: String,
}

#[derive(thiserror::Error, Debug)]
enum ManagerError {
    #[error(transparent)]
    Boot(#[from] BootError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Supervise(#[from] SuperviseError),
    #[error("dump failed: {0}")]
    Dump(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "manager failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), ManagerError> {
    let settings = Arc::new(Settings::new(Overrides {
        prefix: cli.prefix.clone(),
        config: cli.config.clone(),
        validate_schema: cli.dont_validate_schema.then_some(false),
    })?);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        prefix = %settings.prefix.display(),
        config = %settings.config_file.display(),
        "chargevisor manager starting"
    );
    tracing::info!(broker = settings.mqtt.describe(), "using message bus");
    if settings.telemetry_enabled {
        tracing::info!("telemetry enabled");
    }
    if let Some(user) = &settings.run_as_user {
        tracing::info!(user, "workers will run as system user");
    }

    let compiler = Compiler::new(Arc::clone(&settings))?;

    if let Some(dir) = &cli.dumpmanifests {
        return dump_manifests(&compiler, dir).map_err(ManagerError::Dump);
    }

    let config = compiler.compile()?;

    if let Some(dir) = &cli.dump {
        config.dump(dir)?;
        tracing::info!(dir = %dir.display(), "dumped compiled config and manifests");
    }
    if cli.check {
        tracing::info!("config is valid, terminating as requested");
        return Ok(());
    }

    let standalone = collect_standalone(&cli, &config);
    let ignored: HashSet<String> = cli.ignore.iter().cloned().collect();
    let fifo = StatusFifo::create_from_path(&cli.status_fifo);

    let user = resolve_run_as_user(&settings)?;

    let bus: Arc<dyn BusClient> = MqttBus::connect(&settings).await?;

    let mut fleet = chargevisor::Fleet::new(
        Arc::clone(&settings),
        Arc::clone(&bus),
        fifo,
        standalone.clone(),
        user.clone(),
    );
    fleet.start(&config, &ignored, &standalone).await?;

    // Workers dropped privileges themselves in pre-exec; now the manager
    // follows, keeping only what supervision needs.
    #[cfg(unix)]
    if let Some(user) = &user {
        supervisor::apply_identity(user).map_err(|e| {
            BootError::IdentityDrop {
                user: user.name.clone(),
                message: e.to_string(),
            }
        })?;
    }

    fleet.supervise().await?;
    tracing::info!("manager shut down cleanly");
    Ok(())
}

fn collect_standalone(cli: &Cli, config: &CompiledConfig) -> HashSet<String> {
    let mut standalone: HashSet<String> = cli.standalone.iter().cloned().collect();
    for instance in config.standalone() {
        if standalone.insert(instance.clone()) {
            tracing::info!(instance, "module marked standalone in config");
        }
    }
    standalone
}

#[cfg(unix)]
fn resolve_run_as_user(settings: &Settings) -> Result<Option<ResolvedUser>, BootError> {
    match &settings.run_as_user {
        Some(name) => supervisor::resolve_user(name)
            .map(Some)
            .map_err(|message| BootError::IdentityDrop {
                user: name.clone(),
                message,
            }),
        None => Ok(None),
    }
}

#[cfg(not(unix))]
fn resolve_run_as_user(_settings: &Settings) -> Result<Option<ResolvedUser>, BootError> {
    Ok(None)
}

fn dump_manifests(compiler: &Compiler, dir: &PathBuf) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let (manifests, failures) = compiler.manifests().load_all();
    for (module_type, error) in &failures {
        tracing::warn!(module_type, error = %error, "skipping invalid manifest");
    }
    for (module_type, manifest) in &manifests {
        let content = serde_yaml::to_string(manifest.as_ref())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(dir.join(format!("{module_type}.yaml")), content)?;
    }
    tracing::info!(
        dir = %dir.display(),
        manifests = manifests.len(),
        failures = failures.len(),
        "dumped all discovered manifests"
    );
    Ok(())
}
