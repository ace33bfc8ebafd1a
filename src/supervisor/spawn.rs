//! # Worker spawning: argv, environment, pre-exec chain.
//!
//! Each artifact kind gets a language-appropriate invocation:
//!
//! - native: `<artifact> --prefix <P> --conf <C> --module <instance>`, with
//!   argv0 set to the printable identifier;
//! - script: `node --unhandled-rejections=strict <artifact>` with
//!   `NODE_PATH` and the `EV_*` environment;
//! - interpreted: `python3 <artifact>` with `PYTHONPATH` and the `EV_*`
//!   environment.
//!
//! The pre-exec chain runs in the forked child, in order: install the
//! parent-death signal, self-terminate if the parent died before the signal
//! was armed, raise the declared ambient capabilities, drop to the
//! configured identity. Any pre-exec or exec failure travels back through
//! the runtime's close-on-exec pipe and surfaces as a spawn error, which
//! keeps pre-exec failure distinguishable from a normal child exit.

use std::path::PathBuf;
use std::process::Command as StdCommand;

use tokio::process::{Child, Command};

use crate::error::ArtifactError;
use crate::settings::Settings;
use crate::supervisor::artifact::{Artifact, ArtifactKind};
use crate::supervisor::privileges::{self, ResolvedUser};

const NODE_RUNTIME: &str = "node";
const PYTHON_RUNTIME: &str = "python3";
const LIB_SUBDIR: &str = "lib/chargevisor";

/// Everything a single spawn needs, borrowed from the fleet.
pub(crate) struct SpawnRequest<'a> {
    pub settings: &'a Settings,
    pub instance: &'a str,
    pub printable_name: &'a str,
    pub artifact: &'a Artifact,
    pub capabilities: &'a [String],
    pub user: Option<&'a ResolvedUser>,
}

/// Spawns one worker process.
pub(crate) fn spawn_worker(request: &SpawnRequest<'_>) -> Result<Child, ArtifactError> {
    let capability_bits = privileges::resolve_capabilities(request.capabilities)?;
    if !request.capabilities.is_empty() {
        tracing::info!(
            instance = request.instance,
            capabilities = ?request.capabilities,
            "worker requests ambient capabilities"
        );
    }

    let mut command = assemble_command(request);

    #[cfg(unix)]
    install_pre_exec(&mut command, capability_bits, request.user.cloned());
    #[cfg(not(unix))]
    let _ = capability_bits;

    Command::from(command)
        .spawn()
        .map_err(|e| ArtifactError::SpawnFailed {
            instance: request.instance.to_string(),
            message: e.to_string(),
        })
}

fn assemble_command(request: &SpawnRequest<'_>) -> StdCommand {
    let settings = request.settings;
    let artifact = request.artifact;

    match artifact.kind {
        ArtifactKind::Native => {
            let mut command = StdCommand::new(&artifact.path);
            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt;
                command.arg0(request.printable_name);
            }
            command
                .arg("--prefix")
                .arg(&settings.prefix)
                .arg("--conf")
                .arg(&settings.config_file)
                .arg("--module")
                .arg(request.instance);
            command
        }
        ArtifactKind::Script => {
            let mut command = StdCommand::new(NODE_RUNTIME);
            command
                .arg("--unhandled-rejections=strict")
                .arg(&artifact.path);
            command.env("NODE_PATH", node_modules_path(settings));
            worker_env(&mut command, request);
            command
        }
        ArtifactKind::Interpreted => {
            let mut command = StdCommand::new(PYTHON_RUNTIME);
            command.arg(&artifact.path);
            command.env("PYTHONPATH", python_lib_path(settings));
            worker_env(&mut command, request);
            command
        }
    }
}

fn worker_env(command: &mut StdCommand, request: &SpawnRequest<'_>) {
    let settings = request.settings;
    command
        .env("EV_MODULE", request.instance)
        .env("EV_PREFIX", &settings.prefix)
        .env("EV_CONF_FILE", &settings.config_file);
    if settings.validate_schema {
        command.env("EV_VALIDATE_SCHEMA", "1");
    } else {
        command.env("EV_DONT_VALIDATE_SCHEMA", "");
    }
}

fn node_modules_path(settings: &Settings) -> PathBuf {
    settings.prefix.join(LIB_SUBDIR).join("node_modules")
}

fn python_lib_path(settings: &Settings) -> PathBuf {
    settings.prefix.join(LIB_SUBDIR).join("python")
}

/// Arms the child-side chain: pdeathsig, orphan check, capabilities,
/// identity drop. Only async-signal-safe calls run here; the passwd entry
/// was resolved before the fork.
#[cfg(unix)]
fn install_pre_exec(command: &mut StdCommand, capability_bits: Vec<u32>, user: Option<ResolvedUser>) {
    use std::io;
    use std::os::unix::process::CommandExt;

    let parent_pid = std::process::id() as libc::pid_t;

    unsafe {
        command.pre_exec(move || {
            #[cfg(target_os = "linux")]
            {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM, 0, 0, 0) != 0 {
                    return Err(io::Error::last_os_error());
                }
                // The parent may have died between fork and prctl; mirror
                // the signal it would have delivered.
                if libc::getppid() != parent_pid {
                    libc::raise(libc::SIGTERM);
                }
            }
            #[cfg(not(target_os = "linux"))]
            let _ = parent_pid;

            if !capability_bits.is_empty() {
                privileges::keep_caps()?;
                privileges::set_ambient_caps(&capability_bits)?;
            }
            if let Some(user) = &user {
                privileges::apply_identity(user)?;
            }
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Overrides, Settings};
    use std::fs;
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> Settings {
        let configs = dir.path().join("etc").join("chargevisor");
        fs::create_dir_all(&configs).unwrap();
        fs::write(configs.join("config.yaml"), "{}\n").unwrap();
        Settings::new(Overrides {
            prefix: Some(dir.path().to_path_buf()),
            ..Overrides::default()
        })
        .unwrap()
    }

    fn artifact(kind: ArtifactKind, path: &str) -> Artifact {
        Artifact {
            kind,
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn native_argv_carries_prefix_conf_and_module() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let artifact = artifact(ArtifactKind::Native, "/opt/mods/EvseManager/EvseManager");
        let command = assemble_command(&SpawnRequest {
            settings: &settings,
            instance: "evse",
            printable_name: "EvseManager:evse",
            artifact: &artifact,
            capabilities: &[],
            user: None,
        });

        let args: Vec<_> = command
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(args[0], "--prefix");
        assert_eq!(args[2], "--conf");
        assert_eq!(args[4], "--module");
        assert_eq!(args[5], "evse");
    }

    #[test]
    fn script_invocation_sets_node_environment() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let artifact = artifact(ArtifactKind::Script, "/opt/mods/JsEvse/index.js");
        let command = assemble_command(&SpawnRequest {
            settings: &settings,
            instance: "js_evse",
            printable_name: "JsEvse:js_evse",
            artifact: &artifact,
            capabilities: &[],
            user: None,
        });

        assert_eq!(command.get_program(), NODE_RUNTIME);
        let env: Vec<_> = command
            .get_envs()
            .filter_map(|(k, v)| Some((k.to_string_lossy().to_string(), v?.to_owned())))
            .collect();
        assert!(env.iter().any(|(k, _)| k == "NODE_PATH"));
        assert!(env.iter().any(|(k, v)| k == "EV_MODULE" && v == "js_evse"));
        assert!(env.iter().any(|(k, _)| k == "EV_VALIDATE_SCHEMA"));
    }

    #[test]
    fn disabled_validation_flips_the_env_pair() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(&dir);
        settings.validate_schema = false;
        let artifact = artifact(ArtifactKind::Interpreted, "/opt/mods/PyEvse/module.py");
        let command = assemble_command(&SpawnRequest {
            settings: &settings,
            instance: "py_evse",
            printable_name: "PyEvse:py_evse",
            artifact: &artifact,
            capabilities: &[],
            user: None,
        });

        assert_eq!(command.get_program(), PYTHON_RUNTIME);
        let keys: Vec<_> = command
            .get_envs()
            .map(|(k, _)| k.to_string_lossy().to_string())
            .collect();
        assert!(keys.contains(&"PYTHONPATH".to_string()));
        assert!(keys.contains(&"EV_DONT_VALIDATE_SCHEMA".to_string()));
        assert!(!keys.contains(&"EV_VALIDATE_SCHEMA".to_string()));
    }
}
