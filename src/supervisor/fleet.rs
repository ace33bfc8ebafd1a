//! # Fleet: spawn the workers, watch them, tear them down together.
//!
//! The fleet enforces the all-or-nothing liveness policy: any child exit,
//! for any reason, at any time, takes the whole fleet down and makes the
//! manager return a failure exit code so an external supervisor can restart
//! it.
//!
//! ## Teardown timeline
//! ```text
//! trigger (child exit | OS signal | bus lost)
//!   → ReadyTracker::teardown()        (unregister, then clear, under mutex)
//!   → SIGTERM every live worker
//!   → wait up to the grace period
//!   → SIGKILL the stragglers
//!   → reap everything
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::bus::BusClient;
use crate::config::CompiledConfig;
use crate::error::{ArtifactError, RuntimeError, SuperviseError};
use crate::settings::Settings;
use crate::status_fifo::StatusFifo;
use crate::supervisor::spawn::{spawn_worker, SpawnRequest};
use crate::supervisor::{artifact, FleetState, ReadyTracker, ResolvedUser, SharedState};

/// Grace period between SIGTERM and SIGKILL during teardown.
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

struct WorkerExit {
    instance: String,
    pid: i32,
    status: String,
}

/// Owns the live worker set and drives it to a single exit decision.
pub struct Fleet {
    settings: Arc<Settings>,
    bus: Arc<dyn BusClient>,
    state: SharedState,
    ready: Arc<ReadyTracker>,
    user: Option<ResolvedUser>,
    children: JoinSet<WorkerExit>,
    grace: Duration,
}

impl Fleet {
    /// Creates the fleet and its readiness coordinator.
    ///
    /// `standalone` instances are awaited but not spawned; `user` is the
    /// pre-resolved identity workers drop to.
    pub fn new(
        settings: Arc<Settings>,
        bus: Arc<dyn BusClient>,
        fifo: StatusFifo,
        standalone: HashSet<String>,
        user: Option<ResolvedUser>,
    ) -> Self {
        let state: SharedState = Arc::new(Mutex::new(FleetState::default()));
        let ready = ReadyTracker::new(
            Arc::clone(&state),
            Arc::clone(&bus),
            fifo,
            Arc::clone(&settings),
            standalone,
        );
        Self {
            settings,
            bus,
            state,
            ready,
            user,
            children: JoinSet::new(),
            grace: TEARDOWN_GRACE,
        }
    }

    /// The readiness coordinator, for observing barrier state.
    pub fn ready(&self) -> &Arc<ReadyTracker> {
        &self.ready
    }

    /// Registers readiness for every non-ignored instance, then spawns the
    /// non-standalone ones. On any failure the already spawned workers are
    /// torn down before the error is returned.
    pub async fn start(
        &mut self,
        config: &CompiledConfig,
        ignored: &HashSet<String>,
        standalone: &HashSet<String>,
    ) -> Result<(), SuperviseError> {
        for instance in config.instances() {
            if ignored.contains(instance) {
                tracing::info!(instance, "ignoring module");
                continue;
            }
            if let Err(e) = Arc::clone(&self.ready).register(instance).await {
                self.ready.teardown();
                return Err(SuperviseError::Runtime(e));
            }
        }
        self.ready.finish_registration();

        for instance in config.instances() {
            if ignored.contains(instance) {
                continue;
            }
            if standalone.contains(instance) {
                tracing::info!(instance, "not starting standalone module");
                continue;
            }
            if let Err(e) = self.spawn_instance(config, instance) {
                tracing::error!(instance, error = %e, "spawn failed, tearing fleet down");
                self.teardown().await;
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn spawn_instance(
        &mut self,
        config: &CompiledConfig,
        instance: &str,
    ) -> Result<(), ArtifactError> {
        let module_type = config
            .module_type_of(instance)
            .expect("instance comes from the compiled config");
        let module_dir = self.settings.modules_dir.join(module_type);
        let artifact = artifact::probe(&module_dir, instance, module_type)?;
        let capabilities = config.capabilities_of(instance);
        let printable_name = config.printable_identifier(instance);

        tracing::debug!(
            instance,
            module_type,
            kind = artifact.kind.as_label(),
            path = %artifact.path.display(),
            "spawning worker"
        );

        let child = spawn_worker(&SpawnRequest {
            settings: &self.settings,
            instance,
            printable_name: &printable_name,
            artifact: &artifact,
            capabilities: &capabilities,
            user: self.user.as_ref(),
        })?;

        let pid = child.id().map(|pid| pid as i32).unwrap_or_default();
        self.state
            .lock()
            .expect("fleet state poisoned")
            .workers
            .insert(pid, instance.to_string());
        tracing::info!(instance, pid, kind = artifact.kind.as_label(), "worker forked");

        let name = instance.to_string();
        let state = Arc::clone(&self.state);
        self.children.spawn(async move {
            let mut child = child;
            let status = match child.wait().await {
                Ok(status) => status.to_string(),
                Err(e) => format!("wait failed: {e}"),
            };
            state
                .lock()
                .expect("fleet state poisoned")
                .workers
                .remove(&pid);
            WorkerExit {
                instance: name,
                pid,
                status,
            }
        });
        Ok(())
    }

    /// Blocks until the first exit-worthy event, tears the fleet down and
    /// reports the verdict. `Ok` means a signal-initiated clean shutdown.
    pub async fn supervise(&mut self) -> Result<(), SuperviseError> {
        let bus_lost = self.bus.disconnected();

        tokio::select! {
            signal = shutdown_signal() => {
                match signal {
                    Ok(()) => tracing::info!("termination signal received, shutting down"),
                    Err(e) => tracing::error!(error = %e, "signal handler failed, shutting down"),
                }
                self.teardown().await;
                Ok(())
            }
            _ = bus_lost.cancelled() => {
                tracing::error!("message bus lost, tearing fleet down");
                self.teardown().await;
                Err(RuntimeError::BusDisconnected {
                    message: "connection lost while supervising".into(),
                }
                .into())
            }
            exit = self.children.join_next(), if !self.children.is_empty() => {
                let error = match exit {
                    Some(Ok(exit)) => {
                        tracing::error!(
                            instance = exit.instance,
                            pid = exit.pid,
                            status = exit.status,
                            "worker exited, terminating all modules"
                        );
                        RuntimeError::WorkerExited {
                            instance: exit.instance,
                            pid: exit.pid,
                            status: exit.status,
                        }
                    }
                    Some(Err(e)) => RuntimeError::Syscall {
                        call: "waitpid",
                        message: e.to_string(),
                    },
                    None => unreachable!("guarded on non-empty children"),
                };
                self.teardown().await;
                Err(error.into())
            }
        }
    }

    /// Signal all, grace wait, escalate, reap.
    pub async fn teardown(&mut self) {
        self.ready.teardown();

        let workers: Vec<(i32, String)> = {
            let state = self.state.lock().expect("fleet state poisoned");
            state
                .workers
                .iter()
                .map(|(pid, instance)| (*pid, instance.clone()))
                .collect()
        };
        for (pid, instance) in &workers {
            match signal_worker(*pid, false) {
                Ok(()) => tracing::info!(instance, pid, "sent SIGTERM"),
                Err(e) => tracing::warn!(instance, pid, error = %e, "SIGTERM failed"),
            }
        }

        let deadline = Instant::now() + self.grace;
        while !self.children.is_empty() {
            match tokio::time::timeout_at(deadline, self.children.join_next()).await {
                Ok(Some(Ok(exit))) => {
                    tracing::info!(
                        instance = exit.instance,
                        pid = exit.pid,
                        status = exit.status,
                        "worker exited"
                    );
                }
                Ok(Some(Err(_))) | Ok(None) => {}
                Err(_) => break,
            }
        }

        let stragglers: Vec<(i32, String)> = {
            let state = self.state.lock().expect("fleet state poisoned");
            state
                .workers
                .iter()
                .map(|(pid, instance)| (*pid, instance.clone()))
                .collect()
        };
        for (pid, instance) in &stragglers {
            match signal_worker(*pid, true) {
                Ok(()) => tracing::warn!(instance, pid, "escalated to SIGKILL"),
                Err(e) => tracing::error!(instance, pid, error = %e, "SIGKILL failed"),
            }
        }
        while self.children.join_next().await.is_some() {}
        self.state
            .lock()
            .expect("fleet state poisoned")
            .workers
            .clear();
    }
}

#[cfg(unix)]
fn signal_worker(pid: i32, kill_hard: bool) -> Result<(), RuntimeError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let signal = if kill_hard {
        Signal::SIGKILL
    } else {
        Signal::SIGTERM
    };
    kill(Pid::from_raw(pid), signal).map_err(|e| RuntimeError::Syscall {
        call: "kill",
        message: e.to_string(),
    })
}

#[cfg(not(unix))]
fn signal_worker(_pid: i32, _kill_hard: bool) -> Result<(), RuntimeError> {
    Ok(())
}

/// Completes when the process receives a termination signal.
///
/// SIGINT, SIGTERM and SIGQUIT are handled on unix; plain ctrl-c elsewhere.
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
