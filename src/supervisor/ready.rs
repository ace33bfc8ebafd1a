//! # Readiness coordinator: the fleet-wide barrier.
//!
//! For each instance (standalones included) a handler is registered on
//! `<module prefix>/ready` before anything is spawned. The handler payload
//! is a boolean; everything else is logged and ignored.
//!
//! ## Barrier logic (under the shared mutex)
//! - Record the instance's ready flag (monotonic: true never reverts).
//! - If the set of non-ready instances equals the standalone set, report
//!   `WAITING_FOR_STANDALONE_MODULES` on the status channel.
//! - If every instance is ready, report `ALL_MODULES_STARTED` and publish
//!   the global ready signal on the bus. The barrier latches: replays
//!   cannot double-fire the publication.
//!
//! Registration of zero instances completes the barrier immediately.
//!
//! Teardown unregisters every handler token *before* clearing the ready
//! map, all under the mutex, so a late ready message finds either a fully
//! registered or a fully empty coordinator, never a half-torn one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::bus::{BusClient, BusHandler, Qos};
use crate::error::RuntimeError;
use crate::settings::Settings;
use crate::status_fifo::StatusFifo;
use crate::supervisor::{FleetState, ReadyInfo, SharedState};

/// Aggregates worker readiness into the fleet-ready signal.
pub struct ReadyTracker {
    state: SharedState,
    bus: Arc<dyn BusClient>,
    fifo: StatusFifo,
    settings: Arc<Settings>,
    standalone: HashSet<String>,
    started_at: Instant,
}

impl ReadyTracker {
    pub(crate) fn new(
        state: SharedState,
        bus: Arc<dyn BusClient>,
        fifo: StatusFifo,
        settings: Arc<Settings>,
        standalone: HashSet<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            bus,
            fifo,
            settings,
            standalone,
            started_at: Instant::now(),
        })
    }

    /// Registers the readiness handler of one instance. Must happen before
    /// the instance's worker is spawned.
    pub async fn register(self: Arc<Self>, instance: &str) -> Result<(), RuntimeError> {
        self.state
            .lock()
            .expect("fleet state poisoned")
            .ready
            .insert(instance.to_string(), ReadyInfo::default());

        let tracker = Arc::clone(&self);
        let subject = instance.to_string();
        let handler: BusHandler =
            Arc::new(move |_topic, payload| tracker.on_ready(&subject, payload));

        let topic = self.settings.ready_topic(instance);
        let token = self
            .bus
            .register_handler(&topic, Qos::ExactlyOnce, handler)
            .await?;

        let mut state = self.state.lock().expect("fleet state poisoned");
        if let Some(info) = state.ready.get_mut(instance) {
            info.token = Some(token);
        } else {
            // Teardown raced the registration: drop the handler again.
            drop(state);
            self.bus.unregister_handler(&token);
        }
        Ok(())
    }

    /// Called once every instance is registered; completes the barrier
    /// immediately when there is nothing to wait for.
    pub fn finish_registration(&self) {
        let mut state = self.state.lock().expect("fleet state poisoned");
        self.evaluate(&mut state);
    }

    /// True once the global ready signal has been published.
    pub fn barrier_fired(&self) -> bool {
        self.state
            .lock()
            .expect("fleet state poisoned")
            .barrier_fired
    }

    /// Ready flag of one instance.
    pub fn is_ready(&self, instance: &str) -> bool {
        self.state
            .lock()
            .expect("fleet state poisoned")
            .ready
            .get(instance)
            .map(|info| info.ready)
            .unwrap_or(false)
    }

    /// Unregisters every handler and clears the ready map, in that order,
    /// under the mutex.
    pub fn teardown(&self) {
        let mut state = self.state.lock().expect("fleet state poisoned");
        for info in state.ready.values_mut() {
            if let Some(token) = info.token.take() {
                self.bus.unregister_handler(&token);
            }
        }
        state.ready.clear();
    }

    fn on_ready(&self, instance: &str, payload: &Value) {
        let Some(flag) = payload.as_bool() else {
            tracing::warn!(
                instance,
                payload = %payload,
                "ignoring non-boolean readiness payload"
            );
            return;
        };

        let mut state = self.state.lock().expect("fleet state poisoned");
        let Some(info) = state.ready.get_mut(instance) else {
            tracing::debug!(instance, "readiness message after teardown, ignoring");
            return;
        };

        tracing::debug!(instance, ready = flag, "readiness update");
        info.ready = info.ready || flag;
        if flag && self.standalone.contains(instance) {
            tracing::info!(instance, "standalone module initialized");
        }
        self.evaluate(&mut state);
    }

    fn evaluate(&self, state: &mut FleetState) {
        if state.barrier_fired {
            return;
        }

        let non_ready: HashSet<&str> = state
            .ready
            .iter()
            .filter(|(_, info)| !info.ready)
            .map(|(name, _)| name.as_str())
            .collect();

        if non_ready.is_empty() {
            state.barrier_fired = true;
            self.fifo.update(StatusFifo::ALL_MODULES_STARTED);
            tracing::info!(
                modules = state.ready.len(),
                startup_ms = self.started_at.elapsed().as_millis() as u64,
                "all modules ready, fleet is up"
            );
            self.bus.publish(
                &self.settings.global_ready_topic(),
                &Value::Bool(true),
                Qos::ExactlyOnce,
            );
            return;
        }

        if !self.standalone.is_empty()
            && !state.waiting_reported
            && non_ready
                .iter()
                .all(|instance| self.standalone.contains(*instance))
            && non_ready.len() == self.standalone.len()
        {
            state.waiting_reported = true;
            self.fifo.update(StatusFifo::WAITING_FOR_STANDALONE_MODULES);
            tracing::info!("managed modules ready, waiting for standalone modules");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::settings::Overrides;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> Arc<Settings> {
        let configs = dir.path().join("etc").join("chargevisor");
        fs::create_dir_all(&configs).unwrap();
        fs::write(configs.join("config.yaml"), "{}\n").unwrap();
        Arc::new(
            Settings::new(Overrides {
                prefix: Some(dir.path().to_path_buf()),
                ..Overrides::default()
            })
            .unwrap(),
        )
    }

    struct Fixture {
        _dir: TempDir,
        bus: Arc<LocalBus>,
        tracker: Arc<ReadyTracker>,
        fifo_path: PathBuf,
        settings: Arc<Settings>,
    }

    async fn fixture(instances: &[&str], standalone: &[&str]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let fifo_path = dir.path().join("status");
        fs::write(&fifo_path, "").unwrap();

        let bus = Arc::new(LocalBus::new());
        let state: SharedState = Arc::new(Mutex::new(FleetState::default()));
        let tracker = ReadyTracker::new(
            Arc::clone(&state),
            bus.clone() as Arc<dyn BusClient>,
            StatusFifo::create_from_path(fifo_path.to_str().unwrap()),
            Arc::clone(&settings),
            standalone.iter().map(|s| s.to_string()).collect(),
        );
        for instance in instances {
            Arc::clone(&tracker).register(instance).await.unwrap();
        }
        tracker.finish_registration();
        Fixture {
            _dir: dir,
            bus,
            tracker,
            fifo_path,
            settings,
        }
    }

    #[tokio::test]
    async fn vacuous_barrier_completes_immediately() {
        let fx = fixture(&[], &[]).await;
        assert!(fx.tracker.barrier_fired());
        let status = fs::read_to_string(&fx.fifo_path).unwrap();
        assert_eq!(status, "ALL_MODULES_STARTED\n");
    }

    #[tokio::test]
    async fn barrier_waits_for_every_instance() {
        let fx = fixture(&["store", "evse"], &[]).await;
        assert!(!fx.tracker.barrier_fired());

        fx.bus.publish(
            &fx.settings.ready_topic("store"),
            &json!(true),
            Qos::ExactlyOnce,
        );
        assert!(fx.tracker.is_ready("store"));
        assert!(!fx.tracker.barrier_fired());

        fx.bus.publish(
            &fx.settings.ready_topic("evse"),
            &json!(true),
            Qos::ExactlyOnce,
        );
        assert!(fx.tracker.barrier_fired());
        let status = fs::read_to_string(&fx.fifo_path).unwrap();
        assert_eq!(status, "ALL_MODULES_STARTED\n");
    }

    #[tokio::test]
    async fn global_ready_is_published_once() {
        let fx = fixture(&["store"], &[]).await;
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&fired);
        fx.bus
            .register_handler(
                &fx.settings.global_ready_topic(),
                Qos::ExactlyOnce,
                Arc::new(move |_, payload| {
                    assert_eq!(payload, &json!(true));
                    seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        let topic = fx.settings.ready_topic("store");
        fx.bus.publish(&topic, &json!(true), Qos::ExactlyOnce);
        fx.bus.publish(&topic, &json!(true), Qos::ExactlyOnce);
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ready_flags_are_monotonic() {
        let fx = fixture(&["store", "evse"], &[]).await;
        let topic = fx.settings.ready_topic("store");
        fx.bus.publish(&topic, &json!(true), Qos::ExactlyOnce);
        fx.bus.publish(&topic, &json!(false), Qos::ExactlyOnce);
        assert!(fx.tracker.is_ready("store"));
    }

    #[tokio::test]
    async fn malformed_payload_is_ignored() {
        let fx = fixture(&["store"], &[]).await;
        let topic = fx.settings.ready_topic("store");
        fx.bus.publish(&topic, &json!({"ready": true}), Qos::ExactlyOnce);
        assert!(!fx.tracker.is_ready("store"));
        assert!(!fx.tracker.barrier_fired());
    }

    #[tokio::test]
    async fn waiting_for_standalone_is_reported() {
        let fx = fixture(&["store", "external"], &["external"]).await;
        fx.bus.publish(
            &fx.settings.ready_topic("store"),
            &json!(true),
            Qos::ExactlyOnce,
        );
        let status = fs::read_to_string(&fx.fifo_path).unwrap();
        assert_eq!(status, "WAITING_FOR_STANDALONE_MODULES\n");

        fx.bus.publish(
            &fx.settings.ready_topic("external"),
            &json!(true),
            Qos::ExactlyOnce,
        );
        let status = fs::read_to_string(&fx.fifo_path).unwrap();
        assert_eq!(
            status,
            "WAITING_FOR_STANDALONE_MODULES\nALL_MODULES_STARTED\n"
        );
    }

    #[tokio::test]
    async fn teardown_unregisters_before_clearing() {
        let fx = fixture(&["store"], &[]).await;
        fx.tracker.teardown();

        // A late ready message finds no registration and changes nothing.
        fx.bus.publish(
            &fx.settings.ready_topic("store"),
            &json!(true),
            Qos::ExactlyOnce,
        );
        assert!(!fx.tracker.barrier_fired());
        assert!(!fx.tracker.is_ready("store"));
    }
}
