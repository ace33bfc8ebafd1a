//! Readiness barrier scenarios over the local loopback bus.
//!
//! These drive the fleet without spawning any real worker: standalone
//! instances are registered but never exec'd, so readiness can be simulated
//! by publishing on the loopback bus.

mod common;

use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use chargevisor::{BusClient, Compiler, Fleet, LocalBus, Qos, StatusFifo};
use common::*;

fn fifo_at(fixture: &Fixture) -> (StatusFifo, std::path::PathBuf) {
    let path = fixture.prefix().join("status");
    fs::write(&path, "").unwrap();
    (
        StatusFifo::create_from_path(path.to_str().unwrap()),
        path,
    )
}

#[tokio::test]
async fn empty_deployment_reaches_the_barrier_immediately() {
    let fixture = Fixture::new();
    fixture.deployment("{}\n");
    let settings = fixture.settings();
    let config = Compiler::new(Arc::clone(&settings))
        .unwrap()
        .compile()
        .unwrap();

    let (fifo, fifo_path) = fifo_at(&fixture);
    let bus: Arc<dyn BusClient> = Arc::new(LocalBus::new());
    let mut fleet = Fleet::new(settings, bus, fifo, HashSet::new(), None);
    fleet
        .start(&config, &HashSet::new(), &HashSet::new())
        .await
        .unwrap();

    assert!(fleet.ready().barrier_fired());
    assert_eq!(
        fs::read_to_string(&fifo_path).unwrap(),
        "ALL_MODULES_STARTED\n"
    );
}

#[tokio::test]
async fn standalone_instance_gates_the_barrier_until_ready() {
    let fixture = Fixture::new();
    with_valid_module(&fixture);
    fixture.deployment("valid_module:\n  module: TESTValidManifest\n  standalone: true\n");
    let settings = fixture.settings();
    let config = Compiler::new(Arc::clone(&settings))
        .unwrap()
        .compile()
        .unwrap();

    let standalone: HashSet<String> = config.standalone().iter().cloned().collect();
    assert!(standalone.contains("valid_module"));

    let (fifo, fifo_path) = fifo_at(&fixture);
    let bus = Arc::new(LocalBus::new());

    // Observe the global ready signal.
    let fired = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&fired);
    bus.register_handler(
        &settings.global_ready_topic(),
        Qos::ExactlyOnce,
        Arc::new(move |_, payload| {
            assert_eq!(payload, &json!(true));
            seen.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .await
    .unwrap();

    let mut fleet = Fleet::new(
        Arc::clone(&settings),
        Arc::clone(&bus) as Arc<dyn BusClient>,
        fifo,
        standalone.clone(),
        None,
    );
    fleet
        .start(&config, &HashSet::new(), &standalone)
        .await
        .unwrap();

    // Nothing was spawned; the externally started worker is still missing.
    assert!(!fleet.ready().barrier_fired());

    bus.publish(
        &settings.ready_topic("valid_module"),
        &json!(true),
        Qos::ExactlyOnce,
    );
    assert!(fleet.ready().barrier_fired());
    assert!(fleet.ready().is_ready("valid_module"));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(
        fs::read_to_string(&fifo_path).unwrap(),
        "ALL_MODULES_STARTED\n"
    );
}

#[tokio::test]
async fn ignored_instances_do_not_gate_the_barrier() {
    let fixture = Fixture::new();
    with_valid_module(&fixture);
    fixture.deployment("valid_module:\n  module: TESTValidManifest\n");
    let settings = fixture.settings();
    let config = Compiler::new(Arc::clone(&settings))
        .unwrap()
        .compile()
        .unwrap();

    let (fifo, _) = fifo_at(&fixture);
    let bus: Arc<dyn BusClient> = Arc::new(LocalBus::new());
    let ignored: HashSet<String> = ["valid_module".to_string()].into();

    let mut fleet = Fleet::new(settings, bus, fifo, HashSet::new(), None);
    fleet
        .start(&config, &ignored, &HashSet::new())
        .await
        .unwrap();

    // The only instance is ignored, so the barrier is vacuous.
    assert!(fleet.ready().barrier_fired());
}

#[tokio::test]
async fn teardown_forgets_readiness_state() {
    let fixture = Fixture::new();
    with_valid_module(&fixture);
    fixture.deployment("valid_module:\n  module: TESTValidManifest\n  standalone: true\n");
    let settings = fixture.settings();
    let config = Compiler::new(Arc::clone(&settings))
        .unwrap()
        .compile()
        .unwrap();

    let standalone: HashSet<String> = config.standalone().iter().cloned().collect();
    let (fifo, _) = fifo_at(&fixture);
    let bus = Arc::new(LocalBus::new());

    let mut fleet = Fleet::new(
        Arc::clone(&settings),
        Arc::clone(&bus) as Arc<dyn BusClient>,
        fifo,
        standalone.clone(),
        None,
    );
    fleet
        .start(&config, &HashSet::new(), &standalone)
        .await
        .unwrap();
    fleet.teardown().await;

    // A late readiness message after teardown must not fire the barrier.
    bus.publish(
        &settings.ready_topic("valid_module"),
        &json!(true),
        Qos::ExactlyOnce,
    );
    assert!(!fleet.ready().barrier_fired());
}
