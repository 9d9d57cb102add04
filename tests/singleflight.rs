// tests/singleflight.rs

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, harness, init_tracing, params, with_timeout};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use workervisor::errors::SupervisorError;
use workervisor::registry::WorkerState;
use workervisor::types::Target;
use workervisor_test_utils::{FakeCapability, FakeLauncher, Script, Step, handshake_line};

const CALLERS: usize = 8;

fn spawn_callers(
    supervisor: &common::TestSupervisor,
    target: &Target,
    cfg: &Arc<String>,
) -> Vec<JoinHandle<workervisor::errors::Result<Arc<FakeCapability>>>> {
    (0..CALLERS)
        .map(|_| {
            let supervisor = supervisor.clone();
            let target = target.clone();
            let cfg = Arc::clone(cfg);
            tokio::spawn(async move {
                supervisor
                    .acquire(&target, cfg, &CancellationToken::new())
                    .await
            })
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquires_share_one_start() {
    init_tracing();

    let gate = Arc::new(Notify::new());
    let h = harness(FakeLauncher::new(Script::Run(vec![
        Step::Await(gate.clone()),
        handshake_line(4000, "shared"),
    ])));
    let target = Target::new("session");
    let cfg = params("model-a");

    let callers = spawn_callers(&h.supervisor, &target, &cfg);

    eventually("attempt to be pending", || {
        h.supervisor.worker_state(&target, &cfg) == Some(WorkerState::Pending)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.launcher.start_count(), 1);

    gate.notify_one();

    let mut capabilities = Vec::new();
    for caller in callers {
        let capability = with_timeout(caller).await.expect("caller panicked");
        capabilities.push(capability.expect("acquire should succeed"));
    }

    assert_eq!(h.launcher.start_count(), 1);
    assert_eq!(capabilities[0].port, 4000);
    assert_eq!(capabilities[0].name, "shared");
    for capability in &capabilities {
        assert!(Arc::ptr_eq(&capabilities[0], capability));
    }
    assert_eq!(
        h.supervisor.worker_state(&target, &cfg),
        Some(WorkerState::Running {
            port: 4000,
            name: "shared".to_string()
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_waiter_sees_a_failed_start() {
    init_tracing();

    let gate = Arc::new(Notify::new());
    let h = harness(FakeLauncher::new(Script::Run(vec![
        Step::Await(gate.clone()),
        Step::Stderr("boot error: model file missing".to_string()),
        Step::Exit(2),
    ])));
    let target = Target::new("session");
    let cfg = params("model-a");

    let callers = spawn_callers(&h.supervisor, &target, &cfg);

    eventually("attempt to be pending", || {
        h.supervisor.worker_state(&target, &cfg) == Some(WorkerState::Pending)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    gate.notify_one();

    for caller in callers {
        let result = with_timeout(caller).await.expect("caller panicked");
        match result {
            Err(SupervisorError::StartFailed(message)) => {
                assert!(message.contains("boot error"), "unexpected message: {message}");
            }
            other => panic!("expected StartFailed, got {other:?}"),
        }
    }

    assert_eq!(h.launcher.start_count(), 1);
    assert!(h.supervisor.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn running_worker_is_reused_with_its_cached_capability() {
    init_tracing();

    let h = harness(FakeLauncher::handshaking(4000, "worker"));
    let target = Target::new("session");
    let cancel = CancellationToken::new();

    let first = with_timeout(h.supervisor.acquire(&target, params("cfg"), &cancel))
        .await
        .expect("first acquire");
    // Equal parameters in a different allocation name the same key.
    let second = with_timeout(h.supervisor.acquire(&target, params("cfg"), &cancel))
        .await
        .expect("second acquire");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.launcher.start_count(), 1);
    assert_eq!(h.lookup.calls(), 1);
    assert_eq!(h.supervisor.active_configurations_for(&target).len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn distinct_targets_get_distinct_workers() {
    init_tracing();

    let h = harness(FakeLauncher::handshaking(4000, "worker"));
    // Same label, different identity.
    let a = Target::new("session");
    let b = Target::new("session");
    let cancel = CancellationToken::new();

    with_timeout(h.supervisor.acquire(&a, params("cfg"), &cancel))
        .await
        .expect("acquire for a");
    with_timeout(h.supervisor.acquire(&b, params("cfg"), &cancel))
        .await
        .expect("acquire for b");

    assert_eq!(h.launcher.start_count(), 2);
    assert_eq!(h.supervisor.active_configurations().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn different_parameters_get_distinct_workers() {
    init_tracing();

    let h = harness(FakeLauncher::handshaking(4000, "worker"));
    h.launcher.push_script(Script::handshake(4001, "first"));
    h.launcher.push_script(Script::handshake(4002, "second"));
    let target = Target::new("session");
    let cancel = CancellationToken::new();

    let first = with_timeout(h.supervisor.acquire(&target, params("a"), &cancel))
        .await
        .expect("acquire a");
    let second = with_timeout(h.supervisor.acquire(&target, params("b"), &cancel))
        .await
        .expect("acquire b");

    assert_eq!(first.port, 4001);
    assert_eq!(second.port, 4002);
    assert_eq!(
        h.launcher.started(),
        vec![
            "session:\"a\"".to_string(),
            "session:\"b\"".to_string()
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_lookup_keeps_the_worker_and_retries_only_the_lookup() {
    init_tracing();

    let h = harness(FakeLauncher::handshaking(4000, "worker"));
    h.lookup.fail_next("connection refused");
    let target = Target::new("session");
    let cfg = params("cfg");
    let cancel = CancellationToken::new();

    let first = with_timeout(h.supervisor.acquire(&target, Arc::clone(&cfg), &cancel)).await;
    match first {
        Err(SupervisorError::Lookup(err)) => {
            assert!(format!("{err:#}").contains("connection refused"));
        }
        other => panic!("expected Lookup error, got {other:?}"),
    }
    assert_eq!(
        h.supervisor.worker_state(&target, &cfg),
        Some(WorkerState::Running {
            port: 4000,
            name: "worker".to_string()
        })
    );

    let second = with_timeout(h.supervisor.acquire(&target, Arc::clone(&cfg), &cancel))
        .await
        .expect("second acquire");

    assert_eq!(second.serial, 2);
    assert_eq!(h.lookup.calls(), 2);
    assert_eq!(h.launcher.start_count(), 1);
}
