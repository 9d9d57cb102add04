// tests/release_and_stop.rs

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, eventually, harness, init_tracing, params, with_timeout};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use workervisor::errors::{Result, SupervisorError};
use workervisor::launch::ProcessHandle;
use workervisor::types::Target;
use workervisor_test_utils::{FakeCapability, FakeLauncher, Script, Step, handshake_line};

fn spawn_acquire(
    h: &Harness,
    target: &Target,
    cfg: &Arc<String>,
) -> JoinHandle<Result<Arc<FakeCapability>>> {
    let supervisor = h.supervisor.clone();
    let target = target.clone();
    let cfg = Arc::clone(cfg);
    tokio::spawn(async move {
        supervisor
            .acquire(&target, cfg, &CancellationToken::new())
            .await
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn release_is_scoped_to_target_and_parameters() {
    init_tracing();

    let h = harness(FakeLauncher::handshaking(4000, "worker"));
    let t1 = Target::new("t1");
    let t2 = Target::new("t2");
    let p1 = params("a");
    let p2 = params("b");
    let p3 = params("a");
    let cancel = CancellationToken::new();

    for (target, cfg) in [(&t1, &p1), (&t1, &p2), (&t2, &p3)] {
        with_timeout(h.supervisor.acquire(target, Arc::clone(cfg), &cancel))
            .await
            .expect("acquire");
    }
    let handles = h.launcher.handles();
    assert_eq!(handles.len(), 3);

    let teardown = h.supervisor.release(&t1, Some(&p1));
    assert_eq!(teardown.len(), 1);
    with_timeout(teardown.wait()).await;

    assert!(handles[0].is_terminated());
    assert!(!handles[1].is_dying());
    assert!(!handles[2].is_dying());
    eventually("t1/a to be removed", || {
        h.supervisor.active_configurations_for(&t1).len() == 1
    })
    .await;
    assert!(Arc::ptr_eq(&h.supervisor.active_configurations_for(&t1)[0], &p2));

    with_timeout(h.supervisor.release(&t1, None).wait()).await;

    assert!(handles[1].is_terminated());
    assert!(!handles[2].is_dying());
    eventually("t1 to be empty", || {
        h.supervisor.active_configurations_for(&t1).is_empty()
    })
    .await;
    assert_eq!(h.supervisor.active_configurations_for(&t2).len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn release_filter_matches_the_parameters_allocation() {
    init_tracing();

    let h = harness(FakeLauncher::handshaking(4000, "worker"));
    let target = Target::new("session");
    let cfg = params("a");

    with_timeout(h.supervisor.acquire(&target, Arc::clone(&cfg), &CancellationToken::new()))
        .await
        .expect("acquire");

    // Equal value, different allocation: nothing to release.
    let teardown = h.supervisor.release(&target, Some(&params("a")));
    assert!(teardown.is_empty());
    teardown.wait().await;
    assert_eq!(h.launcher.handles()[0].destroy_calls(), 0);

    let teardown = h.supervisor.release(&target, Some(&cfg));
    assert_eq!(teardown.len(), 1);
    with_timeout(teardown.wait()).await;
    assert!(h.launcher.handles()[0].is_terminated());
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_all_is_idempotent() {
    init_tracing();

    let h = harness(FakeLauncher::handshaking(4000, "worker"));
    let cancel = CancellationToken::new();
    with_timeout(h.supervisor.acquire(&Target::new("a"), params("cfg"), &cancel))
        .await
        .expect("acquire a");
    with_timeout(h.supervisor.acquire(&Target::new("b"), params("cfg"), &cancel))
        .await
        .expect("acquire b");

    let stopped = with_timeout(h.supervisor.stop_all(true)).await;
    assert_eq!(stopped, 2);
    for handle in h.launcher.handles() {
        assert!(handle.is_terminated());
    }

    let stopped_again = with_timeout(h.supervisor.stop_all(true)).await;
    assert_eq!(stopped_again, 0);
    for handle in h.launcher.handles() {
        assert_eq!(handle.destroy_calls(), 1);
    }

    eventually("registry to drain", || h.supervisor.registry().is_empty()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_all_without_wait_returns_before_exit() {
    init_tracing();

    let h = harness(FakeLauncher::handshaking(4000, "worker").with_exit_delay(Duration::from_millis(300)));
    with_timeout(h.supervisor.acquire(
        &Target::new("session"),
        params("cfg"),
        &CancellationToken::new(),
    ))
    .await
    .expect("acquire");

    let stopped = h.supervisor.stop_all(false).await;
    assert_eq!(stopped, 1);

    let handle = &h.launcher.handles()[0];
    assert!(handle.is_terminating());
    eventually("worker to exit", || handle.is_terminated()).await;
    eventually("registry to drain", || h.supervisor.registry().is_empty()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn dying_worker_is_not_reused() {
    init_tracing();

    let h = harness(FakeLauncher::handshaking(4002, "new").with_exit_delay(Duration::from_millis(300)));
    h.launcher.push_script(Script::handshake(4001, "old"));
    let target = Target::new("session");
    let cancel = CancellationToken::new();

    let old = with_timeout(h.supervisor.acquire(&target, params("cfg"), &cancel))
        .await
        .expect("first acquire");
    assert_eq!(old.port, 4001);

    let old_handle = Arc::clone(&h.launcher.handles()[0]);
    old_handle.destroy();

    let new = with_timeout(h.supervisor.acquire(&target, params("cfg"), &cancel))
        .await
        .expect("second acquire");

    assert_eq!(new.port, 4002);
    assert!(old_handle.is_terminated());
    assert_eq!(h.launcher.start_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn closing_the_target_tears_its_workers_down() {
    init_tracing();

    let h = harness(FakeLauncher::handshaking(4000, "worker"));
    let doomed = Target::new("doomed");
    let survivor = Target::new("survivor");
    let cancel = CancellationToken::new();

    with_timeout(h.supervisor.acquire(&doomed, params("cfg"), &cancel))
        .await
        .expect("acquire doomed");
    with_timeout(h.supervisor.acquire(&survivor, params("cfg"), &cancel))
        .await
        .expect("acquire survivor");

    doomed.close();
    assert!(doomed.is_closed());

    let handles = h.launcher.handles();
    eventually("doomed worker to exit", || handles[0].is_terminated()).await;
    eventually("doomed entry to be removed", || {
        h.supervisor.active_configurations_for(&doomed).is_empty()
    })
    .await;
    assert!(!handles[1].is_dying());
    assert_eq!(h.supervisor.active_configurations_for(&survivor).len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn observer_fires_on_every_registry_transition() {
    init_tracing();

    let h = harness(FakeLauncher::handshaking(4000, "worker"));
    let target = Target::new("session");

    with_timeout(h.supervisor.acquire(&target, params("cfg"), &CancellationToken::new()))
        .await
        .expect("acquire");
    // Pending, then Running.
    assert_eq!(h.observer.count(), 2);

    with_timeout(h.supervisor.release(&target, None).wait()).await;
    // Release request, then removal of the exited worker.
    eventually("removal to be observed", || h.observer.count() == 4).await;

    // Nothing left to tear down: no notification.
    h.supervisor.release(&target, None).wait().await;
    assert_eq!(h.supervisor.stop_all(true).await, 0);
    assert_eq!(h.observer.count(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn aborted_teardown_still_requested_termination() {
    init_tracing();

    let h = harness(FakeLauncher::handshaking(4000, "worker").with_exit_delay(Duration::from_secs(1)));
    let target = Target::new("session");

    with_timeout(h.supervisor.acquire(&target, params("cfg"), &CancellationToken::new()))
        .await
        .expect("acquire");

    let teardown = h.supervisor.release(&target, None);
    teardown.abort();
    eventually("teardown task to stop", || teardown.is_finished()).await;

    let handle = &h.launcher.handles()[0];
    assert!(handle.is_terminating());
    assert!(!handle.is_terminated());
}

#[tokio::test(flavor = "multi_thread")]
async fn release_works_from_a_thread_without_a_runtime() {
    init_tracing();

    let h = harness(FakeLauncher::handshaking(4000, "worker"));
    let target = Target::new("session");

    with_timeout(h.supervisor.acquire(&target, params("cfg"), &CancellationToken::new()))
        .await
        .expect("acquire");

    let teardown = {
        let supervisor = h.supervisor.clone();
        let target = target.clone();
        std::thread::spawn(move || supervisor.release(&target, None))
            .join()
            .expect("release panicked on a plain thread")
    };
    assert_eq!(teardown.len(), 1);

    with_timeout(teardown.wait()).await;
    assert!(h.launcher.handles()[0].is_terminated());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn releasing_a_pending_worker_fails_its_waiters_and_frees_the_key() {
    init_tracing();

    let gate = Arc::new(Notify::new());
    let h = harness(
        FakeLauncher::handshaking(4002, "fresh").with_exit_delay(Duration::from_millis(300)),
    );
    h.launcher.push_script(Script::Run(vec![
        Step::Await(gate.clone()),
        handshake_line(4001, "doomed"),
    ]));
    let target = Target::new("session");
    let cfg = params("cfg");

    let waiters: Vec<_> = (0..3).map(|_| spawn_acquire(&h, &target, &cfg)).collect();
    eventually("attempt to be launched", || h.launcher.handles().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let teardown = h.supervisor.release(&target, None);
    assert_eq!(teardown.len(), 1);

    // Arrives while the pending worker is still shutting down.
    let late = spawn_acquire(&h, &target, &cfg);

    for waiter in waiters {
        match with_timeout(waiter).await.expect("waiter panicked") {
            Err(SupervisorError::StartFailed(_)) => {}
            other => panic!("expected StartFailed, got {other:?}"),
        }
    }

    let fresh = with_timeout(late)
        .await
        .expect("late caller panicked")
        .expect("late caller gets a fresh worker");
    assert_eq!(fresh.port, 4002);
    assert_eq!(fresh.name, "fresh");
    assert_eq!(h.launcher.start_count(), 2);

    with_timeout(teardown.wait()).await;
    assert!(h.launcher.handles()[0].is_terminated());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn closing_the_owner_of_a_pending_worker_fails_its_waiters() {
    init_tracing();

    let gate = Arc::new(Notify::new());
    let h = harness(FakeLauncher::new(Script::Run(vec![
        Step::Await(gate.clone()),
        handshake_line(4000, "never"),
    ])));
    let target = Target::new("session");
    let cfg = params("cfg");

    let waiters: Vec<_> = (0..2).map(|_| spawn_acquire(&h, &target, &cfg)).collect();
    eventually("attempt to be launched", || h.launcher.handles().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    target.close();

    for waiter in waiters {
        match with_timeout(waiter).await.expect("waiter panicked") {
            Err(SupervisorError::StartFailed(_)) => {}
            other => panic!("expected StartFailed, got {other:?}"),
        }
    }
    eventually("registry to drain", || h.supervisor.registry().is_empty()).await;

    let again = with_timeout(h.supervisor.acquire(&target, cfg, &CancellationToken::new())).await;
    assert!(matches!(again, Err(SupervisorError::TargetClosed(_))));
    assert_eq!(h.launcher.start_count(), 1);
}
