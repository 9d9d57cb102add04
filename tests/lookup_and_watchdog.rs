// tests/lookup_and_watchdog.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use workervisor::lookup::{RemoteLookup, TcpLookup};
use workervisor::watchdog::{PingWatchdog, Watchdog};
use workervisor_test_utils::{CapturedLogs, eventually, init_tracing, with_timeout};

#[tokio::test]
async fn tcp_lookup_resolves_a_listening_worker() {
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let endpoint = with_timeout(TcpLookup::default().resolve("127.0.0.1", port, "svc/main"))
        .await
        .unwrap();

    assert_eq!(endpoint.addr.port(), port);
    assert_eq!(endpoint.name, "svc/main");
}

#[tokio::test]
async fn tcp_lookup_fails_when_nothing_listens() {
    init_tracing();

    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let result = with_timeout(
        TcpLookup::new(Duration::from_millis(500)).resolve("127.0.0.1", port, "gone"),
    )
    .await;

    let err = result.expect_err("nothing listens on the port");
    assert!(format!("{err:#}").contains(&port.to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_watchdog_keeps_pinging_a_live_worker() {
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let pings = Arc::new(AtomicUsize::new(0));
    {
        let pings = Arc::clone(&pings);
        tokio::spawn(async move {
            while listener.accept().await.is_ok() {
                pings.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    PingWatchdog::new(Duration::from_millis(20))
        .arm("127.0.0.1", port)
        .unwrap();

    eventually("at least two pings", || pings.load(Ordering::SeqCst) >= 2).await;
}

#[tokio::test]
async fn ping_watchdog_logs_when_armed() {
    let logs = CapturedLogs::new();
    let _guard = tracing::subscriber::set_default(logs.subscriber());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    PingWatchdog::new(Duration::from_secs(60))
        .arm("127.0.0.1", port)
        .expect("arming inside a runtime succeeds");

    let output = logs.contents();
    assert!(output.contains("watchdog armed"), "log output: {output}");
    assert!(output.contains(&format!("port={port}")), "log output: {output}");
    assert!(output.contains("127.0.0.1"), "log output: {output}");
}

#[test]
fn ping_watchdog_needs_a_runtime() {
    let result = PingWatchdog::new(Duration::from_millis(20)).arm("127.0.0.1", 1);
    assert!(result.is_err());
}
