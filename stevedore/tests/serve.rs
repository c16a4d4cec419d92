//! Launcher behaviour over real sockets.

use http::StatusCode;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use stevedore::launcher::{
    AppRegistration, AppService, BoundServer, DrainOutcome, LaunchConfig, Launcher, ServerStatus,
    ShutdownReport, TrustedProxyPolicy, app_fn, text_response,
};
use stevedore::{StevedoreError, StevedoreResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

fn slow_app() -> StevedoreResult<AppService> {
    Ok(app_fn(|req| async move {
        let delay = req
            .uri()
            .query()
            .and_then(|q| q.strip_prefix("ms="))
            .and_then(|ms| ms.parse().ok())
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        text_response(StatusCode::OK, "done")
    }))
}

fn broken_app() -> StevedoreResult<AppService> {
    Err(StevedoreError::Config("SLACK_BOT_TOKEN is not set".into()))
}

stevedore::inventory::submit! {
    AppRegistration::new("tests.slow", "app", slow_app)
}

stevedore::inventory::submit! {
    AppRegistration::new("tests.broken", "app", broken_app)
}

fn config(entry_point: &str) -> LaunchConfig {
    LaunchConfig {
        entry_point: entry_point.into(),
        host: "127.0.0.1".into(),
        port: 0,
        ..LaunchConfig::default()
    }
}

async fn start(config: LaunchConfig) -> BoundServer {
    Launcher::new(config).unwrap().start().await.unwrap()
}

async fn start_err(config: LaunchConfig) -> (StevedoreError, ServerStatus) {
    let launcher = Launcher::new(config).unwrap();
    let state = launcher.state();
    match launcher.start().await {
        Ok(_) => panic!("start should fail"),
        Err(e) => (e, state.status()),
    }
}

/// Serve in the background until the returned sender fires.
fn serve(server: BoundServer) -> (oneshot::Sender<()>, JoinHandle<StevedoreResult<ShutdownReport>>) {
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve_until(async {
        let _ = rx.await;
    }));
    (tx, handle)
}

async fn get(addr: SocketAddr, path: &str, headers: &[(&str, &str)]) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    let mut request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
    for (name, value) in headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

fn json_body(response: &str) -> Value {
    let body = response.split("\r\n\r\n").nth(1).unwrap_or_default();
    serde_json::from_str(body).unwrap()
}

#[tokio::test]
async fn test_health_probe() {
    let server = start(config("stevedore.diagnostics:app")).await;
    let addr = server.local_addr();
    let (stop, handle) = serve(server);

    let response = get(addr, "/health", &[]).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert_eq!(json_body(&response)["status"], "ok");

    stop.send(()).unwrap();
    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.outcome, DrainOutcome::Graceful);
    assert_eq!(report.connections, 1);
}

#[tokio::test]
async fn test_second_start_on_same_port_is_address_in_use() {
    let first = start(config("stevedore.diagnostics:app")).await;
    let port = first.local_addr().port();

    let mut second = config("stevedore.diagnostics:app");
    second.port = port;
    let (err, status) = start_err(second).await;

    assert!(matches!(err, StevedoreError::AddressInUse { .. }), "got {err:?}");
    assert_eq!(status, ServerStatus::Stopped);
    assert_eq!(first.state().status(), ServerStatus::Serving);
}

#[tokio::test]
async fn test_trusted_proxy_reports_forwarded_client() {
    let mut trusted = config("stevedore.diagnostics:app");
    trusted.proxy = TrustedProxyPolicy::AnyPeer;
    let server = start(trusted).await;
    let addr = server.local_addr();
    let (stop, handle) = serve(server);

    let response = get(
        addr,
        "/client",
        &[
            ("X-Forwarded-For", "203.0.113.7, 10.0.0.1"),
            ("X-Forwarded-Proto", "https"),
        ],
    )
    .await
    .unwrap();
    let client = json_body(&response);
    assert_eq!(client["host"], "203.0.113.7");
    assert_eq!(client["scheme"], "https");
    assert_eq!(client["forwarded"], true);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_proxy_headers_ignored_when_disabled_or_untrusted() {
    let untrusted = TrustedProxyPolicy::from_allow_list("10.0.0.0/8").unwrap();
    for policy in [TrustedProxyPolicy::Disabled, untrusted] {
        let mut launch = config("stevedore.diagnostics:app");
        launch.proxy = policy;
        let server = start(launch).await;
        let addr = server.local_addr();
        let (stop, handle) = serve(server);

        let response = get(
            addr,
            "/client",
            &[("X-Forwarded-For", "203.0.113.7"), ("X-Forwarded-Proto", "https")],
        )
        .await
        .unwrap();
        let client = json_body(&response);
        assert_eq!(client["host"], "127.0.0.1");
        assert_eq!(client["scheme"], "http");
        assert_eq!(client["forwarded"], false);

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_in_flight_request_completes_within_deadline() {
    let mut launch = config("tests.slow:app");
    launch.drain_timeout = Duration::from_secs(5);
    let server = start(launch).await;
    let addr = server.local_addr();
    let state = server.state();
    let (stop, handle) = serve(server);

    let request = tokio::spawn(async move { get(addr, "/work?ms=300", &[]).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.send(()).unwrap();

    let response = request.await.unwrap().unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with("done"));

    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.outcome, DrainOutcome::Graceful);
    assert_eq!(report.abandoned, 0);
    assert_eq!(state.status(), ServerStatus::Stopped);
    assert!(TcpStream::connect(addr).await.is_err(), "listener must be closed");
}

#[tokio::test]
async fn test_drain_deadline_forces_shutdown() {
    let mut launch = config("tests.slow:app");
    launch.drain_timeout = Duration::from_millis(200);
    let server = start(launch).await;
    let addr = server.local_addr();
    let (stop, handle) = serve(server);

    let request = tokio::spawn(async move { get(addr, "/work?ms=10000", &[]).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.send(()).unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("forced drain should return promptly")
        .unwrap()
        .unwrap();
    assert_eq!(report.outcome, DrainOutcome::Forced);
    assert_eq!(report.abandoned, 1);

    let response = request.await.unwrap().unwrap_or_default();
    assert!(!response.contains("done"));
}

#[tokio::test]
async fn test_entry_point_failures_bind_nothing() {
    for entry_point in ["tests.broken:app", "tests.slow:missing", "nowhere:api", "no-colon"] {
        let (err, status) = start_err(config(entry_point)).await;
        assert!(
            matches!(err, StevedoreError::EntryPointResolution { .. }),
            "{entry_point}: got {err:?}"
        );
        assert_eq!(status, ServerStatus::Stopped);
    }

    let (err, _) = start_err(config("tests.broken:app")).await;
    assert!(err.to_string().contains("application factory failed"));
    assert!(err.to_string().contains("SLACK_BOT_TOKEN"));
}
