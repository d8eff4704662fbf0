//! Integration tests for client-session outcome classification.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use forgelink::client::{BuildRequest, ClientSession, ExitOutcome, SessionOptions};
use forgelink::rendezvous::NamedMarker;

fn request() -> BuildRequest {
    BuildRequest {
        args: vec!["build.proj".to_owned()],
        env: BTreeMap::new(),
        working_dir: ".".to_owned(),
        culture: String::new(),
        telemetry: None,
    }
}

/// Session with a worker exe that cannot exist, so any accidental launch
/// attempt fails loudly instead of leaving processes behind.
fn session(dir: &tempfile::TempDir) -> ClientSession {
    let worker_exe = dir.path().join("no-such-forgelinkd");
    let mut options = SessionOptions::new(worker_exe, dir.path().to_path_buf());
    options.warm_connect_budget = Duration::from_millis(200);
    options.cold_connect_budget = Duration::from_millis(400);
    ClientSession::new(options)
}

/// A present busy marker short-circuits to `ServerBusy` before any
/// connect attempt (a connect attempt would classify differently).
#[tokio::test]
async fn busy_marker_returns_server_busy_without_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(&dir);

    let _running = NamedMarker::try_acquire(
        dir.path(),
        &session.handshake().running_marker_name(),
    )
    .unwrap()
    .unwrap();
    let _busy =
        NamedMarker::try_acquire(dir.path(), &session.handshake().busy_marker_name())
            .unwrap()
            .unwrap();

    let started = std::time::Instant::now();
    let outcome = session.execute(request(), CancellationToken::new()).await;

    assert_eq!(outcome.outcome, ExitOutcome::ServerBusy);
    assert!(
        started.elapsed() < Duration::from_millis(150),
        "busy must be decided without a connect budget"
    );
}

/// A launch slot held by a concurrent client reports `ServerBusy`
/// immediately rather than waiting or spawning a duplicate.
#[tokio::test]
async fn held_launch_slot_returns_server_busy() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(&dir);

    let _launching = NamedMarker::try_acquire(
        dir.path(),
        &session.handshake().launch_marker_name(),
    )
    .unwrap()
    .unwrap();

    let outcome = session.execute(request(), CancellationToken::new()).await;
    assert_eq!(outcome.outcome, ExitOutcome::ServerBusy);
}

/// A spawn failure surfaces as `LaunchError` and is not retried.
#[tokio::test]
async fn failed_spawn_returns_launch_error() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(&dir);

    let outcome = session.execute(request(), CancellationToken::new()).await;
    assert_eq!(outcome.outcome, ExitOutcome::LaunchError);
}

/// A running marker with no listener behind it exhausts the warm budget
/// and reports `UnableToConnect`.
#[tokio::test]
async fn warm_server_without_listener_returns_unable_to_connect() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(&dir);

    let _running = NamedMarker::try_acquire(
        dir.path(),
        &session.handshake().running_marker_name(),
    )
    .unwrap()
    .unwrap();

    let outcome = session.execute(request(), CancellationToken::new()).await;
    assert_eq!(outcome.outcome, ExitOutcome::UnableToConnect);
}

/// Shutting down when no server is running is a clean no-op.
#[tokio::test]
async fn shutdown_without_server_is_success() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(&dir);

    let outcome = session.shutdown_server(CancellationToken::new()).await;
    assert_eq!(outcome, ExitOutcome::Success);
}

/// A busy server refuses shutdown.
#[tokio::test]
async fn shutdown_of_busy_server_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(&dir);

    let _running = NamedMarker::try_acquire(
        dir.path(),
        &session.handshake().running_marker_name(),
    )
    .unwrap()
    .unwrap();
    let _busy =
        NamedMarker::try_acquire(dir.path(), &session.handshake().busy_marker_name())
            .unwrap()
            .unwrap();

    let outcome = session.shutdown_server(CancellationToken::new()).await;
    assert_eq!(outcome, ExitOutcome::ServerBusy);
}
