//! Cold-start test against the real daemon binary.
//!
//! Exercises the full client path: no server discovered, launch guarded by
//! the launch slot, connect within the cold budget, one build round trip,
//! then a clean shutdown so no daemon outlives the test.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use forgelink::client::{BuildRequest, ClientSession, ExitOutcome, SessionOptions};
use forgelink::rendezvous::Discovery;

use super::test_helpers::wait_until;

fn daemon_exe() -> PathBuf {
    let path = PathBuf::from(env!("CARGO_BIN_EXE_forgelinkd"));
    // The daemon derives its identity from its canonical exe path; match it.
    path.canonicalize().unwrap_or(path)
}

#[tokio::test]
async fn cold_start_launches_builds_and_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = SessionOptions::new(daemon_exe(), dir.path().to_path_buf());
    options.cold_connect_budget = Duration::from_millis(20_000);
    let session = ClientSession::new(options);

    let discovery = Discovery::new(dir.path().to_path_buf(), session.handshake().clone());
    assert!(!discovery.is_server_running(), "the start must be cold");

    let request = BuildRequest {
        args: vec!["-nologo".to_owned(), "build.proj".to_owned()],
        env: BTreeMap::new(),
        working_dir: ".".to_owned(),
        culture: "en-US".to_owned(),
        telemetry: None,
    };
    let outcome = session.execute(request, CancellationToken::new()).await;

    assert_eq!(outcome.outcome, ExitOutcome::Success);
    assert!(
        outcome.result.is_some(),
        "a completed session carries the build result"
    );
    assert!(discovery.is_server_running(), "the daemon stays warm");

    // Second build reuses the warm daemon.
    let request = BuildRequest {
        args: vec!["build.proj".to_owned()],
        env: BTreeMap::new(),
        working_dir: ".".to_owned(),
        culture: "en-US".to_owned(),
        telemetry: None,
    };
    let outcome = session.execute(request, CancellationToken::new()).await;
    assert_eq!(outcome.outcome, ExitOutcome::Success);

    let shutdown = session.shutdown_server(CancellationToken::new()).await;
    assert_eq!(shutdown, ExitOutcome::Success);
    assert!(
        wait_until(|| !discovery.is_server_running()).await,
        "the daemon must release its markers on shutdown"
    );
}
