//! Shared doubles for the external collaborators.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use forgelink::protocol::{
    BuildCommandPayload, BuildResultPayload, ConsoleStream, ConsoleWritePayload,
    ResolveRequestPayload, ResolveResponsePayload,
};
use forgelink::worker::{BuildEngine, NodeSender, ReferenceResolver, Resolution};
use forgelink::{AppError, Result};

/// Resolver that counts real resolution calls.
///
/// Names starting with `missing` fail; everything else resolves to a
/// deterministic path. An artificial delay widens race windows so
/// concurrency tests actually overlap.
pub struct CountingResolver {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingResolver {
    pub fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReferenceResolver for CountingResolver {
    fn resolve(
        &self,
        name: &str,
        version: Option<&str>,
        _min_version: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<Resolution>> + Send + '_>> {
        let name = name.to_owned();
        let version = version.map(str::to_owned);
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if name.starts_with("missing") {
                Err(AppError::Resolve(format!("no such reference: {name}")))
            } else {
                Ok(Resolution {
                    path: format!("/refs/{}", name.to_lowercase()),
                    version,
                })
            }
        })
    }
}

/// Node sender that collects routed responses into a channel.
pub struct CollectingSender {
    tx: mpsc::UnboundedSender<(i32, ResolveResponsePayload)>,
}

pub fn collecting_sender() -> (
    Arc<CollectingSender>,
    mpsc::UnboundedReceiver<(i32, ResolveResponsePayload)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(CollectingSender { tx }), rx)
}

impl NodeSender for CollectingSender {
    fn send(
        &self,
        node_id: i32,
        response: ResolveResponsePayload,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let outcome = self
            .tx
            .send((node_id, response))
            .map_err(|_| AppError::Transport("collector closed".into()));
        Box::pin(std::future::ready(outcome))
    }
}

/// Engine that plays a script: emit the configured console lines, then
/// either return the configured result or wait for cancellation.
pub struct ScriptedEngine {
    pub lines: Vec<String>,
    pub result: BuildResultPayload,
    pub wait_for_cancel: bool,
}

impl ScriptedEngine {
    pub fn succeeding(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|&l| l.to_owned()).collect(),
            result: BuildResultPayload {
                exit_code: 0,
                exit_type: "Success".to_owned(),
            },
            wait_for_cancel: false,
        }
    }
}

impl BuildEngine for ScriptedEngine {
    fn run(
        &self,
        _command: BuildCommandPayload,
        console: mpsc::Sender<ConsoleWritePayload>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = BuildResultPayload> + Send + '_>> {
        let lines = self.lines.clone();
        let result = self.result.clone();
        let wait_for_cancel = self.wait_for_cancel;
        Box::pin(async move {
            for text in lines {
                let _ = console
                    .send(ConsoleWritePayload {
                        stream: ConsoleStream::Stdout,
                        text,
                    })
                    .await;
            }
            if wait_for_cancel {
                cancel.cancelled().await;
                BuildResultPayload {
                    exit_code: 1,
                    exit_type: "Terminated".to_owned(),
                }
            } else {
                result
            }
        })
    }
}

/// Build a resolution request for tests.
pub fn resolve_request(
    submission_id: i32,
    node_id: i32,
    name: &str,
    version: Option<&str>,
) -> ResolveRequestPayload {
    ResolveRequestPayload {
        submission_id,
        node_id,
        name: name.to_owned(),
        version: version.map(str::to_owned),
        min_version: None,
        source_file: "pkg/app/app.proj".to_owned(),
        source_line: 4,
    }
}

/// Poll a condition for up to two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
