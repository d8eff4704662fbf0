//! Build engine seam and the default command-running implementation.
//!
//! The worker server drives whatever implements [`BuildEngine`]; the
//! evaluation and task-execution semantics live outside this crate. The
//! bundled [`CommandEngine`] hosts an external tool process per build,
//! streaming its output back as console events.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::{BuildCommandPayload, BuildResultPayload, ConsoleStream, ConsoleWritePayload};

/// Exit type reported for a clean zero exit.
pub const EXIT_TYPE_SUCCESS: &str = "Success";
/// Exit type reported for a non-zero exit.
pub const EXIT_TYPE_BUILD_FAILURE: &str = "BuildFailure";
/// Exit type reported when the build was cancelled or killed by a signal.
pub const EXIT_TYPE_TERMINATED: &str = "Terminated";

/// The build execution collaborator.
///
/// `run` consumes one fully-formed build command, emits console events
/// while it works, and always produces a terminal result — cancellation is
/// cooperative and surfaces as a `Terminated` result, never as an abort.
pub trait BuildEngine: Send + Sync {
    /// Execute one build to completion.
    fn run(
        &self,
        command: BuildCommandPayload,
        console: mpsc::Sender<ConsoleWritePayload>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = BuildResultPayload> + Send + '_>>;
}

/// Default engine: runs the configured tool binary as a child process.
///
/// The child gets the command's argument list, environment map, and working
/// directory verbatim; its stdout/stderr lines stream back as console
/// events. On cancellation the child is killed and the result reports
/// `Terminated`.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    tool_exe: PathBuf,
}

impl CommandEngine {
    /// Create an engine hosting the given tool binary.
    #[must_use]
    pub fn new(tool_exe: PathBuf) -> Self {
        Self { tool_exe }
    }

    async fn run_inner(
        &self,
        command: BuildCommandPayload,
        console: mpsc::Sender<ConsoleWritePayload>,
        cancel: CancellationToken,
    ) -> BuildResultPayload {
        let mut cmd = Command::new(&self.tool_exe);
        cmd.args(&command.args)
            .env_clear()
            .envs(&command.env)
            .current_dir(&command.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !command.culture.is_empty() {
            cmd.env("LANG", &command.culture);
        }
        if command.console.accepts_color {
            cmd.env("CLICOLOR_FORCE", "1");
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(tool = %self.tool_exe.display(), %err, "failed to spawn build tool");
                report(
                    &console,
                    ConsoleStream::Stderr,
                    format!("forgelinkd: cannot start build tool: {err}\n"),
                )
                .await;
                return BuildResultPayload {
                    exit_code: 1,
                    exit_type: EXIT_TYPE_BUILD_FAILURE.to_owned(),
                };
            }
        };

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward(out, ConsoleStream::Stdout, console.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward(err, ConsoleStream::Stderr, console.clone())));

        let status = tokio::select! {
            status = child.wait() => Some(status),
            () = cancel.cancelled() => None,
        };

        let result = match status {
            Some(Ok(status)) => {
                let exit_code = status.code().unwrap_or(-1);
                let exit_type = if status.success() {
                    EXIT_TYPE_SUCCESS
                } else if status.code().is_none() {
                    EXIT_TYPE_TERMINATED
                } else {
                    EXIT_TYPE_BUILD_FAILURE
                };
                BuildResultPayload {
                    exit_code,
                    exit_type: exit_type.to_owned(),
                }
            }
            Some(Err(err)) => {
                warn!(%err, "error waiting for build tool");
                BuildResultPayload {
                    exit_code: 1,
                    exit_type: EXIT_TYPE_BUILD_FAILURE.to_owned(),
                }
            }
            None => {
                debug!("build cancelled; killing build tool");
                if let Err(err) = child.kill().await {
                    warn!(%err, "failed to kill build tool");
                }
                BuildResultPayload {
                    exit_code: 1,
                    exit_type: EXIT_TYPE_TERMINATED.to_owned(),
                }
            }
        };

        // Let both pipes drain so every console line precedes the result.
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        result
    }
}

impl BuildEngine for CommandEngine {
    fn run(
        &self,
        command: BuildCommandPayload,
        console: mpsc::Sender<ConsoleWritePayload>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = BuildResultPayload> + Send + '_>> {
        Box::pin(self.run_inner(command, console, cancel))
    }
}

/// Forward one child pipe to the console channel, line by line.
async fn forward<R>(pipe: R, stream: ConsoleStream, console: mpsc::Sender<ConsoleWritePayload>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        report(&console, stream, format!("{line}\n")).await;
    }
}

async fn report(console: &mpsc::Sender<ConsoleWritePayload>, stream: ConsoleStream, text: String) {
    if console
        .send(ConsoleWritePayload { stream, text })
        .await
        .is_err()
    {
        debug!("console consumer gone; dropping output");
    }
}
