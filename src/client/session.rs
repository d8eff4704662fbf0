//! Client session orchestration.
//!
//! One [`ClientSession`] spans exactly one build invocation: discover or
//! launch the worker, connect within a budget, capture and configure the
//! console, send the command, then drain the pump queue until the result
//! arrives. Console configuration is restored on every exit path, and
//! cancellation is cooperative — exactly one `BuildCancel` is sent, then
//! the session keeps waiting for the remote side to finish gracefully.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::SinkExt;
use interprocess::local_socket::traits::tokio::Stream as _;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connect::{self, COLD_CONNECT_BUDGET, WARM_CONNECT_BUDGET};
use super::console::{self, ConsoleGuard};
use super::launcher;
use super::pump::{PacketPump, PumpTermination};
use crate::handshake::{Handshake, HandshakeOptions};
use crate::protocol::{BuildCommandPayload, BuildResultPayload, Packet, PacketCodec};
use crate::rendezvous::{Discovery, NamedMarker};

/// Exit category surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The session ran to completion and received a build result.
    Success,
    /// The worker process could not be spawned.
    LaunchError,
    /// The server (or its launch slot) is already occupied by another build.
    ServerBusy,
    /// No channel could be established within the connect budget.
    UnableToConnect,
    /// A fatal transport or protocol failure after the session started.
    Unexpected,
}

/// What a finished session hands back to the caller.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Exit category of the session itself.
    pub outcome: ExitOutcome,
    /// The build result, present only for [`ExitOutcome::Success`] builds.
    pub result: Option<BuildResultPayload>,
}

impl SessionOutcome {
    fn bare(outcome: ExitOutcome) -> Self {
        Self {
            outcome,
            result: None,
        }
    }
}

/// A fully-formed build invocation, minus the console descriptor the
/// session captures itself.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Build argument list.
    pub args: Vec<String>,
    /// Environment for the build.
    pub env: BTreeMap<String, String>,
    /// Working directory the build runs in.
    pub working_dir: String,
    /// Culture (locale) name.
    pub culture: String,
    /// Optional partial-telemetry snapshot.
    pub telemetry: Option<BTreeMap<String, String>>,
}

/// Knobs for constructing a [`ClientSession`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Worker executable the session would launch.
    pub worker_exe: PathBuf,
    /// Directory holding rendezvous markers.
    pub rendezvous_dir: PathBuf,
    /// Launch the worker at lowered scheduling priority.
    pub low_priority: bool,
    /// Connect budget after a cold launch.
    pub cold_connect_budget: Duration,
    /// Connect budget against a warm server.
    pub warm_connect_budget: Duration,
}

impl SessionOptions {
    /// Default options for a worker executable.
    #[must_use]
    pub fn new(worker_exe: PathBuf, rendezvous_dir: PathBuf) -> Self {
        Self {
            worker_exe,
            rendezvous_dir,
            low_priority: false,
            cold_connect_budget: COLD_CONNECT_BUDGET,
            warm_connect_budget: WARM_CONNECT_BUDGET,
        }
    }
}

/// One client-side build session against the persistent worker.
#[derive(Debug)]
pub struct ClientSession {
    handshake: Handshake,
    discovery: Discovery,
    options: SessionOptions,
}

impl ClientSession {
    /// Compute the handshake for `options` and build a session around it.
    #[must_use]
    pub fn new(options: SessionOptions) -> Self {
        let handshake = Handshake::compute(&HandshakeOptions::for_worker_exe(
            options.worker_exe.clone(),
            options.low_priority,
        ));
        let discovery = Discovery::new(options.rendezvous_dir.clone(), handshake.clone());
        Self {
            handshake,
            discovery,
            options,
        }
    }

    /// The rendezvous identity this session uses.
    #[must_use]
    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Run one build through the worker.
    ///
    /// Follows the orchestration states: check the server, launch it cold if
    /// needed (guarded by the launch marker), connect within the matching
    /// budget, configure the console, send the command, then wait on
    /// {cancellation, pump} until the result arrives.
    pub async fn execute(&self, request: BuildRequest, cancel: CancellationToken) -> SessionOutcome {
        let warm = self.discovery.is_server_running();
        debug!(warm, "checking server");

        let mut launch_guard = None;
        if warm {
            // A busy server means another build is active; fall back to a
            // non-server build path rather than waiting.
            if self.discovery.is_server_busy() {
                info!("server busy; not connecting");
                return SessionOutcome::bare(ExitOutcome::ServerBusy);
            }
        } else {
            match NamedMarker::try_acquire(
                &self.options.rendezvous_dir,
                &self.handshake.launch_marker_name(),
            ) {
                Ok(Some(guard)) => {
                    if let Err(err) = launcher::launch_worker(
                        &self.options.worker_exe,
                        &self.options.rendezvous_dir,
                        self.options.low_priority,
                    ) {
                        warn!(%err, "worker launch failed");
                        return SessionOutcome::bare(ExitOutcome::LaunchError);
                    }
                    launch_guard = Some(guard);
                }
                Ok(None) => {
                    // Another client is mid-launch; its server will be busy
                    // with that client's build anyway.
                    info!("launch slot held by another client");
                    return SessionOutcome::bare(ExitOutcome::ServerBusy);
                }
                Err(err) => {
                    warn!(%err, "launch marker unavailable");
                    return SessionOutcome::bare(ExitOutcome::LaunchError);
                }
            }
        }

        let budget = if warm {
            self.options.warm_connect_budget
        } else {
            self.options.cold_connect_budget
        };
        debug!(?budget, "connecting");
        let stream = match connect::connect(&self.handshake, budget).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "unable to connect");
                return SessionOutcome::bare(ExitOutcome::UnableToConnect);
            }
        };
        drop(launch_guard);

        // Capture before any mutation; the guard restores on every exit path.
        let descriptor = console::capture_descriptor();
        let _console_guard = ConsoleGuard::configure(descriptor);

        let (read_half, write_half) = stream.split();
        let mut writer = FramedWrite::new(write_half, PacketCodec::new());
        let mut pump = PacketPump::start(read_half);

        let command = BuildCommandPayload {
            args: request.args,
            env: request.env,
            working_dir: request.working_dir,
            culture: request.culture,
            console: descriptor,
            telemetry: request.telemetry,
        };
        debug!("sending build command");
        if let Err(err) = writer.send(Packet::BuildCommand(command)).await {
            warn!(%err, "failed to send build command");
            return SessionOutcome::bare(ExitOutcome::Unexpected);
        }

        Self::read_loop(&mut writer, &mut pump, cancel).await
    }

    /// Ask a running, idle server to exit.
    ///
    /// Separate entry point with no build command: verifies the server is
    /// running and not busy, connects with the short budget, announces the
    /// clean disconnect to the pump, sends `ShutdownNotice`, and runs the
    /// read loop to completion.
    pub async fn shutdown_server(&self, cancel: CancellationToken) -> ExitOutcome {
        if !self.discovery.is_server_running() {
            info!("no server running; nothing to shut down");
            return ExitOutcome::Success;
        }
        if self.discovery.is_server_busy() {
            info!("server busy; refusing to shut down");
            return ExitOutcome::ServerBusy;
        }

        let stream = match connect::connect(&self.handshake, self.options.warm_connect_budget).await
        {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "unable to connect for shutdown");
                return ExitOutcome::UnableToConnect;
            }
        };

        let (read_half, write_half) = stream.split();
        let mut writer = FramedWrite::new(write_half, PacketCodec::new());
        let mut pump = PacketPump::start(read_half);

        // The closure that follows the notice is expected, not a failure.
        pump.expect_peer_disconnect();
        if let Err(err) = writer.send(Packet::ShutdownNotice).await {
            warn!(%err, "failed to send shutdown notice");
            return ExitOutcome::Unexpected;
        }

        Self::read_loop(&mut writer, &mut pump, cancel).await.outcome
    }

    /// Shared read loop: waits on whichever of {cancellation, pump} fires
    /// first, draining the whole packet queue per wakeup.
    async fn read_loop<W>(
        writer: &mut FramedWrite<W, PacketCodec>,
        pump: &mut PacketPump,
        cancel: CancellationToken,
    ) -> SessionOutcome
    where
        W: AsyncWrite + Unpin,
    {
        let mut cancel_sent = false;
        let mut result: Option<BuildResultPayload> = None;

        loop {
            tokio::select! {
                // Once the cancel packet is out, this arm is disabled so the
                // branch is never revisited; the loop keeps waiting for the
                // remote side to finish gracefully.
                () = cancel.cancelled(), if !cancel_sent => {
                    info!("cancellation requested; sending build cancel");
                    cancel_sent = true;
                    if let Err(err) = writer.send(Packet::BuildCancel).await {
                        warn!(%err, "failed to send build cancel");
                        return SessionOutcome::bare(ExitOutcome::Unexpected);
                    }
                }
                packet = pump.recv() => {
                    let Some(packet) = packet else {
                        return match pump.termination() {
                            PumpTermination::PeerDisconnect => SessionOutcome {
                                outcome: ExitOutcome::Success,
                                result,
                            },
                            PumpTermination::Closed => {
                                warn!("channel closed before build result");
                                SessionOutcome::bare(ExitOutcome::Unexpected)
                            }
                            PumpTermination::Failed(err) => {
                                warn!(%err, "pump failed");
                                SessionOutcome::bare(ExitOutcome::Unexpected)
                            }
                        };
                    };

                    // Drain the entire queue before waiting again.
                    let mut next = Some(packet);
                    while let Some(packet) = next {
                        if let Some(done) = Self::dispatch(packet, &mut result) {
                            return done;
                        }
                        next = pump.try_recv();
                    }
                    if let Some(result) = result.take() {
                        info!(
                            exit_code = result.exit_code,
                            exit_type = %result.exit_type,
                            "build finished"
                        );
                        return SessionOutcome {
                            outcome: ExitOutcome::Success,
                            result: Some(result),
                        };
                    }
                }
            }
        }
    }

    /// Handle one inbound packet; returns a terminal outcome for packets
    /// that end the session abnormally.
    fn dispatch(
        packet: Packet,
        result: &mut Option<BuildResultPayload>,
    ) -> Option<SessionOutcome> {
        match packet {
            Packet::ConsoleWrite(write) => {
                console::write_console(write.stream, &write.text);
                None
            }
            Packet::BuildResult(payload) => {
                *result = Some(payload);
                None
            }
            other => {
                warn!(packet_type = ?other.packet_type(), "unexpected packet from worker");
                Some(SessionOutcome::bare(ExitOutcome::Unexpected))
            }
        }
    }
}
