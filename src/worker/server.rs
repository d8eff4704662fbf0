//! Worker-side accept loop and per-connection build session.
//!
//! The server owns the rendezvous markers for its handshake identity: the
//! running marker for its whole lifetime, the busy marker for the duration
//! of each build. Clients are served one at a time; a connection carries at
//! most one build in flight, plus any number of resolution requests from
//! the participant nodes multiplexed over it.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::ResolutionDispatcher;
use super::engine::BuildEngine;
use super::resolver::NodeRegistry;
use crate::handshake::Handshake;
use crate::protocol::{
    BuildCommandPayload, BuildResultPayload, ConsoleWritePayload, Packet, PacketCodec,
};
use crate::rendezvous::NamedMarker;
use crate::{AppError, Result};

/// A build currently in flight on a connection.
struct ActiveBuild {
    submission_id: i32,
    cancel: CancellationToken,
    busy: Option<NamedMarker>,
}

/// The long-lived worker server.
pub struct WorkerServer {
    handshake: Handshake,
    rendezvous_dir: PathBuf,
    engine: Arc<dyn BuildEngine>,
    dispatcher: ResolutionDispatcher,
    nodes: Arc<NodeRegistry>,
    submissions: AtomicI32,
}

impl WorkerServer {
    /// Assemble a server over its collaborators.
    #[must_use]
    pub fn new(
        handshake: Handshake,
        rendezvous_dir: PathBuf,
        engine: Arc<dyn BuildEngine>,
        dispatcher: ResolutionDispatcher,
        nodes: Arc<NodeRegistry>,
    ) -> Self {
        Self {
            handshake,
            rendezvous_dir,
            engine,
            dispatcher,
            nodes,
            submissions: AtomicI32::new(0),
        }
    }

    /// Run the accept loop until cancellation or a shutdown notice.
    ///
    /// Exits quietly when another live worker already holds the running
    /// marker for this identity — the duplicate spawn lost the race and has
    /// nothing to do.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Rendezvous`] when the marker directory is
    /// unusable and [`AppError::Transport`] when the listener cannot be
    /// created.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        // A crashed predecessor leaves markers behind; reclaim before acquiring.
        NamedMarker::reclaim_if_dead(&self.rendezvous_dir, &self.handshake.busy_marker_name());
        let Some(running) = NamedMarker::try_acquire_reclaiming(
            &self.rendezvous_dir,
            &self.handshake.running_marker_name(),
        )?
        else {
            info!("another worker already serves this identity; exiting");
            return Ok(());
        };

        let channel = self.handshake.channel_name();
        let name = channel
            .clone()
            .to_ns_name::<GenericNamespaced>()
            .map_err(|err| {
                AppError::Transport(format!("invalid channel name '{channel}': {err}"))
            })?;
        let listener = ListenerOptions::new()
            .name(name)
            .create_tokio()
            .map_err(|err| AppError::Transport(format!("failed to create listener: {err}")))?;
        info!(channel = %channel, "worker listening");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("worker cancelled");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(stream) => {
                        debug!("client connected");
                        if self.serve_connection(stream, &cancel).await {
                            info!("shutdown notice honored");
                            break;
                        }
                        debug!("client disconnected");
                    }
                    Err(err) => warn!(%err, "accept failed"),
                }
            }
        }

        running.release();
        Ok(())
    }

    /// Serve one client connection to completion.
    ///
    /// Returns `true` when the client asked the whole server to shut down.
    async fn serve_connection(
        &self,
        stream: interprocess::local_socket::tokio::Stream,
        cancel: &CancellationToken,
    ) -> bool {
        let (read_half, write_half) = stream.split();
        let reader = FramedRead::new(read_half, PacketCodec::new());
        let writer = FramedWrite::new(write_half, PacketCodec::new());
        let result = self.connection_loop(reader, writer, cancel).await;
        match result {
            ConnectionEnd::Shutdown => true,
            ConnectionEnd::Disconnected => false,
        }
    }

    async fn connection_loop<R, W>(
        &self,
        mut reader: FramedRead<R, PacketCodec>,
        mut writer: FramedWrite<W, PacketCodec>,
        cancel: &CancellationToken,
    ) -> ConnectionEnd
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (console_tx, mut console_rx) = mpsc::channel::<ConsoleWritePayload>(64);
        let (done_tx, mut done_rx) = mpsc::channel::<BuildResultPayload>(1);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Packet>();

        let mut active: Option<ActiveBuild> = None;
        let mut registered_nodes: HashSet<i32> = HashSet::new();
        let mut end = ConnectionEnd::Disconnected;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,

                Some(event) = console_rx.recv() => {
                    if let Err(err) = writer.send(Packet::ConsoleWrite(event)).await {
                        warn!(%err, "console forwarding failed");
                        break;
                    }
                }

                Some(result) = done_rx.recv() => {
                    if let Some(build) = active.take() {
                        self.dispatcher.clear_cache(build.submission_id);
                        drop(build.busy);
                    }
                    // Flush any console lines that raced the completion.
                    while let Ok(event) = console_rx.try_recv() {
                        if let Err(err) = writer.send(Packet::ConsoleWrite(event)).await {
                            warn!(%err, "console forwarding failed");
                        }
                    }
                    if let Err(err) = writer.send(Packet::BuildResult(result)).await {
                        warn!(%err, "result delivery failed");
                        break;
                    }
                }

                Some(packet) = outbound_rx.recv() => {
                    if let Err(err) = writer.send(packet).await {
                        warn!(%err, "response delivery failed");
                        break;
                    }
                }

                frame = reader.next() => match frame {
                    None => break,
                    Some(Err(err)) => {
                        warn!(%err, "protocol failure; dropping connection");
                        break;
                    }
                    Some(Ok(Packet::BuildCommand(command))) => {
                        if active.is_some() {
                            warn!("build command while a build is in flight; dropping connection");
                            break;
                        }
                        active = Some(self.start_build(command, &console_tx, &done_tx));
                    }
                    Some(Ok(Packet::BuildCancel)) => {
                        if let Some(build) = &active {
                            info!(submission_id = build.submission_id, "build cancel received");
                            build.cancel.cancel();
                        } else {
                            debug!("cancel received with no build in flight");
                        }
                    }
                    Some(Ok(Packet::ShutdownNotice)) => {
                        end = ConnectionEnd::Shutdown;
                        break;
                    }
                    Some(Ok(Packet::ResolveRequest(request))) => {
                        registered_nodes.insert(request.node_id);
                        self.nodes.register(request.node_id, outbound_tx.clone());
                        self.dispatcher.submit(request);
                    }
                    Some(Ok(other)) => {
                        warn!(
                            packet_type = ?other.packet_type(),
                            "unexpected packet from client; dropping connection"
                        );
                        break;
                    }
                }
            }
        }

        // A client that vanished mid-build cancels its build cooperatively.
        if let Some(build) = active.take() {
            build.cancel.cancel();
            self.dispatcher.clear_cache(build.submission_id);
        }
        self.nodes.deregister(registered_nodes);
        end
    }

    fn start_build(
        &self,
        command: BuildCommandPayload,
        console_tx: &mpsc::Sender<ConsoleWritePayload>,
        done_tx: &mpsc::Sender<BuildResultPayload>,
    ) -> ActiveBuild {
        let submission_id = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        info!(submission_id, args = ?command.args, "build command accepted");

        let busy = match NamedMarker::try_acquire(
            &self.rendezvous_dir,
            &self.handshake.busy_marker_name(),
        ) {
            Ok(marker) => {
                if marker.is_none() {
                    warn!("busy marker already present");
                }
                marker
            }
            Err(err) => {
                warn!(%err, "busy marker unavailable");
                None
            }
        };

        let build_cancel = CancellationToken::new();
        let engine = Arc::clone(&self.engine);
        let console = console_tx.clone();
        let done = done_tx.clone();
        let token = build_cancel.clone();
        tokio::spawn(async move {
            let result = engine.run(command, console, token).await;
            if done.send(result).await.is_err() {
                debug!("connection gone before build result delivery");
            }
        });

        ActiveBuild {
            submission_id,
            cancel: build_cancel,
            busy,
        }
    }
}

enum ConnectionEnd {
    Disconnected,
    Shutdown,
}
