//! Background packet pump.
//!
//! The pump owns the sole reader of a connection: a dedicated task reads
//! framed packets into an unbounded queue for the session to drain. It
//! terminates on channel closure, an explicit "peer will disconnect"
//! notice, or an unrecoverable read error — which is captured and exposed
//! through [`PacketPump::termination`], never swallowed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::debug;

use crate::protocol::{Packet, PacketCodec};
use crate::AppError;

/// Why the pump stopped reading.
#[derive(Debug)]
pub enum PumpTermination {
    /// The channel reached EOF without a prior disconnect notice.
    Closed,
    /// The channel closed after the session announced the peer would
    /// disconnect cleanly.
    PeerDisconnect,
    /// An unrecoverable read or decode error.
    Failed(AppError),
}

/// Reader loop plus the queue it fills.
///
/// The session waits on [`recv`](Self::recv); a `None` return means the
/// queue is drained and the pump has stopped, at which point
/// [`termination`](Self::termination) yields the captured cause.
#[derive(Debug)]
pub struct PacketPump {
    packets: mpsc::UnboundedReceiver<Packet>,
    termination: Arc<Mutex<Option<PumpTermination>>>,
    expect_disconnect: Arc<AtomicBool>,
}

impl PacketPump {
    /// Start the pump over the read half of a connection.
    pub fn start<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let termination = Arc::new(Mutex::new(None));
        let expect_disconnect = Arc::new(AtomicBool::new(false));

        let termination_slot = Arc::clone(&termination);
        let expected = Arc::clone(&expect_disconnect);
        tokio::spawn(async move {
            let mut framed = FramedRead::new(reader, PacketCodec::new());
            let cause = loop {
                match framed.next().await {
                    Some(Ok(packet)) => {
                        if tx.send(packet).is_err() {
                            // Session dropped its receiver; nothing left to do.
                            break PumpTermination::Closed;
                        }
                    }
                    Some(Err(err)) => {
                        if expected.load(Ordering::SeqCst) {
                            break PumpTermination::PeerDisconnect;
                        }
                        break PumpTermination::Failed(err);
                    }
                    None => {
                        if expected.load(Ordering::SeqCst) {
                            break PumpTermination::PeerDisconnect;
                        }
                        break PumpTermination::Closed;
                    }
                }
            };
            debug!(?cause, "packet pump stopped");
            if let Ok(mut slot) = termination_slot.lock() {
                *slot = Some(cause);
            }
            // tx drops here, after the termination cause is visible, so a
            // `None` from recv() always finds the cause recorded.
            drop(tx);
        });

        Self {
            packets: rx,
            termination,
            expect_disconnect,
        }
    }

    /// Announce that the peer is about to disconnect cleanly, so the
    /// resulting closure is not misclassified as a failure.
    pub fn expect_peer_disconnect(&self) {
        self.expect_disconnect.store(true, Ordering::SeqCst);
    }

    /// Wait for the next queued packet; `None` once the pump has stopped
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.packets.recv().await
    }

    /// Take a queued packet without waiting.
    pub fn try_recv(&mut self) -> Option<Packet> {
        self.packets.try_recv().ok()
    }

    /// The captured termination cause.
    ///
    /// Meaningful once [`recv`](Self::recv) has returned `None`; each call
    /// takes the stored cause, later calls fall back to `Closed`.
    #[must_use]
    pub fn termination(&self) -> PumpTermination {
        self.termination
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .unwrap_or(PumpTermination::Closed)
    }
}
