//! Concurrent resolution dispatcher.
//!
//! Serves dependency-resolution requests from many concurrently-building
//! participants. Requests land on an unbounded queue; a single dispatch
//! loop drains the whole queue on each wakeup, fans the drained batch out
//! as parallel tasks, and joins the entire batch before waiting again.
//! Arrivals during a batch wait for the next wakeup.
//!
//! Deduplication is per cache key `(submission id, lowercased name)`: the
//! get-or-compute against the shared [`SessionCache`] is atomic per key, so
//! at most one real resolver call happens per key no matter how many tasks
//! race on it. Batch fan-out is unbounded; under extreme request churn
//! that is a resource-exhaustion risk accepted for the request rates a
//! single coordinating worker sees.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cache::{CachedResolution, SessionCache};
use super::resolver::{NodeSender, ReferenceResolver};
use crate::protocol::{ResolveRequestPayload, ResolveResponsePayload};

struct Shared {
    resolver: Arc<dyn ReferenceResolver>,
    sender: Arc<dyn NodeSender>,
    cache: SessionCache,
    mismatch_warnings: AtomicU64,
}

/// Handle for submitting requests and managing the cache.
///
/// Cheap to clone; all clones feed the same dispatch loop.
#[derive(Clone)]
pub struct ResolutionDispatcher {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<ResolveRequestPayload>,
}

/// The dispatch loop, run to completion by the worker.
pub struct DispatchLoop {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedReceiver<ResolveRequestPayload>,
}

/// Build a dispatcher handle and its loop over the external collaborators.
#[must_use]
pub fn dispatcher(
    resolver: Arc<dyn ReferenceResolver>,
    sender: Arc<dyn NodeSender>,
) -> (ResolutionDispatcher, DispatchLoop) {
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        resolver,
        sender,
        cache: SessionCache::new(),
        mismatch_warnings: AtomicU64::new(0),
    });
    (
        ResolutionDispatcher {
            shared: Arc::clone(&shared),
            queue: queue_tx,
        },
        DispatchLoop {
            shared,
            queue: queue_rx,
        },
    )
}

impl ResolutionDispatcher {
    /// Queue one resolution request and wake the dispatch loop.
    ///
    /// Never blocks; requests submitted while a batch is in flight are
    /// picked up by the next wakeup.
    pub fn submit(&self, request: ResolveRequestPayload) {
        if self.queue.send(request).is_err() {
            warn!("resolution request dropped: dispatch loop has stopped");
        }
    }

    /// Drop all cached results for a submission.
    pub fn clear_cache(&self, submission_id: i32) {
        self.shared.cache.clear_submission(submission_id);
        debug!(submission_id, "resolution cache cleared");
    }

    /// Total version-mismatch warnings recorded so far.
    #[must_use]
    pub fn version_mismatch_warnings(&self) -> u64 {
        self.shared.mismatch_warnings.load(Ordering::SeqCst)
    }
}

impl DispatchLoop {
    /// Run until cancelled.
    ///
    /// An already-started batch always runs to completion; requests still
    /// queued but not yet drained when cancellation fires are dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let first = tokio::select! {
                () = cancel.cancelled() => break,
                request = self.queue.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            // Drain the entire current queue into one batch.
            let mut batch = vec![first];
            while let Ok(request) = self.queue.try_recv() {
                batch.push(request);
            }
            debug!(batch_len = batch.len(), "dispatching resolution batch");

            let tasks: Vec<_> = batch
                .into_iter()
                .map(|request| {
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move { shared.serve(request).await })
                })
                .collect();

            // The whole batch finishes before the next wait. A panicked
            // task is contained by its JoinHandle and cannot corrupt the
            // loop or abort its siblings.
            for joined in join_all(tasks).await {
                if let Err(err) = joined {
                    warn!(%err, "resolution task aborted");
                }
            }
        }
        debug!("resolution dispatch loop stopped");
    }
}

impl Shared {
    async fn serve(&self, request: ResolveRequestPayload) {
        let slot = self.cache.slot(request.submission_id, &request.name);

        let resolved = slot
            .cell
            .get_or_init(|| async {
                match self
                    .resolver
                    .resolve(
                        &request.name,
                        request.version.as_deref(),
                        request.min_version.as_deref(),
                    )
                    .await
                {
                    Ok(resolution) => CachedResolution {
                        path: Some(resolution.path),
                        version: resolution.version,
                        requested_version: request.version.clone(),
                    },
                    Err(err) => {
                        warn!(
                            name = %request.name,
                            submission_id = request.submission_id,
                            %err,
                            "reference resolution failed"
                        );
                        CachedResolution {
                            path: None,
                            version: None,
                            requested_version: request.version.clone(),
                        }
                    }
                }
            })
            .await;

        // A later request for a different version of an already-cached name
        // keeps the first-seen result; the mismatch is recorded once per key.
        if resolved.requested_version != request.version
            && !slot.warned.swap(true, Ordering::SeqCst)
        {
            self.mismatch_warnings.fetch_add(1, Ordering::SeqCst);
            warn!(
                name = %request.name,
                submission_id = request.submission_id,
                cached = ?resolved.requested_version,
                requested = ?request.version,
                "version mismatch; keeping first-seen resolution"
            );
        }

        let response = ResolveResponsePayload {
            name: request.name.clone(),
            path: resolved.path.clone(),
            version: resolved.version.clone(),
            source_file: request.source_file.clone(),
            source_line: request.source_line,
        };
        if let Err(err) = self.sender.send(request.node_id, response).await {
            warn!(node_id = request.node_id, %err, "response delivery failed");
        }
    }
}
