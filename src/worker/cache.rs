//! Per-session resolution cache.
//!
//! Two-level map: submission id → reference name (case-insensitive) →
//! cached slot. Slots are write-once: the first resolution wins and later
//! requests for the same key observe it unchanged. Entries persist for the
//! worker's lifetime, enabling reuse across sequential builds, until a
//! whole submission is cleared explicitly.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;

/// The stored outcome of the first resolution for a cache key.
///
/// `path: None` records a failed resolution; failures are cached like
/// successes so a key never triggers a second resolver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResolution {
    /// Resolved path, absent when resolution failed.
    pub path: Option<String>,
    /// Version the path satisfies.
    pub version: Option<String>,
    /// The version the first requester asked for, kept for mismatch
    /// detection against later requests.
    pub requested_version: Option<String>,
}

/// One write-once cache slot plus its mismatch-warning gate.
#[derive(Debug, Default)]
pub struct CacheSlot {
    /// Atomic get-or-compute cell holding the first resolution.
    pub cell: OnceCell<CachedResolution>,
    /// Set once the version-mismatch warning for this key has been recorded.
    pub warned: AtomicBool,
}

/// Shared resolution cache scoped to the worker process.
#[derive(Debug, Default)]
pub struct SessionCache {
    submissions: Mutex<HashMap<i32, HashMap<String, Arc<CacheSlot>>>>,
}

impl SessionCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or insert the slot for `(submission_id, name)`.
    ///
    /// The name is lowercased so lookups are case-insensitive. The map
    /// mutex is held only for the lookup; the slot's own cell serializes
    /// the compute.
    #[must_use]
    pub fn slot(&self, submission_id: i32, name: &str) -> Arc<CacheSlot> {
        let key = name.to_lowercase();
        let mut submissions = self
            .submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            submissions
                .entry(submission_id)
                .or_default()
                .entry(key)
                .or_default(),
        )
    }

    /// Drop every cached entry for a submission.
    ///
    /// Called when a build session ends, bounding memory growth across many
    /// sequential builds served by one long-lived worker.
    pub fn clear_submission(&self, submission_id: i32) {
        let mut submissions = self
            .submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        submissions.remove(&submission_id);
    }

    /// Number of cached names for a submission (diagnostics).
    #[must_use]
    pub fn submission_len(&self, submission_id: i32) -> usize {
        let submissions = self
            .submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        submissions.get(&submission_id).map_or(0, HashMap::len)
    }
}
