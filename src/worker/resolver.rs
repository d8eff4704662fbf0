//! External collaborator seams for the resolution dispatcher.
//!
//! The actual dependency-reference resolution algorithm and the
//! node-addressed response delivery both live outside this crate; the
//! dispatcher drives them through these object-safe traits.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::{Packet, ResolveResponsePayload};
use crate::{AppError, Result};

/// A successful reference resolution produced by the external algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Resolved path of the reference.
    pub path: String,
    /// Version the path satisfies, when the algorithm reports one.
    pub version: Option<String>,
}

/// The opaque dependency-reference resolution algorithm.
pub trait ReferenceResolver: Send + Sync {
    /// Resolve one reference by name and version constraints.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resolve`](crate::AppError::Resolve) when the
    /// reference cannot be resolved; the failure stays localized to the one
    /// requesting build participant.
    fn resolve(
        &self,
        name: &str,
        version: Option<&str>,
        min_version: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<Resolution>> + Send + '_>>;
}

/// Node-addressed delivery of resolution answers.
pub trait NodeSender: Send + Sync {
    /// Route one response to the origin node.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) when the
    /// node cannot be reached (it may have exited mid-build).
    fn send(
        &self,
        node_id: i32,
        response: ResolveResponsePayload,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// In-process node routing table.
///
/// Maps origin node ids to outbound packet queues. Connections register the
/// nodes whose requests they carry and deregister them when they close.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    routes: Mutex<HashMap<i32, mpsc::UnboundedSender<Packet>>>,
}

impl NodeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) the outbound queue for a node id.
    pub fn register(&self, node_id: i32, outbound: mpsc::UnboundedSender<Packet>) {
        let mut routes = self.routes.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        routes.insert(node_id, outbound);
    }

    /// Drop the routes for a set of node ids.
    pub fn deregister<I: IntoIterator<Item = i32>>(&self, node_ids: I) {
        let mut routes = self.routes.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for node_id in node_ids {
            routes.remove(&node_id);
            debug!(node_id, "node route removed");
        }
    }
}

/// Filesystem-probing resolver used by the daemon binary.
///
/// Resolves a reference name to a directory entry under a configured
/// references root: `<root>/<name>/<version>` when a version is pinned,
/// `<root>/<name>` otherwise. Stands in for the full resolution algorithm,
/// which lives outside this crate.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: std::path::PathBuf,
}

impl DirectoryResolver {
    /// Create a resolver over a references root directory.
    #[must_use]
    pub fn new(root: std::path::PathBuf) -> Self {
        Self { root }
    }
}

impl ReferenceResolver for DirectoryResolver {
    fn resolve(
        &self,
        name: &str,
        version: Option<&str>,
        _min_version: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<Resolution>> + Send + '_>> {
        let candidate = match version {
            Some(version) => self.root.join(name).join(version),
            None => self.root.join(name),
        };
        let version = version.map(str::to_owned);
        let name = name.to_owned();
        Box::pin(async move {
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                Ok(Resolution {
                    path: candidate.to_string_lossy().into_owned(),
                    version,
                })
            } else {
                Err(AppError::Resolve(format!(
                    "reference '{name}' not found under {}",
                    candidate.display()
                )))
            }
        })
    }
}

impl NodeSender for NodeRegistry {
    fn send(
        &self,
        node_id: i32,
        response: ResolveResponsePayload,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let routes = self.routes.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let outcome = match routes.get(&node_id) {
            Some(outbound) => outbound
                .send(Packet::ResolveResponse(response))
                .map_err(|_| AppError::Transport(format!("node {node_id} queue closed"))),
            None => Err(AppError::Transport(format!("node {node_id} is not registered"))),
        };
        Box::pin(std::future::ready(outcome))
    }
}
