//! Rendezvous identity negotiated between client and worker.
//!
//! A [`Handshake`] is a pure function of the negotiated [`HandshakeOptions`]:
//! two processes computing it from identical options always derive identical
//! channel and marker names, without any prior communication. The names are
//! short hash-derived strings valid both as a local-socket namespace name and
//! as a marker file name.

use std::env;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Wire protocol version spoken by this crate.
///
/// Bumped on any incompatible change to the frame layout or payload
/// encoding; client and worker only rendezvous when they agree on it.
pub const PROTOCOL_VERSION: u32 = 1;

/// Negotiated option values that determine the rendezvous identity.
///
/// Immutable once constructed. Any difference in any field yields a
/// different channel name, so mismatched clients and workers never find
/// each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOptions {
    /// Wire protocol version.
    pub protocol_version: u32,
    /// Tool release version (distinct builds get distinct servers).
    pub tool_version: String,
    /// Process architecture (`x86_64`, `aarch64`, …).
    pub architecture: String,
    /// Absolute path of the worker executable the client would launch.
    pub worker_exe: PathBuf,
    /// Whether the worker runs at lowered scheduling priority.
    pub low_priority: bool,
}

impl HandshakeOptions {
    /// Build the options for the current process and the given worker
    /// executable path.
    #[must_use]
    pub fn for_worker_exe(worker_exe: PathBuf, low_priority: bool) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            tool_version: env!("CARGO_PKG_VERSION").to_owned(),
            architecture: env::consts::ARCH.to_owned(),
            worker_exe,
            low_priority,
        }
    }
}

/// Deterministic rendezvous identity derived from [`HandshakeOptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    key: String,
}

impl Handshake {
    /// Compute the handshake for an option set.
    ///
    /// Pure and deterministic: equal options produce equal keys; differing
    /// options produce differing keys with overwhelming probability. The key
    /// is the first 16 hex digits of a SHA-256 over a stable serialization
    /// of every option field.
    #[must_use]
    pub fn compute(options: &HandshakeOptions) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(options.protocol_version.to_le_bytes());
        hasher.update(b"\n");
        hasher.update(options.tool_version.as_bytes());
        hasher.update(b"\n");
        hasher.update(options.architecture.as_bytes());
        hasher.update(b"\n");
        hasher.update(options.worker_exe.to_string_lossy().as_bytes());
        hasher.update(b"\n");
        hasher.update([u8::from(options.low_priority)]);

        let digest = hasher.finalize();
        Self {
            key: hex::encode(&digest[..8]),
        }
    }

    /// Name of the local-socket channel the worker listens on.
    #[must_use]
    pub fn channel_name(&self) -> String {
        format!("forgelink-{}.sock", self.key)
    }

    /// Marker name signalling a live worker for this identity.
    #[must_use]
    pub fn running_marker_name(&self) -> String {
        format!("forgelink-{}.running", self.key)
    }

    /// Marker name signalling the worker is mid-build.
    #[must_use]
    pub fn busy_marker_name(&self) -> String {
        format!("forgelink-{}.busy", self.key)
    }

    /// Marker name guarding worker launch against concurrent clients.
    #[must_use]
    pub fn launch_marker_name(&self) -> String {
        format!("forgelink-{}.launch", self.key)
    }
}

/// Default rendezvous directory for marker files.
///
/// Lives under the system temp directory so that markers vanish with the
/// machine, never with a project checkout.
#[must_use]
pub fn default_rendezvous_dir() -> PathBuf {
    env::temp_dir().join("forgelink")
}

/// Locate the worker executable next to the currently running binary.
///
/// # Errors
///
/// Returns [`crate::AppError::Launch`] when the current executable path
/// cannot be determined.
pub fn sibling_worker_exe(worker_file_name: &str) -> crate::Result<PathBuf> {
    let current = env::current_exe()
        .map_err(|err| crate::AppError::Launch(format!("cannot locate current exe: {err}")))?;
    let dir = current.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(worker_file_name))
}
