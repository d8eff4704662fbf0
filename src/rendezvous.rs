//! Lock-file rendezvous markers and non-blocking server discovery.
//!
//! Markers are plain files in the rendezvous directory, created with
//! create-exclusive semantics and removed when the owning [`NamedMarker`] is
//! dropped. They replace OS named mutexes with a primitive that behaves the
//! same on every platform: try-create-exclusive, probe-exists, release on
//! exit.
//!
//! Probes never block and fail open: a probe that errors (permissions,
//! racing unlink) reports "absent" so that discovery can never deadlock a
//! build.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::handshake::Handshake;
use crate::{AppError, Result};

/// An exclusively-held marker file.
///
/// Holding the value means holding the marker; dropping it removes the
/// file. At most one process holds a given marker name at a time.
#[derive(Debug)]
pub struct NamedMarker {
    path: PathBuf,
}

impl NamedMarker {
    /// Try to acquire the marker exclusively.
    ///
    /// Returns `Ok(None)` when another process already holds it. The marker
    /// file records the owner pid for post-mortem inspection.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Rendezvous`] when the rendezvous directory cannot
    /// be created or the marker file cannot be written for a reason other
    /// than already existing.
    pub fn try_acquire(dir: &Path, name: &str) -> Result<Option<Self>> {
        fs::create_dir_all(dir).map_err(|err| {
            AppError::Rendezvous(format!("cannot create rendezvous dir {}: {err}", dir.display()))
        })?;

        let path = dir.join(name);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                if let Err(err) = writeln!(file, "{}", std::process::id()) {
                    warn!(marker = name, %err, "failed to record marker owner pid");
                }
                debug!(marker = name, "marker acquired");
                Ok(Some(Self { path }))
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(AppError::Rendezvous(format!(
                "cannot create marker {}: {err}",
                path.display()
            ))),
        }
    }

    /// Non-blocking existence probe for a marker name.
    ///
    /// Fail-open: any probe error reports `false`.
    #[must_use]
    pub fn probe(dir: &Path, name: &str) -> bool {
        match dir.join(name).try_exists() {
            Ok(exists) => exists,
            Err(err) => {
                debug!(marker = name, %err, "marker probe failed; treating as absent");
                false
            }
        }
    }

    /// Best-effort removal of a marker file this process does not own.
    ///
    /// Used by the worker at startup to clear markers left behind by a
    /// crashed predecessor.
    pub fn remove_stale(dir: &Path, name: &str) {
        let path = dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => warn!(marker = name, "removed stale marker"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => debug!(marker = name, %err, "stale marker removal failed"),
        }
    }

    /// Try to acquire, reclaiming the marker when its recorded owner is a
    /// dead process.
    ///
    /// A crashed worker leaves its markers behind; the next worker start
    /// reads the owner pid, verifies the process is gone, removes the file,
    /// and retries the acquisition once. A marker owned by a live process
    /// is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Rendezvous`] on the same conditions as
    /// [`try_acquire`](Self::try_acquire).
    pub fn try_acquire_reclaiming(dir: &Path, name: &str) -> Result<Option<Self>> {
        for _ in 0..2 {
            if let Some(marker) = Self::try_acquire(dir, name)? {
                return Ok(Some(marker));
            }
            match Self::owner_pid(dir, name) {
                Some(pid) if !process_alive(pid) => {
                    Self::remove_stale(dir, name);
                }
                _ => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Remove the marker when its recorded owner is a dead process.
    pub fn reclaim_if_dead(dir: &Path, name: &str) {
        if let Some(pid) = Self::owner_pid(dir, name) {
            if !process_alive(pid) {
                Self::remove_stale(dir, name);
            }
        }
    }

    /// The pid recorded in a marker file, when readable.
    #[must_use]
    pub fn owner_pid(dir: &Path, name: &str) -> Option<u32> {
        fs::read_to_string(dir.join(name))
            .ok()
            .and_then(|text| text.trim().parse().ok())
    }

    /// Release the marker explicitly (equivalent to dropping it).
    pub fn release(self) {
        drop(self);
    }
}

/// Whether a process with the given pid is currently alive.
///
/// Non-unix targets cannot probe cheaply and answer `true`, which keeps
/// reclamation conservative: a marker is only ever reclaimed when the owner
/// is provably gone.
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    i32::try_from(pid).is_ok_and(|pid| {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
    })
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for NamedMarker {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(marker = %self.path.display(), "marker released"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(marker = %self.path.display(), %err, "marker release failed"),
        }
    }
}

/// Non-blocking discovery probes for a worker identified by a [`Handshake`].
#[derive(Debug, Clone)]
pub struct Discovery {
    dir: PathBuf,
    handshake: Handshake,
}

impl Discovery {
    /// Create a discovery view over a rendezvous directory and identity.
    #[must_use]
    pub fn new(dir: PathBuf, handshake: Handshake) -> Self {
        Self { dir, handshake }
    }

    /// Whether a worker for this identity is currently alive.
    #[must_use]
    pub fn is_server_running(&self) -> bool {
        NamedMarker::probe(&self.dir, &self.handshake.running_marker_name())
    }

    /// Whether the worker for this identity is currently serving a build.
    #[must_use]
    pub fn is_server_busy(&self) -> bool {
        NamedMarker::probe(&self.dir, &self.handshake.busy_marker_name())
    }
}
