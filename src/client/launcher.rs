//! Worker process launcher.
//!
//! Spawns the detached `forgelinkd` daemon when discovery finds no live
//! server. Launch exclusivity (the guard against concurrent clients racing
//! to spawn duplicates) is handled by the session via the launch marker;
//! this module only performs the spawn itself.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use crate::{AppError, Result};

/// Spawn the worker daemon, detached from this client.
///
/// The daemon inherits the client's environment, closes all standard
/// streams, and receives the rendezvous directory and priority flag on its
/// command line so both processes derive the same handshake.
///
/// # Errors
///
/// Returns [`AppError::Launch`] when the process cannot be spawned. Launch
/// failures are not retried.
pub fn launch_worker(worker_exe: &Path, rendezvous_dir: &Path, low_priority: bool) -> Result<()> {
    let mut cmd = Command::new(worker_exe);
    cmd.arg("--rendezvous-dir")
        .arg(rendezvous_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if low_priority {
        cmd.arg("--low-priority");
    }

    // Not kill_on_drop: the daemon must outlive this client.
    let child = cmd.spawn().map_err(|err| {
        AppError::Launch(format!(
            "failed to spawn worker '{}': {err}",
            worker_exe.display()
        ))
    })?;

    info!(
        worker_exe = %worker_exe.display(),
        pid = child.id(),
        "worker daemon launched"
    );
    Ok(())
}
