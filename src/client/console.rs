//! Console capability capture and mode restoration.
//!
//! The client console is process-wide global state. A session captures the
//! current configuration into an immutable [`ConsoleDescriptor`] before
//! mutating anything, and restores the captured configuration through an
//! RAII [`ConsoleGuard`] on every exit path.

use console::Term;
use tracing::debug;

use crate::protocol::{ConsoleDescriptor, ConsoleStream};

/// Snapshot the current console configuration.
///
/// Width falls back to 0 when stdout is not attached to a terminal.
#[must_use]
pub fn capture_descriptor() -> ConsoleDescriptor {
    let term = Term::stdout();
    let is_terminal = term.is_term();
    let buffer_width = term.size_checked().map_or(0, |(_rows, cols)| cols);
    ConsoleDescriptor {
        buffer_width,
        accepts_color: console::colors_enabled(),
        is_terminal,
    }
}

/// RAII guard restoring the console mode captured at session start.
///
/// Dropping the guard restores the color-enable flag unconditionally,
/// whichever way the session ended.
#[derive(Debug)]
pub struct ConsoleGuard {
    colors_were_enabled: bool,
}

impl ConsoleGuard {
    /// Capture the current mode and configure the console for a session.
    ///
    /// Sessions force colors on for interactive terminals so that worker
    /// output renders the way a local build would.
    #[must_use]
    pub fn configure(descriptor: ConsoleDescriptor) -> Self {
        let colors_were_enabled = console::colors_enabled();
        if descriptor.is_terminal {
            console::set_colors_enabled(true);
        }
        Self {
            colors_were_enabled,
        }
    }
}

impl Drop for ConsoleGuard {
    fn drop(&mut self) {
        console::set_colors_enabled(self.colors_were_enabled);
        debug!("console mode restored");
    }
}

/// Write one chunk of streamed worker output to the matching local stream.
pub fn write_console(stream: ConsoleStream, text: &str) {
    let term = match stream {
        ConsoleStream::Stdout => Term::stdout(),
        ConsoleStream::Stderr => Term::stderr(),
    };
    if let Err(err) = term.write_str(text) {
        debug!(%err, "console write failed");
    }
}
