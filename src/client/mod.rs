//! Client side of the build-server link.
//!
//! [`session::ClientSession`] is the entry point: it discovers or launches
//! the worker, connects, sends the build command, and pumps console and
//! result packets back to the local console.

pub mod connect;
pub mod console;
pub mod launcher;
pub mod pump;
pub mod session;

pub use session::{BuildRequest, ClientSession, ExitOutcome, SessionOptions, SessionOutcome};
