#![forbid(unsafe_code)]

//! Persistent build-server link for the forge build tool.
//!
//! The client side ([`client`]) discovers, launches, and talks to a
//! long-lived `forgelinkd` worker over a local interprocess channel. The
//! worker side ([`worker`]) accepts build commands, streams console output
//! back, and serves dependency-resolution requests from many parallel build
//! participants through a caching concurrent dispatcher.

pub mod client;
pub mod config;
pub mod errors;
pub mod handshake;
pub mod protocol;
pub mod rendezvous;
pub mod worker;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
