//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Worker process launch failure.
    Launch(String),
    /// Channel could not be established within the connect budget.
    Connect(String),
    /// Read/write failure on an established channel.
    Transport(String),
    /// Malformed frame, unknown packet type, or payload decode failure.
    Protocol(String),
    /// Rendezvous marker creation or release failure.
    Rendezvous(String),
    /// Console capability capture or restoration failure.
    Console(String),
    /// Reference resolution failure (localized to one request).
    Resolve(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Connect(msg) => write!(f, "connect: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Rendezvous(msg) => write!(f, "rendezvous: {msg}"),
            Self::Console(msg) => write!(f, "console: {msg}"),
            Self::Resolve(msg) => write!(f, "resolve: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
