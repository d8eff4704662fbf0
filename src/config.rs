//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::handshake;
use crate::{AppError, Result};

/// Configuration shared by the daemon and the client CLI.
///
/// Loaded from an optional TOML file; every field has a default so the
/// tools run with no configuration at all.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct GlobalConfig {
    /// Build tool binary the daemon hosts per build command.
    #[serde(default = "default_tool_path")]
    pub tool_path: PathBuf,

    /// Root directory the daemon resolves reference names under.
    #[serde(default = "default_references_root")]
    pub references_root: PathBuf,

    /// Directory holding rendezvous markers and identity state.
    #[serde(default = "handshake::default_rendezvous_dir")]
    pub rendezvous_dir: PathBuf,

    /// Run the worker at lowered scheduling priority.
    #[serde(default)]
    pub low_priority: bool,

    /// Worker executable the client launches; defaults to `forgelinkd`
    /// next to the client binary.
    #[serde(default)]
    pub worker_exe: Option<PathBuf>,

    /// Connect budget (milliseconds) after a cold launch.
    #[serde(default = "default_cold_connect_ms")]
    pub cold_connect_ms: u64,

    /// Connect budget (milliseconds) against a warm server.
    #[serde(default = "default_warm_connect_ms")]
    pub warm_connect_ms: u64,
}

fn default_tool_path() -> PathBuf {
    PathBuf::from("forge")
}

fn default_references_root() -> PathBuf {
    PathBuf::from("references")
}

fn default_cold_connect_ms() -> u64 {
    20_000
}

fn default_warm_connect_ms() -> u64 {
    1_000
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            tool_path: default_tool_path(),
            references_root: default_references_root(),
            rendezvous_dir: handshake::default_rendezvous_dir(),
            low_priority: false,
            worker_exe: None,
            cold_connect_ms: default_cold_connect_ms(),
            warm_connect_ms: default_warm_connect_ms(),
        }
    }
}

impl GlobalConfig {
    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] for malformed TOML, unknown fields, or
    /// values failing validation.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, or the defaults when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|err| {
                    AppError::Config(format!("cannot read config {}: {err}", path.display()))
                })?;
                Self::from_toml_str(&text)
            }
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.tool_path.as_os_str().is_empty() {
            return Err(AppError::Config("tool_path must not be empty".into()));
        }
        if self.cold_connect_ms == 0 || self.warm_connect_ms == 0 {
            return Err(AppError::Config(
                "connect budgets must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
