//! Server settings.
//!
//! Layered with the `config` crate, later sources overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. `server.toml` in the platform config directory (optional)
//! 3. `BEACON_*` environment variables, e.g. `BEACON_BIND_ADDRESS`

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Default listen address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Settings for the HTTP shell, distinct from the engine's own configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Socket address to listen on.
    pub bind_address: SocketAddr,

    /// Directory for persisted engine state. Defaults to the platform data
    /// directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Production logging (JSON file + compact stdout).
    #[serde(default)]
    pub production: bool,

    /// Directory for production log files.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Engine configuration applied at startup when nothing is persisted.
    #[serde(default)]
    pub engine_config: Option<PathBuf>,
}

impl ServerSettings {
    /// Load settings from the default file location and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&settings_path())
    }

    /// Load settings using `path` as the optional settings file.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("bind_address", DEFAULT_BIND_ADDRESS)?
            .set_default("production", false)?
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("BEACON").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

/// Returns the settings file location for the current platform.
fn settings_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/beacon/server.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon")
            .map(|dirs| dirs.config_dir().join("server.toml"))
            .unwrap_or_else(|| PathBuf::from("./server.toml"))
    }
}
