// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Runtime configuration.
//!
//! Values come from an optional TOML file, then `QRLOGIN_*` environment
//! variables, then command-line flags (applied by the CLI).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::engine::DEFAULT_DEBOUNCE_WINDOW;

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Minimum time between two transitions of one identity, in ms.
    pub debounce_window_ms: u64,
    /// V4L2 device index (`/dev/videoN`).
    pub camera_index: usize,
    /// SQLite file holding users, sessions and events.
    pub store_path: PathBuf,
    /// Where triggering frames are saved; disabled when unset.
    pub snapshot_dir: Option<PathBuf>,
    /// Replay frames from this directory instead of the camera.
    pub frame_dir: Option<PathBuf>,
    pub refresh_last_seen: bool,
    /// Consecutive store failures after which the capture loop gives up.
    pub max_consecutive_store_failures: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW.as_millis() as u64,
            camera_index: 0,
            store_path: PathBuf::from("data/user_database.db"),
            snapshot_dir: None,
            frame_dir: None,
            refresh_last_seen: false,
            max_consecutive_store_failures: 5,
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        Err(_) => Ok(None),
    }
}

impl Config {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `QRLOGIN_STORE_PATH`, `QRLOGIN_CAMERA_INDEX` and
    /// `QRLOGIN_DEBOUNCE_MS`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = std::env::var("QRLOGIN_STORE_PATH") {
            self.store_path = PathBuf::from(path);
        }
        if let Some(index) = env_parse("QRLOGIN_CAMERA_INDEX")? {
            self.camera_index = index;
        }
        if let Some(ms) = env_parse("QRLOGIN_DEBOUNCE_MS")? {
            self.debounce_window_ms = ms;
        }
        Ok(())
    }

    /// File (if given) plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        cfg.apply_env()?;
        Ok(cfg)
    }
}
