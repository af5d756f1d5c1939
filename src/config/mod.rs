//! Settings model, loading, and on-disk locations.

pub mod loader;
pub mod model;

use std::path::{Path, PathBuf};

pub use model::Settings;

use crate::error::ConfigError;

/// Directory name created under the platform data directory.
const APP_DIR_NAME: &str = "convert-queue";

/// File locations inside the application data directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Root data directory.
    pub data_dir: PathBuf,
    /// Persisted [`Settings`].
    pub settings: PathBuf,
    /// Queue snapshot written after every mutation.
    pub queue: PathBuf,
    /// Append-only audit log.
    pub history: PathBuf,
}

impl AppPaths {
    /// Lays out the files under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            settings: data_dir.join("settings.json"),
            queue: data_dir.join("queue.json"),
            history: data_dir.join("history.log"),
            data_dir,
        }
    }

    /// Uses `explicit` when given, else the platform data directory.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(dir) => Ok(Self::new(dir)),
            None => dirs::data_dir()
                .map(|d| Self::new(d.join(APP_DIR_NAME)))
                .ok_or(ConfigError::NoDataDir),
        }
    }
}
