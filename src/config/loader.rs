//! Settings file loading and parsing.

use std::path::Path;

use tracing::warn;

use super::model::Settings;
use crate::error::ConfigError;

/// Loads the settings file from disk and parses it.
pub fn load_from_path(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let settings: Settings =
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(settings.normalized())
}

/// Loads settings, falling back to defaults when the file is absent or unreadable.
pub fn load_or_default(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }

    match load_from_path(path) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(error = %e, "Settings unreadable, using defaults");
            Settings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            load_from_path(&path),
            Err(ConfigError::ParseFailed { .. })
        ));
        assert_eq!(load_or_default(&path), Settings::default());
    }

    #[test]
    fn out_of_range_concurrency_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"max_concurrency": 12, "custom_bitrate": "2.5k"}"#).unwrap();

        let settings = load_from_path(&path).unwrap();
        assert_eq!(settings.max_concurrency, 6);
        assert_eq!(settings.custom_bitrate, "25");
    }
}
