//! Output directory checks.

use std::path::Path;

use crate::config::Settings;

use super::{ValidationIssue, ValidationResult};

/// Validates that the output directory can receive files.
pub fn validate(settings: &Settings) -> ValidationResult {
    let mut result = ValidationResult::new();
    validate_directory_writable(&settings.output_dir, "output_dir", &mut result);
    result
}

/// Validates that a directory is writable, or could be created.
fn validate_directory_writable(path: &Path, field: &str, result: &mut ValidationResult) {
    if !path.exists() {
        result.add(ValidationIssue::warning(
            field,
            format!(
                "Directory does not exist yet and will be created: '{}'",
                path.display()
            ),
        ));
        return;
    }

    if !path.is_dir() {
        result.add(
            ValidationIssue::error(
                field,
                format!("Path is not a directory: '{}'", path.display()),
            )
            .with_suggestion("Point output_dir at a directory"),
        );
        return;
    }

    let scratch = path.join(".convert-queue-write-test");
    match std::fs::write(&scratch, "test") {
        Ok(()) => {
            let _ = std::fs::remove_file(&scratch);
        }
        Err(e) => {
            result.add(
                ValidationIssue::error(
                    field,
                    format!("Directory is not writable '{}': {}", path.display(), e),
                )
                .with_suggestion("Check directory permissions"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_as_output_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out");
        std::fs::write(&file, b"x").unwrap();

        let settings = Settings {
            output_dir: file,
            ..Settings::default()
        };
        assert!(!validate(&settings).is_valid());
    }

    #[test]
    fn missing_dir_is_only_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            output_dir: dir.path().join("later"),
            ..Settings::default()
        };
        let result = validate(&settings);
        assert!(result.is_valid());
        assert_eq!(result.warnings().count(), 1);
        assert!(!dir.path().join("later").exists());
    }
}
