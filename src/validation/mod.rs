//! Settings validation and engine capability detection.

pub mod capabilities;
pub mod paths;
pub mod report;
pub mod settings;

use crate::config::Settings;

pub use capabilities::SystemCapabilities;

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Conversions cannot work until fixed.
    Error,
    /// Logged but allows running.
    Warning,
}

/// A validation issue found while checking settings.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue.
    pub severity: ValidationSeverity,
    /// Settings field the issue refers to (e.g., "output_dir").
    pub path: String,
    /// Description of the issue.
    pub message: String,
    /// Optional suggestion for fixing the issue.
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Creates a new error-level validation issue.
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ValidationSeverity::Error,
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Creates a new warning-level validation issue.
    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ValidationSeverity::Warning,
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Adds a suggestion to this validation issue.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Result of validating settings.
#[derive(Debug, Default)]
pub struct ValidationResult {
    issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Creates an empty validation result.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Adds an issue to the result.
    pub fn add(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    /// Extends the result with issues from another result.
    pub fn extend(&mut self, other: ValidationResult) {
        self.issues.extend(other.issues);
    }

    /// Returns true if there are no errors (warnings are allowed).
    pub fn is_valid(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| i.severity == ValidationSeverity::Error)
    }

    /// Returns an iterator over error-level issues.
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == ValidationSeverity::Error)
    }

    /// Returns an iterator over warning-level issues.
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == ValidationSeverity::Warning)
    }

    /// Returns the number of errors.
    pub fn error_count(&self) -> usize {
        self.errors().count()
    }
}

/// Checks settings against the detected engine and the file system.
pub fn validate_settings(settings: &Settings, capabilities: &SystemCapabilities) -> ValidationResult {
    let mut result = ValidationResult::new();

    result.extend(settings::validate(settings, capabilities));
    result.extend(paths::validate(settings));

    result
}

/// Logs every issue through tracing.
pub fn log_issues(result: &ValidationResult) {
    for issue in result.errors() {
        tracing::error!(
            path = %issue.path,
            message = %issue.message,
            suggestion = ?issue.suggestion,
            "Settings validation error"
        );
    }
    for issue in result.warnings() {
        tracing::warn!(
            path = %issue.path,
            message = %issue.message,
            suggestion = ?issue.suggestion,
            "Settings validation warning"
        );
    }
}
