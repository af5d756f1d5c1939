//! Printable outcome of `config-validate`.

use std::fmt::Write;
use std::path::Path;

use super::{SystemCapabilities, ValidationIssue, ValidationResult, ValidationSeverity};
use crate::config::Settings;

/// Describes the settings file, the engine found on this machine, and every
/// problem grouped by the setting it concerns, errors first.
pub fn format_report(
    settings_path: &Path,
    capabilities: &SystemCapabilities,
    result: &ValidationResult,
) -> String {
    let mut out = String::new();

    let ffmpeg = capabilities
        .ffmpeg
        .as_deref()
        .map_or_else(|| "not found".to_string(), |p| p.display().to_string());
    let encoder = capabilities.preferred_encoder().unwrap_or("none, CPU only");
    let _ = writeln!(out, "Settings file:    {}", settings_path.display());
    let _ = writeln!(out, "FFmpeg:           {ffmpeg}");
    let _ = writeln!(out, "Hardware encoder: {encoder}");
    out.push('\n');

    let mut issues: Vec<&ValidationIssue> = result.errors().chain(result.warnings()).collect();
    issues.sort_by_key(|issue| (issue.severity != ValidationSeverity::Error, issue.path.as_str()));

    for issue in &issues {
        let marker = match issue.severity {
            ValidationSeverity::Error => "[error]",
            ValidationSeverity::Warning => "[warn] ",
        };
        let _ = writeln!(out, "{marker} {}: {}", issue.path, issue.message);
        match (&issue.suggestion, is_settable(&issue.path)) {
            (Some(suggestion), _) => {
                let _ = writeln!(out, "        {suggestion}");
            }
            (None, true) if issue.severity == ValidationSeverity::Error => {
                let _ = writeln!(
                    out,
                    "        change it with: convert-queue config-set {} <value>",
                    issue.path
                );
            }
            _ => {}
        }
    }

    out.push_str(&verdict(result));
    out
}

fn is_settable(key: &str) -> bool {
    Settings::KEYS.contains(&key)
}

fn verdict(result: &ValidationResult) -> String {
    let errors = result.error_count();
    let warnings = result.warnings().count();
    match (errors, warnings) {
        (0, 0) => "No problems found. Conversions can run.".to_string(),
        (0, w) => format!("Usable with {w} warning(s)."),
        (e, w) => format!(
            "{e} error(s), {w} warning(s). Conversions will fail until the errors are fixed."
        ),
    }
}
