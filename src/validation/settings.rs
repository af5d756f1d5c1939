//! Semantic checks on settings values.

use crate::config::model::{normalize_bitrate, QualityTier, MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::config::Settings;
use crate::power;

use super::{SystemCapabilities, ValidationIssue, ValidationResult};

/// Retry budgets above this are almost certainly a typo.
const SANE_MAX_RETRIES: u32 = 10;

/// Validates settings values against each other and the detected engine.
pub fn validate(settings: &Settings, capabilities: &SystemCapabilities) -> ValidationResult {
    let mut result = ValidationResult::new();

    if capabilities.ffmpeg.is_none() {
        result.add(
            ValidationIssue::error("ffmpeg", "FFmpeg binary not found")
                .with_suggestion("Install ffmpeg or place it next to the convert-queue binary"),
        );
    }

    if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&settings.max_concurrency) {
        result.add(ValidationIssue::error(
            "max_concurrency",
            format!(
                "{} is outside {MIN_CONCURRENCY}..={MAX_CONCURRENCY}",
                settings.max_concurrency
            ),
        ));
    }

    if normalize_bitrate(&settings.custom_bitrate).is_none() {
        let issue = ValidationIssue::warning(
            "custom_bitrate",
            format!(
                "'{}' is not a positive bitrate, 5000 kbps will be used",
                settings.custom_bitrate
            ),
        );
        result.add(if settings.default_quality == QualityTier::Custom {
            issue.with_suggestion("Use a number of kbps such as 5000")
        } else {
            issue
        });
    }

    if settings.use_gpu {
        if capabilities.preferred_encoder().is_none() {
            result.add(
                ValidationIssue::warning("use_gpu", "No hardware encoder detected, CPU will be used")
                    .with_suggestion("Run `convert-queue encoders` to see what FFmpeg offers"),
            );
        } else if settings.audio_only || !settings.default_format.supports_gpu() {
            result.add(ValidationIssue::warning(
                "use_gpu",
                format!(
                    "Hardware encoding does not apply to {}",
                    if settings.audio_only {
                        "audio-only output".to_string()
                    } else {
                        settings.default_format.to_string()
                    }
                ),
            ));
        }
    }

    if settings.audio_only && !settings.default_format.is_audio() {
        result.add(
            ValidationIssue::warning(
                "default_format",
                format!(
                    "Audio-only output into {} copies the source audio stream",
                    settings.default_format
                ),
            )
            .with_suggestion("Pick MP3, AAC, WAV, FLAC or OGG"),
        );
    }

    if settings.max_retries > SANE_MAX_RETRIES {
        result.add(ValidationIssue::warning(
            "max_retries",
            format!(
                "{} retries with doubling backoff may wait a very long time",
                settings.max_retries
            ),
        ));
    }

    if settings.conversion_timeout_secs == Some(0) {
        result.add(
            ValidationIssue::error("conversion_timeout_secs", "Timeout of zero stops every conversion")
                .with_suggestion("Remove the field to disable the time limit"),
        );
    }

    if settings.auto_shutdown && !power::is_supported() {
        result.add(ValidationIssue::warning(
            "auto_shutdown",
            "Automatic shutdown is not supported on this platform",
        ));
    }

    result
}
