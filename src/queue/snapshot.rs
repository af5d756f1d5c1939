//! Persisted queue entries.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::job::{Job, JobOptions};
use crate::config::model::{OutputFormat, QualityTier, Resolution, Settings};

/// One still-pending job as written to the queue snapshot.
///
/// Fields missing from older files fall back to the current settings on restore.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueEntry {
    pub input_path: PathBuf,
    pub output_format: Option<OutputFormat>,
    pub resolution: Option<Resolution>,
    pub quality: Option<QualityTier>,
    pub custom_bitrate: Option<String>,
    pub mute_audio: bool,
    pub audio_only: bool,
    pub audio_overlay_path: Option<PathBuf>,
    pub output_directory: Option<PathBuf>,
    pub use_hardware_acceleration: bool,
    pub hardware_encoder: Option<String>,
    pub retry_count: i64,
}

impl QueueEntry {
    /// Captures the restorable part of a job.
    pub fn from_job(job: &Job) -> Self {
        let opts = &job.options;
        Self {
            input_path: job.input_path.clone(),
            output_format: Some(opts.output_format),
            resolution: Some(opts.resolution),
            quality: Some(opts.quality),
            custom_bitrate: opts.custom_bitrate.clone(),
            mute_audio: opts.mute_audio,
            audio_only: opts.audio_only,
            audio_overlay_path: opts.audio_overlay.clone(),
            output_directory: Some(opts.output_dir.clone()),
            use_hardware_acceleration: opts.use_hardware,
            hardware_encoder: opts.hardware_encoder.clone(),
            retry_count: i64::from(job.retry_count),
        }
    }

    /// Rebuilds job options, filling gaps from `settings`.
    pub fn to_options(&self, settings: &Settings) -> JobOptions {
        JobOptions {
            output_format: self.output_format.unwrap_or(settings.default_format),
            resolution: self.resolution.unwrap_or_default(),
            quality: self.quality.unwrap_or_default(),
            custom_bitrate: self.custom_bitrate.clone(),
            mute_audio: self.mute_audio,
            audio_only: self.audio_only,
            audio_overlay: self.audio_overlay_path.clone(),
            output_dir: self
                .output_directory
                .clone()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| settings.output_dir.clone()),
            use_hardware: self.use_hardware_acceleration,
            hardware_encoder: self.hardware_encoder.clone(),
        }
    }

    /// Persisted retry count, never negative.
    pub fn retry_count(&self) -> u32 {
        u32::try_from(self.retry_count.max(0)).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_entry_uses_settings_defaults() {
        let entry: QueueEntry =
            serde_json::from_str(r#"{"input_path":"/in/a.mov","retry_count":-3}"#).unwrap();
        let settings = Settings {
            default_format: OutputFormat::Mkv,
            output_dir: PathBuf::from("/videos"),
            ..Settings::default()
        };

        let opts = entry.to_options(&settings);
        assert_eq!(opts.output_format, OutputFormat::Mkv);
        assert_eq!(opts.resolution, Resolution::Original);
        assert_eq!(opts.quality, QualityTier::High);
        assert_eq!(opts.output_dir, PathBuf::from("/videos"));
        assert_eq!(entry.retry_count(), 0);
    }
}
