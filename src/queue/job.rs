//! Conversion job definitions and their state machine.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::model::{
    normalize_bitrate, OutputFormat, QualityTier, Resolution, Settings, DEFAULT_CUSTOM_BITRATE,
};
use crate::encoder::progress::ProgressState;
use crate::error::QueueError;

/// Identifier handed out when a job is accepted.
pub type JobId = String;

/// Conversion options fixed when a job is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Target format.
    pub output_format: OutputFormat,
    /// Target frame size.
    pub resolution: Resolution,
    /// Quality tier.
    pub quality: QualityTier,
    /// Bitrate in kbps, only meaningful for [`QualityTier::Custom`].
    pub custom_bitrate: Option<String>,
    /// Drop the audio track.
    pub mute_audio: bool,
    /// Drop the video track.
    pub audio_only: bool,
    /// Second audio input mixed over the source audio.
    pub audio_overlay: Option<PathBuf>,
    /// Directory that receives the output file.
    pub output_dir: PathBuf,
    /// Use the hardware encoder.
    pub use_hardware: bool,
    /// FFmpeg name of the hardware encoder, e.g. `h264_nvenc`.
    pub hardware_encoder: Option<String>,
}

impl JobOptions {
    /// Options for a newly added file taken from the current settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            output_format: settings.default_format,
            resolution: settings.default_resolution,
            quality: settings.default_quality,
            custom_bitrate: Some(settings.custom_bitrate.clone()),
            mute_audio: settings.mute_audio,
            audio_only: settings.audio_only,
            audio_overlay: None,
            output_dir: settings.output_dir.clone(),
            use_hardware: settings.use_gpu,
            hardware_encoder: None,
        }
    }

    /// Applies the bitrate and hardware rules.
    ///
    /// The bitrate is reduced to its digits; custom quality without a valid
    /// bitrate gets [`DEFAULT_CUSTOM_BITRATE`]. Hardware encoding is kept only
    /// when an encoder was detected, the format supports it and video is produced.
    pub fn normalized(mut self, detected_encoder: Option<&str>) -> Self {
        self.custom_bitrate = self.custom_bitrate.as_deref().and_then(normalize_bitrate);
        if self.quality == QualityTier::Custom && self.custom_bitrate.is_none() {
            self.custom_bitrate = Some(DEFAULT_CUSTOM_BITRATE.to_string());
        }

        let encoder = self
            .hardware_encoder
            .take()
            .or_else(|| detected_encoder.map(str::to_string));
        self.use_hardware = self.use_hardware
            && encoder.is_some()
            && self.output_format.supports_gpu()
            && !self.audio_only;
        self.hardware_encoder = if self.use_hardware { encoder } else { None };
        self
    }

    /// Short description used in the audit log.
    pub fn describe_target(&self) -> String {
        if self.audio_only {
            format!("{} (audio only)", self.output_format)
        } else {
            format!("{} {}", self.output_format, self.resolution)
        }
    }
}

/// A file submitted for conversion.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Source media file.
    pub input_path: PathBuf,
    /// Options, normalized by the controller on admission.
    pub options: JobOptions,
}

impl JobRequest {
    /// Creates a request for `input_path` with the given options.
    pub fn new(input_path: impl Into<PathBuf>, options: JobOptions) -> Self {
        Self {
            input_path: input_path.into(),
            options,
        }
    }
}

/// A conversion job tracked by the queue controller.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,

    /// Path to the source file.
    pub input_path: PathBuf,

    /// File name shown in listings and the audit log.
    pub file_name: String,

    /// Source size in bytes at admission.
    pub file_size: u64,

    /// Conversion options.
    pub options: JobOptions,

    /// Current status of the job.
    pub status: JobStatus,

    /// Resolved output path; re-resolved at every launch.
    pub output_path: PathBuf,

    /// Conversion progress percentage (0-100).
    pub progress: u8,

    /// Engine throughput as a multiple of real time.
    pub speed: f32,

    /// Media duration reported by the engine.
    pub total_duration: Option<Duration>,

    /// Retries consumed so far.
    pub retry_count: u32,

    /// Set while a backoff delay is outstanding.
    pub retry_pending: bool,

    /// Last failure reason.
    pub error_message: Option<String>,

    /// Timestamp when the job was created.
    pub created_at: DateTime<Utc>,

    /// Timestamp when the current attempt started.
    pub started_at: Option<DateTime<Utc>>,

    /// Timestamp of the last state change.
    pub updated_at: DateTime<Utc>,

    /// Present only while converting.
    pub(crate) cancel: Option<CancellationToken>,
}

impl Job {
    /// Creates a queued job.
    pub fn new(input_path: PathBuf, options: JobOptions, output_path: PathBuf) -> Self {
        let now = Utc::now();
        let file_name = input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input_path.display().to_string());
        let file_size = std::fs::metadata(&input_path).map(|m| m.len()).unwrap_or(0);

        Self {
            id: Uuid::new_v4().to_string(),
            input_path,
            file_name,
            file_size,
            options,
            status: JobStatus::Queued,
            output_path,
            progress: 0,
            speed: 0.0,
            total_duration: None,
            retry_count: 0,
            retry_pending: false,
            error_message: None,
            created_at: now,
            started_at: None,
            updated_at: now,
            cancel: None,
        }
    }

    /// Queued or converting.
    pub fn is_active(&self) -> bool {
        matches!(self.status, JobStatus::Queued | JobStatus::Converting)
    }

    /// Waiting for a slot with no backoff outstanding.
    pub fn is_launchable(&self) -> bool {
        self.status == JobStatus::Queued && !self.retry_pending
    }

    /// Case-insensitive comparison against another source path.
    pub fn matches_input(&self, path: &Path) -> bool {
        same_path_ignoring_case(&self.input_path, path)
    }

    /// Time since the current attempt started.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at
            .and_then(|start| (Utc::now() - start).to_std().ok())
    }

    /// Moves a queued job to converting and hands out its cancellation token.
    pub fn begin(&mut self, output_path: PathBuf) -> Result<CancellationToken, QueueError> {
        self.ensure_status(JobStatus::Queued, JobStatus::Converting)?;
        let token = CancellationToken::new();
        self.status = JobStatus::Converting;
        self.output_path = output_path;
        self.retry_pending = false;
        self.progress = 0;
        self.speed = 0.0;
        self.total_duration = None;
        self.started_at = Some(Utc::now());
        self.cancel = Some(token.clone());
        self.touch();
        Ok(token)
    }

    /// Merges parsed engine progress. Ignored unless converting; never lowers progress.
    pub fn apply_progress(&mut self, state: &ProgressState) -> bool {
        if self.status != JobStatus::Converting {
            return false;
        }
        let percent = state.percent.min(100).max(self.progress);
        let changed = percent != self.progress
            || state.speed != self.speed
            || state.total_duration != self.total_duration;
        self.progress = percent;
        self.speed = state.speed;
        self.total_duration = state.total_duration;
        if changed {
            self.touch();
        }
        changed
    }

    /// Marks the conversion as finished; the retry budget is refilled.
    pub fn complete(&mut self) -> Result<(), QueueError> {
        self.ensure_status(JobStatus::Converting, JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.retry_count = 0;
        self.error_message = None;
        self.cancel = None;
        self.touch();
        Ok(())
    }

    /// Marks a converting job as cancelled.
    pub fn mark_cancelled(&mut self) -> Result<(), QueueError> {
        self.ensure_status(JobStatus::Converting, JobStatus::Cancelled)?;
        self.status = JobStatus::Cancelled;
        self.cancel = None;
        self.touch();
        Ok(())
    }

    /// Marks a converting job as permanently failed.
    pub fn fail(&mut self, error: String) -> Result<(), QueueError> {
        self.ensure_status(JobStatus::Converting, JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.error_message = Some(error);
        self.cancel = None;
        self.touch();
        Ok(())
    }

    /// Fails a job that never reached the engine. Not retried.
    pub fn fail_validation(&mut self, error: impl Into<String>) -> Result<(), QueueError> {
        self.ensure_status(JobStatus::Queued, JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.error_message = Some(error.into());
        self.retry_pending = false;
        self.touch();
        Ok(())
    }

    /// Returns a failed attempt to the queue, consuming one retry.
    ///
    /// Returns the new retry count. The caller owns the backoff; the job stays
    /// unlaunchable until `retry_pending` is cleared.
    pub fn schedule_retry(&mut self, error: String, max_retries: u32) -> Result<u32, QueueError> {
        self.ensure_status(JobStatus::Converting, JobStatus::Queued)?;
        if self.retry_count >= max_retries {
            return Err(self.transition_error(JobStatus::Queued));
        }
        self.retry_count += 1;
        self.retry_pending = true;
        self.status = JobStatus::Queued;
        self.error_message = Some(error);
        self.progress = 0;
        self.speed = 0.0;
        self.total_duration = None;
        self.started_at = None;
        self.cancel = None;
        self.touch();
        Ok(self.retry_count)
    }

    fn ensure_status(&self, from: JobStatus, to: JobStatus) -> Result<(), QueueError> {
        if self.status == from {
            Ok(())
        } else {
            Err(self.transition_error(to))
        }
    }

    fn transition_error(&self, to: JobStatus) -> QueueError {
        QueueError::InvalidTransition {
            job_id: self.id.clone(),
            from: self.status.as_str(),
            to: to.as_str(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Compares two paths the way a case-insensitive file system would.
pub fn same_path_ignoring_case(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}

/// Status of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a free slot (or for a retry delay to elapse).
    Queued,
    /// The engine is running.
    Converting,
    /// Output written successfully.
    Completed,
    /// Gave up after validation or exhausted retries.
    Failed,
    /// Stopped by the operator.
    Cancelled,
}

impl JobStatus {
    /// Lowercase status name.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Converting => "converting",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// No further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> JobOptions {
        JobOptions::from_settings(&Settings::default())
    }

    fn job() -> Job {
        Job::new(
            PathBuf::from("/media/Clip.mov"),
            options(),
            PathBuf::from("/out/Clip.mp4"),
        )
    }

    fn progress(percent: u8) -> ProgressState {
        ProgressState {
            percent,
            ..ProgressState::default()
        }
    }

    #[test]
    fn custom_quality_gets_default_bitrate() {
        let mut opts = options();
        opts.quality = QualityTier::Custom;
        opts.custom_bitrate = Some("abc".into());
        let opts = opts.normalized(None);
        assert_eq!(opts.custom_bitrate.as_deref(), Some("5000"));
    }

    #[test]
    fn hardware_dropped_for_audio_only_or_unsupported_format() {
        let mut opts = options();
        opts.use_hardware = true;
        let kept = opts.clone().normalized(Some("h264_nvenc"));
        assert!(kept.use_hardware);
        assert_eq!(kept.hardware_encoder.as_deref(), Some("h264_nvenc"));

        let mut webm = opts.clone();
        webm.output_format = OutputFormat::Webm;
        let webm = webm.normalized(Some("h264_nvenc"));
        assert!(!webm.use_hardware);
        assert!(webm.hardware_encoder.is_none());

        let mut audio = opts.clone();
        audio.audio_only = true;
        assert!(!audio.normalized(Some("h264_nvenc")).use_hardware);

        assert!(!opts.normalized(None).use_hardware);
    }

    #[test]
    fn progress_is_monotonic_while_converting() {
        let mut job = job();
        assert!(!job.apply_progress(&progress(10)));
        job.begin(PathBuf::from("/out/Clip.mp4")).unwrap();

        job.apply_progress(&progress(40));
        job.apply_progress(&progress(25));
        assert_eq!(job.progress, 40);
        job.apply_progress(&progress(250));
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn retry_budget_is_enforced() {
        let mut job = job();
        for expected in 1..=2 {
            job.begin(PathBuf::from("/out/Clip.mp4")).unwrap();
            assert_eq!(job.schedule_retry("boom".into(), 2).unwrap(), expected);
            assert!(job.retry_pending);
            assert!(!job.is_launchable());
            job.retry_pending = false;
        }
        job.begin(PathBuf::from("/out/Clip.mp4")).unwrap();
        assert!(job.schedule_retry("boom".into(), 2).is_err());
        job.fail("boom".into()).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 2);
    }

    #[test]
    fn success_resets_retry_count() {
        let mut job = job();
        job.begin(PathBuf::from("/out/Clip.mp4")).unwrap();
        job.schedule_retry("boom".into(), 2).unwrap();
        job.retry_pending = false;
        job.begin(PathBuf::from("/out/Clip.mp4")).unwrap();
        job.complete().unwrap();
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.progress, 100);
        assert!(job.cancel.is_none());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut job = job();
        assert!(job.complete().is_err());
        assert!(job.mark_cancelled().is_err());
        job.fail_validation("Source file missing").unwrap();
        assert!(job.status.is_terminal());
        assert!(job.begin(PathBuf::from("/out/Clip.mp4")).is_err());
    }

    #[test]
    fn input_match_ignores_case() {
        let job = job();
        assert!(job.matches_input(Path::new("/MEDIA/clip.MOV")));
        assert!(!job.matches_input(Path::new("/media/other.mov")));
    }
}
