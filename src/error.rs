//! Error types for the conversion queue.

use std::path::PathBuf;
use thiserror::Error;

/// Settings loading and parsing errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse settings file '{path}': {message}")]
    ParseFailed { path: PathBuf, message: String },

    #[error("Invalid value '{value}' for {field}{hint}")]
    InvalidValue {
        field: &'static str,
        value: String,
        /// Rendered suggestion, e.g. " (did you mean 'MKV'?)", or empty.
        hint: String,
    },

    #[error("Could not determine a data directory for this platform")]
    NoDataDir,
}

/// Queue controller errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Source file not found: '{path}'")]
    SourceMissing { path: PathBuf },

    #[error("'{path}' is already queued or converting")]
    Duplicate { path: PathBuf },

    #[error("Unable to create output directory '{dir}': {message}")]
    OutputUnavailable { dir: PathBuf, message: String },

    #[error("Job not found: {job_id}")]
    UnknownJob { job_id: String },

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Queue controller is no longer running")]
    ControllerClosed,
}

/// Encoding engine errors.
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("FFmpeg not found. Place ffmpeg next to the executable or on the system PATH")]
    NotFound,

    #[error("FFmpeg failed with exit code {code}: {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Encoding timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Conversion task stopped unexpectedly: {0}")]
    Aborted(String),

    #[error("Encoder IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Snapshot and settings persistence errors.
///
/// Never surfaced past [`crate::store::StateStore`]; save failures are logged.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Capability detection errors.
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("Failed to run '{command}': {message}")]
    CommandFailed { command: String, message: String },

    #[error("Required tool '{tool}' not found in PATH")]
    ToolNotFound { tool: String },
}

/// Errors from scheduling a system shutdown.
#[derive(Error, Debug)]
pub enum PowerError {
    #[error("Automatic shutdown is not supported on this platform")]
    Unsupported,

    #[error("Shutdown command failed: {0}")]
    CommandFailed(String),
}
