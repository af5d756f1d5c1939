//! FFmpeg invocation: argument building, progress parsing and process control.

pub mod args;
pub mod ffmpeg;
pub mod progress;
pub mod worker;

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::EncoderError;
use crate::queue::job::Job;

pub use args::{build_invocation, HardwareFamily};
pub use ffmpeg::FfmpegTranscoder;
pub use progress::{parse_progress_line, ProgressState};

/// How an engine run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// The engine exited successfully.
    Finished,
    /// The cancellation token fired and the engine was stopped.
    Cancelled,
}

/// Runs one conversion attempt for a job.
///
/// Implementations forward every raw output line to `lines` and must return
/// promptly with [`EncodeOutcome::Cancelled`] once `cancel` fires.
pub trait Transcoder: Send + Sync + 'static {
    fn transcode(
        &self,
        job: &Job,
        lines: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<EncodeOutcome, EncoderError>> + Send;
}
