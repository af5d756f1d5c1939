//! FFmpeg subprocess wrapper.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{build_invocation, EncodeOutcome, Transcoder};
use crate::error::EncoderError;
use crate::queue::job::Job;
use crate::validation::SystemCapabilities;

/// Stderr lines kept for the failure message.
const STDERR_TAIL_LINES: usize = 12;

/// Converts jobs by spawning the FFmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    /// Resolved binary; `None` makes every run fail with [`EncoderError::NotFound`].
    binary: Option<PathBuf>,
}

impl FfmpegTranscoder {
    /// Uses an already resolved binary path.
    pub fn new(binary: Option<PathBuf>) -> Self {
        Self { binary }
    }

    /// Uses the binary found during capability detection.
    pub fn from_capabilities(capabilities: &SystemCapabilities) -> Self {
        Self::new(capabilities.ffmpeg.clone())
    }
}

impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        job: &Job,
        lines: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<EncodeOutcome, EncoderError> {
        let binary = self.binary.as_ref().ok_or(EncoderError::NotFound)?;

        let mut cmd = Command::new(binary);
        cmd.args(build_invocation(job));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        info!(
            job_id = %job.id,
            input = ?job.input_path,
            output = ?job.output_path,
            "Starting FFmpeg"
        );
        debug!(cmd = ?cmd, "FFmpeg command");

        let mut child = cmd
            .spawn()
            .map_err(|e| EncoderError::SpawnFailed(e.to_string()))?;

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward_lines(out, lines.clone(), 0)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward_lines(err, lines, STDERR_TAIL_LINES)));

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(job_id = %job.id, error = %e, "Failed to kill FFmpeg");
                }
                child.wait().await?
            }
        };

        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if cancel.is_cancelled() {
            info!(job_id = %job.id, "FFmpeg stopped after cancellation");
            return Ok(EncodeOutcome::Cancelled);
        }

        if !status.success() {
            return Err(EncoderError::FfmpegFailed {
                code: status.code().unwrap_or(-1),
                stderr: stderr_tail.join("\n"),
            });
        }

        info!(job_id = %job.id, "FFmpeg finished");
        Ok(EncodeOutcome::Finished)
    }
}

/// Forwards output split on `\r` or `\n`; FFmpeg rewrites its stats line with `\r`.
///
/// Returns the last `keep` non-empty lines.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>, keep: usize) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<u8> = Vec::new();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(keep);

    loop {
        let mut complete = Vec::new();
        let consumed = match reader.fill_buf().await {
            Ok([]) | Err(_) => break,
            Ok(chunk) => {
                for &byte in chunk {
                    if byte == b'\n' || byte == b'\r' {
                        if !pending.is_empty() {
                            complete.push(String::from_utf8_lossy(&pending).into_owned());
                            pending.clear();
                        }
                    } else {
                        pending.push(byte);
                    }
                }
                chunk.len()
            }
        };
        reader.consume(consumed);

        for line in complete {
            remember(&mut tail, &line, keep);
            let _ = tx.send(line).await;
        }
    }

    if !pending.is_empty() {
        let line = String::from_utf8_lossy(&pending).into_owned();
        remember(&mut tail, &line, keep);
        let _ = tx.send(line).await;
    }

    tail.into_iter().collect()
}

fn remember(tail: &mut VecDeque<String>, line: &str, keep: usize) {
    if keep == 0 || line.trim().is_empty() {
        return;
    }
    if tail.len() == keep {
        tail.pop_front();
    }
    tail.push_back(line.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::Settings;
    use crate::queue::job::JobOptions;

    #[tokio::test]
    async fn carriage_returns_split_lines() {
        let (tx, mut rx) = mpsc::channel(16);
        let input: &[u8] = b"Duration: 00:00:10.00\nframe=1 time=00:00:01.00\rframe=2 time=00:00:02.00\rerror: boom";

        let tail = forward_lines(input, tx, 2).await;

        let mut seen = Vec::new();
        while let Some(line) = rx.recv().await {
            seen.push(line);
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[2], "frame=2 time=00:00:02.00");
        assert_eq!(tail, vec!["frame=2 time=00:00:02.00", "error: boom"]);
    }

    #[tokio::test]
    async fn missing_binary_fails_fast() {
        let transcoder = FfmpegTranscoder::new(None);
        let job = Job::new(
            PathBuf::from("/in/a.mov"),
            JobOptions::from_settings(&Settings::default()),
            PathBuf::from("/out/a.mp4"),
        );
        let (tx, _rx) = mpsc::channel(1);
        let result = transcoder
            .transcode(&job, tx, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(EncoderError::NotFound)));
    }
}
