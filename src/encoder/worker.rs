//! Per-job worker task that drives one conversion attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::progress::{parse_progress_line, ProgressState};
use super::{EncodeOutcome, Transcoder};
use crate::error::EncoderError;
use crate::queue::job::{Job, JobId};

/// Message from a worker back to the queue controller.
#[derive(Debug)]
pub enum WorkerReport {
    /// Parsed progress changed.
    Progress { job_id: JobId, state: ProgressState },
    /// The attempt ended; always the last report for an attempt.
    Finished {
        job_id: JobId,
        result: Result<EncodeOutcome, EncoderError>,
    },
}

/// Spawns conversion attempts and reports their progress and outcome.
pub struct EncodeWorker<E> {
    /// Engine used for every attempt.
    encoder: Arc<E>,
    /// Channel to the queue controller.
    reports: mpsc::Sender<WorkerReport>,
    /// Wall-clock limit per attempt.
    timeout: Option<Duration>,
}

impl<E> Clone for EncodeWorker<E> {
    fn clone(&self) -> Self {
        Self {
            encoder: Arc::clone(&self.encoder),
            reports: self.reports.clone(),
            timeout: self.timeout,
        }
    }
}

impl<E: Transcoder> EncodeWorker<E> {
    /// Creates a new encode worker.
    pub fn new(
        encoder: Arc<E>,
        reports: mpsc::Sender<WorkerReport>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            encoder,
            reports,
            timeout,
        }
    }

    /// Changes the per-attempt limit for attempts started afterwards.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Runs one attempt for `job` on a new task.
    ///
    /// A `Finished` report is sent even if the attempt panics.
    pub fn spawn(&self, job: Job, cancel: CancellationToken) -> JoinHandle<()> {
        let worker = self.clone();
        let reports = self.reports.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            let attempt = tokio::spawn(async move { worker.run(job, cancel).await });
            if let Err(e) = attempt.await {
                error!(job_id = %job_id, error = %e, "Conversion task aborted");
                let _ = reports
                    .send(WorkerReport::Finished {
                        job_id,
                        result: Err(EncoderError::Aborted(e.to_string())),
                    })
                    .await;
            }
        })
    }

    async fn run(self, job: Job, cancel: CancellationToken) {
        let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
        // A child token lets the watchdog stop the engine without it reading as an operator cancel.
        let engine_cancel = cancel.child_token();
        let mut state = ProgressState::default();
        let mut timed_out = false;

        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let encode = self
            .encoder
            .transcode(&job, line_tx, engine_cancel.clone());
        tokio::pin!(encode);

        let result = loop {
            tokio::select! {
                Some(line) = line_rx.recv() => self.observe(&job.id, &mut state, &line).await,
                result = &mut encode => break result,
                _ = &mut deadline, if !timed_out => {
                    timed_out = true;
                    warn!(job_id = %job.id, "Conversion exceeded its time limit, stopping engine");
                    engine_cancel.cancel();
                }
            }
        };

        while let Ok(line) = line_rx.try_recv() {
            self.observe(&job.id, &mut state, &line).await;
        }

        let result = match (timed_out && !cancel.is_cancelled(), self.timeout) {
            (true, Some(limit)) => Err(EncoderError::Timeout {
                seconds: limit.as_secs(),
            }),
            _ => result,
        };

        debug!(job_id = %job.id, ?result, "Attempt finished");
        let _ = self
            .reports
            .send(WorkerReport::Finished {
                job_id: job.id.clone(),
                result,
            })
            .await;
    }

    async fn observe(&self, job_id: &str, state: &mut ProgressState, line: &str) {
        trace!(job_id, line, "engine output");
        if parse_progress_line(state, line) {
            let _ = self
                .reports
                .send(WorkerReport::Progress {
                    job_id: job_id.to_string(),
                    state: state.clone(),
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::Settings;
    use crate::queue::job::JobOptions;
    use std::path::PathBuf;

    /// Prints a short FFmpeg-like transcript, then either waits for cancel or finishes.
    struct Chatty {
        hang: bool,
    }

    impl Transcoder for Chatty {
        async fn transcode(
            &self,
            _job: &Job,
            lines: mpsc::Sender<String>,
            cancel: CancellationToken,
        ) -> Result<EncodeOutcome, EncoderError> {
            for line in ["Duration: 00:00:10.00", "time=00:00:05.00 speed=2.0x"] {
                let _ = lines.send(line.to_string()).await;
            }
            if self.hang {
                cancel.cancelled().await;
                return Ok(EncodeOutcome::Cancelled);
            }
            Ok(EncodeOutcome::Finished)
        }
    }

    struct Broken;

    impl Transcoder for Broken {
        async fn transcode(
            &self,
            _job: &Job,
            _lines: mpsc::Sender<String>,
            _cancel: CancellationToken,
        ) -> Result<EncodeOutcome, EncoderError> {
            panic!("engine blew up");
        }
    }

    fn job() -> Job {
        Job::new(
            PathBuf::from("/in/a.mov"),
            JobOptions::from_settings(&Settings::default()),
            PathBuf::from("/out/a.mp4"),
        )
    }

    #[tokio::test]
    async fn reports_progress_then_outcome() {
        let (tx, mut rx) = mpsc::channel(16);
        let worker = EncodeWorker::new(Arc::new(Chatty { hang: false }), tx, None);
        worker.spawn(job(), CancellationToken::new()).await.unwrap();

        let mut last_percent = 0;
        loop {
            match rx.recv().await.unwrap() {
                WorkerReport::Progress { state, .. } => last_percent = state.percent,
                WorkerReport::Finished { result, .. } => {
                    assert!(matches!(result, Ok(EncodeOutcome::Finished)));
                    break;
                }
            }
        }
        assert_eq!(last_percent, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn time_limit_reports_timeout() {
        let (tx, mut rx) = mpsc::channel(16);
        let worker = EncodeWorker::new(
            Arc::new(Chatty { hang: true }),
            tx,
            Some(Duration::from_secs(30)),
        );
        let cancel = CancellationToken::new();
        worker.spawn(job(), cancel.clone()).await.unwrap();

        let finished = loop {
            if let WorkerReport::Finished { result, .. } = rx.recv().await.unwrap() {
                break result;
            }
        };
        assert!(matches!(finished, Err(EncoderError::Timeout { seconds: 30 })));
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn operator_cancel_is_not_a_timeout() {
        let (tx, mut rx) = mpsc::channel(16);
        let worker = EncodeWorker::new(
            Arc::new(Chatty { hang: true }),
            tx,
            Some(Duration::from_secs(3600)),
        );
        let cancel = CancellationToken::new();
        let handle = worker.spawn(job(), cancel.clone());
        cancel.cancel();
        handle.await.unwrap();

        let finished = loop {
            if let WorkerReport::Finished { result, .. } = rx.recv().await.unwrap() {
                break result;
            }
        };
        assert!(matches!(finished, Ok(EncodeOutcome::Cancelled)));
    }

    #[tokio::test]
    async fn panicking_attempt_still_reports_finished() {
        let (tx, mut rx) = mpsc::channel(16);
        let worker = EncodeWorker::new(Arc::new(Broken), tx, None);
        let job = job();
        let id = job.id.clone();
        worker.spawn(job, CancellationToken::new()).await.unwrap();

        match rx.recv().await.unwrap() {
            WorkerReport::Finished { job_id, result } => {
                assert_eq!(job_id, id);
                assert!(matches!(result, Err(EncoderError::Aborted(_))));
            }
            other => panic!("unexpected report: {other:?}"),
        }
    }
}
