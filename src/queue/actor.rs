//! The queue controller task: sole owner and mutator of queue state.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, info, warn};

use super::events::{DrainSummary, QueueEvent, QueueStats};
use super::job::{Job, JobId, JobRequest, JobStatus};
use super::output::resolve_output_path;
use super::retry::{FailureAction, RetryPolicy};
use super::snapshot::QueueEntry;
use crate::config::model::clamp_concurrency;
use crate::config::Settings;
use crate::encoder::worker::{EncodeWorker, WorkerReport};
use crate::encoder::{EncodeOutcome, Transcoder};
use crate::error::{EncoderError, QueueError};
use crate::store::StateStore;

/// Requests sent by [`super::QueueManager`] handles.
pub(crate) enum Command {
    Enqueue {
        requests: Vec<JobRequest>,
        reply: oneshot::Sender<Vec<Result<JobId, QueueError>>>,
    },
    Start {
        reply: oneshot::Sender<bool>,
    },
    Validate {
        reply: oneshot::Sender<bool>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    Cancel {
        job_id: JobId,
        reply: oneshot::Sender<Result<bool, QueueError>>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    Remove {
        job_ids: Vec<JobId>,
        reply: oneshot::Sender<usize>,
    },
    ClearQueued {
        reply: oneshot::Sender<usize>,
    },
    SetMaxConcurrency {
        limit: i64,
        reply: oneshot::Sender<usize>,
    },
    UpdateSettings {
        settings: Box<Settings>,
        reply: oneshot::Sender<()>,
    },
    GetSettings {
        reply: oneshot::Sender<Settings>,
    },
    Jobs {
        reply: oneshot::Sender<Vec<Job>>,
    },
    Stats {
        reply: oneshot::Sender<QueueStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Controller state. Runs on its own task; everything else talks to it by message.
pub(crate) struct QueueActor<E> {
    jobs: Vec<Job>,
    settings: Settings,
    /// Operator has started processing and not paused it.
    processing: bool,
    /// Workers launched and not yet reported finished.
    active: usize,
    /// Drained notification already sent for the current run.
    drain_announced: bool,
    /// Auto-shutdown already fired this session.
    shutdown_requested: bool,
    policy: RetryPolicy,
    retries: DelayQueue<JobId>,
    retry_keys: HashMap<JobId, delay_queue::Key>,
    hardware_encoder: Option<String>,
    worker: EncodeWorker<E>,
    store: Arc<StateStore>,
    events: broadcast::Sender<QueueEvent>,
    commands: mpsc::Receiver<Command>,
    reports: mpsc::Receiver<WorkerReport>,
}

impl<E: Transcoder> QueueActor<E> {
    pub(crate) fn new(
        settings: Settings,
        encoder: Arc<E>,
        hardware_encoder: Option<String>,
        store: Arc<StateStore>,
        events: broadcast::Sender<QueueEvent>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let settings = settings.normalized();
        let (report_tx, reports) = mpsc::channel(256);
        let worker = EncodeWorker::new(encoder, report_tx, timeout_of(&settings));

        Self {
            jobs: Vec::new(),
            policy: RetryPolicy::with_max_retries(settings.max_retries),
            settings,
            processing: false,
            active: 0,
            drain_announced: false,
            shutdown_requested: false,
            retries: DelayQueue::new(),
            retry_keys: HashMap::new(),
            hardware_encoder,
            worker,
            store,
            events,
            commands,
            reports,
        }
    }

    /// Overrides the retry backoff. Used before [`Self::run`].
    pub(crate) fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    /// Processes commands, worker reports and retry timers until shutdown.
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(report) = self.reports.recv() => self.on_report(report),
                Some(expired) = std::future::poll_fn(|cx| self.retries.poll_expired(cx)) => {
                    self.on_retry_due(expired.into_inner());
                }
            }
        }
        debug!("Queue controller stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue { requests, reply } => {
                let results = self.enqueue(requests);
                let _ = reply.send(results);
            }
            Command::Start { reply } => {
                let started = self.start();
                let _ = reply.send(started);
            }
            Command::Validate { reply } => {
                let ready = self.validate();
                let _ = reply.send(ready);
            }
            Command::Pause { reply } => {
                self.pause();
                let _ = reply.send(());
            }
            Command::Cancel { job_id, reply } => {
                let cancelled = self.cancel(&job_id);
                let _ = reply.send(cancelled);
            }
            Command::CancelAll { reply } => {
                let ids: Vec<JobId> = self
                    .jobs
                    .iter()
                    .filter(|j| j.status == JobStatus::Converting)
                    .map(|j| j.id.clone())
                    .collect();
                let count = ids
                    .iter()
                    .filter(|id| matches!(self.cancel(id), Ok(true)))
                    .count();
                let _ = reply.send(count);
            }
            Command::Remove { job_ids, reply } => {
                let removed = self.remove(&job_ids);
                let _ = reply.send(removed);
            }
            Command::ClearQueued { reply } => {
                let cleared = self.clear_queued();
                let _ = reply.send(cleared);
            }
            Command::SetMaxConcurrency { limit, reply } => {
                let applied = self.set_max_concurrency(limit);
                let _ = reply.send(applied);
            }
            Command::UpdateSettings { settings, reply } => {
                self.update_settings(*settings);
                let _ = reply.send(());
            }
            Command::GetSettings { reply } => {
                let _ = reply.send(self.settings.clone());
            }
            Command::Jobs { reply } => {
                let _ = reply.send(self.jobs.clone());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    /// Admits jobs in order, persisting once for the batch.
    fn enqueue(&mut self, requests: Vec<JobRequest>) -> Vec<Result<JobId, QueueError>> {
        let results: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let result = self.admit(request);
                if let Err(e) = &result {
                    warn!(error = %e, "Job rejected");
                }
                result
            })
            .collect();

        if results.iter().any(Result::is_ok) {
            self.drain_announced = false;
            self.persist();
            self.try_launch();
        }
        results
    }

    fn admit(&mut self, request: JobRequest) -> Result<JobId, QueueError> {
        let JobRequest {
            input_path,
            options,
        } = request;

        if !input_path.is_file() {
            return Err(QueueError::SourceMissing { path: input_path });
        }
        if self
            .jobs
            .iter()
            .any(|j| j.is_active() && j.matches_input(&input_path))
        {
            return Err(QueueError::Duplicate { path: input_path });
        }

        let options = options.normalized(self.hardware_encoder.as_deref());
        let output_path = resolve_output_path(
            &input_path,
            &options.output_dir,
            options.output_format,
            &self.reserved_outputs(),
        )?;
        let job = Job::new(input_path, options, output_path);

        info!(job_id = %job.id, input = ?job.input_path, "Job queued");
        self.store.history().job(
            &job.file_name,
            &format!("Queued for {}", job.options.describe_target()),
        );

        let id = job.id.clone();
        self.emit(QueueEvent::JobChanged(job.clone()));
        self.jobs.push(job);
        Ok(id)
    }

    /// Launches queued jobs in insertion order while slots are free.
    fn try_launch(&mut self) {
        if !self.processing {
            return;
        }
        while self.active < self.settings.max_concurrency {
            let Some(index) = self.jobs.iter().position(Job::is_launchable) else {
                break;
            };
            self.launch(index);
        }
        self.check_drained();
    }

    /// Output files currently being written by running conversions.
    fn reserved_outputs(&self) -> HashSet<PathBuf> {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Converting)
            .map(|j| j.output_path.clone())
            .collect()
    }

    fn launch(&mut self, index: usize) {
        let reserved = self.reserved_outputs();
        let job = &mut self.jobs[index];

        let prepared = if job.input_path.is_file() {
            resolve_output_path(
                &job.input_path,
                &job.options.output_dir,
                job.options.output_format,
                &reserved,
            )
            .map_err(|e| e.to_string())
        } else {
            Err("Source file missing".to_string())
        };

        let output_path = match prepared {
            Ok(path) => path,
            Err(message) => {
                warn!(job_id = %job.id, error = %message, "Job failed before launch");
                self.store
                    .history()
                    .job(&job.file_name, &format!("Unable to start: {message}"));
                if let Err(e) = job.fail_validation(message) {
                    warn!(error = %e, "Unexpected job state");
                }
                let snapshot = job.clone();
                self.emit(QueueEvent::JobChanged(snapshot));
                self.persist();
                return;
            }
        };

        let token = match job.begin(output_path) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Unexpected job state");
                return;
            }
        };
        self.active += 1;

        let engine = match &job.options.hardware_encoder {
            Some(encoder) if job.options.use_hardware => format!("with {encoder}"),
            _ => "(CPU)".to_string(),
        };
        info!(job_id = %job.id, active = self.active, "Conversion started");
        self.store.history().job(
            &job.file_name,
            &format!("Starting conversion to {} {engine}", job.options.output_format),
        );

        let snapshot = job.clone();
        self.worker.spawn(snapshot.clone(), token);
        self.emit(QueueEvent::JobChanged(snapshot));
        self.persist();
    }

    fn on_report(&mut self, report: WorkerReport) {
        match report {
            WorkerReport::Progress { job_id, state } => {
                if let Some(job) = self.jobs.iter_mut().find(|j| j.id == job_id) {
                    if job.apply_progress(&state) {
                        let snapshot = job.clone();
                        self.emit(QueueEvent::JobChanged(snapshot));
                    }
                }
            }
            WorkerReport::Finished { job_id, result } => self.on_finished(&job_id, result),
        }
    }

    fn on_finished(&mut self, job_id: &str, result: Result<EncodeOutcome, EncoderError>) {
        self.active = self.active.saturating_sub(1);

        let Some(index) = self.jobs.iter().position(|j| j.id == job_id) else {
            debug!(job_id, "Finished job no longer tracked");
            self.try_launch();
            return;
        };

        let policy = self.policy;
        let job = &mut self.jobs[index];
        let history = self.store.history();
        let mut retry_after = None;

        match (job.status, result) {
            (JobStatus::Converting, Ok(EncodeOutcome::Finished)) => {
                if let Err(e) = job.complete() {
                    warn!(error = %e, "Unexpected job state");
                }
                info!(job_id, output = ?job.output_path, "Conversion completed");
                history.job(
                    &job.file_name,
                    &format!("Completed → {}", job.output_path.display()),
                );
            }
            (JobStatus::Converting, Ok(EncodeOutcome::Cancelled)) => {
                if let Err(e) = job.mark_cancelled() {
                    warn!(error = %e, "Unexpected job state");
                }
                history.job(&job.file_name, "Conversion cancelled mid-run.");
            }
            (JobStatus::Converting, Err(error)) => {
                let message = error.to_string();
                warn!(job_id, error = %message, "Conversion failed");
                history.job(&job.file_name, &format!("Conversion failed: {message}"));

                match policy.on_failure(job.retry_count) {
                    FailureAction::Retry { attempt, delay } => {
                        match job.schedule_retry(message, policy.max_retries) {
                            Ok(_) => {
                                history.job(
                                    &job.file_name,
                                    &format!(
                                        "Retrying in {} second(s) (attempt {} of {}).",
                                        delay.as_secs(),
                                        attempt + 1,
                                        policy.max_retries + 1
                                    ),
                                );
                                retry_after = Some(delay);
                            }
                            Err(e) => warn!(error = %e, "Unexpected job state"),
                        }
                    }
                    FailureAction::GiveUp { attempts } => {
                        if let Err(e) = job.fail(message) {
                            warn!(error = %e, "Unexpected job state");
                        }
                        history.job(
                            &job.file_name,
                            &format!("Retries exhausted after {attempts} attempts."),
                        );
                    }
                }
            }
            (status, result) => {
                // Operator cancelled while the engine was winding down.
                debug!(job_id, %status, ?result, "Late outcome ignored");
            }
        }

        let snapshot = job.clone();
        if let Some(delay) = retry_after {
            self.schedule_retry(snapshot.id.clone(), delay);
        }
        self.emit(QueueEvent::JobChanged(snapshot));
        self.persist();
        self.try_launch();
    }

    fn schedule_retry(&mut self, job_id: JobId, delay: Duration) {
        let key = self.retries.insert(job_id.clone(), delay);
        if let Some(previous) = self.retry_keys.insert(job_id, key) {
            self.retries.try_remove(&previous);
        }
    }

    fn on_retry_due(&mut self, job_id: JobId) {
        self.retry_keys.remove(&job_id);
        let Some(job) = self.jobs.iter_mut().find(|j| j.id == job_id) else {
            return;
        };
        if job.status != JobStatus::Queued || !job.retry_pending {
            return;
        }
        job.retry_pending = false;
        debug!(job_id = %job.id, "Retry delay elapsed");
        let snapshot = job.clone();
        self.emit(QueueEvent::JobChanged(snapshot));
        self.try_launch();
    }

    fn forget_retry(&mut self, job_id: &str) {
        if let Some(key) = self.retry_keys.remove(job_id) {
            self.retries.try_remove(&key);
        }
    }

    /// Fails queued jobs whose source disappeared. True if anything is left to run.
    fn validate(&mut self) -> bool {
        let mut changed = Vec::new();
        for job in self.jobs.iter_mut() {
            if job.status == JobStatus::Queued
                && !job.input_path.is_file()
                && job.fail_validation("Source file missing").is_ok()
            {
                self.store
                    .history()
                    .job(&job.file_name, "Validation failed: source file missing.");
                changed.push(job.clone());
            }
        }

        if !changed.is_empty() {
            for job in changed {
                self.forget_retry(&job.id);
                self.emit(QueueEvent::JobChanged(job));
            }
            self.persist();
        }

        self.jobs.iter().any(|j| j.status == JobStatus::Queued)
    }

    fn start(&mut self) -> bool {
        if !self.validate() {
            self.store.history().system("Nothing queued to start.");
            return false;
        }

        self.processing = true;
        self.drain_announced = false;
        self.settings.auto_resume = true;
        self.store.save_settings(&self.settings);

        let queued = self
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Queued)
            .count();
        info!(queued, "Queue processing started");
        self.store
            .history()
            .system(&format!("Queue processing started for {queued} job(s)."));
        self.try_launch();
        true
    }

    fn pause(&mut self) {
        if self.processing {
            self.processing = false;
            self.store.history().system("Queue processing paused.");
        }
    }

    /// Stops a converting job. `Ok(false)` when the job is not converting.
    fn cancel(&mut self, job_id: &str) -> Result<bool, QueueError> {
        let Some(job) = self.jobs.iter_mut().find(|j| j.id == job_id) else {
            return Err(QueueError::UnknownJob {
                job_id: job_id.to_string(),
            });
        };
        if job.status != JobStatus::Converting {
            return Ok(false);
        }

        if let Some(token) = job.cancel.take() {
            token.cancel();
        }
        job.mark_cancelled()?;
        info!(job_id, "Conversion cancelled");
        self.store
            .history()
            .job(&job.file_name, "Conversion cancelled by operator.");

        let snapshot = job.clone();
        self.emit(QueueEvent::JobChanged(snapshot));
        self.persist();
        Ok(true)
    }

    fn remove(&mut self, job_ids: &[JobId]) -> usize {
        self.remove_where(|job| {
            job.status != JobStatus::Converting && job_ids.iter().any(|id| *id == job.id)
        })
        .inspect(|&count| {
            self.store
                .history()
                .system(&format!("Removed {count} job(s) from queue."));
        })
        .unwrap_or(0)
    }

    fn clear_queued(&mut self) -> usize {
        self.remove_where(|job| job.status == JobStatus::Queued)
            .inspect(|&count| {
                self.store
                    .history()
                    .system(&format!("Cleared {count} queued job(s) at operator request."));
            })
            .unwrap_or(0)
    }

    /// Drops matching jobs. Returns `None` when nothing matched.
    fn remove_where(&mut self, predicate: impl Fn(&Job) -> bool) -> Option<usize> {
        let (removed, kept): (Vec<Job>, Vec<Job>) =
            std::mem::take(&mut self.jobs).into_iter().partition(|j| predicate(j));
        self.jobs = kept;

        if removed.is_empty() {
            return None;
        }
        for job in &removed {
            self.forget_retry(&job.id);
            self.emit(QueueEvent::JobRemoved(job.id.clone()));
        }
        self.persist();
        self.check_drained();
        Some(removed.len())
    }

    fn set_max_concurrency(&mut self, limit: i64) -> usize {
        let applied = clamp_concurrency(limit);
        if applied != self.settings.max_concurrency {
            self.settings.max_concurrency = applied;
            self.store.save_settings(&self.settings);
            self.store
                .history()
                .system(&format!("Parallel conversions set to {applied}."));
            self.try_launch();
        }
        applied
    }

    fn update_settings(&mut self, settings: Settings) {
        let auto_resume = self.settings.auto_resume;
        self.settings = Settings {
            auto_resume,
            ..settings.normalized()
        };
        self.policy.max_retries = self.settings.max_retries;
        self.worker.set_timeout(timeout_of(&self.settings));
        self.store.save_settings(&self.settings);

        let max_retries = self.policy.max_retries;
        let mut clamped = Vec::new();
        for job in &mut self.jobs {
            if job.status == JobStatus::Queued && job.retry_count > max_retries {
                job.retry_count = max_retries;
                clamped.push(job.clone());
            }
        }
        if !clamped.is_empty() {
            debug!(count = clamped.len(), max_retries, "Clamped retry counts");
            for job in clamped {
                self.emit(QueueEvent::JobChanged(job));
            }
            self.persist();
        }
        self.try_launch();
    }

    /// Rebuilds jobs from a snapshot, skipping entries that can no longer run.
    pub(crate) fn restore(&mut self, entries: Vec<QueueEntry>) {
        let mut restored = 0usize;

        for entry in entries {
            if !entry.input_path.is_file() {
                self.store.history().system(&format!(
                    "Skipped missing source during restore: {}",
                    entry.input_path.display()
                ));
                continue;
            }
            if self
                .jobs
                .iter()
                .any(|j| j.is_active() && j.matches_input(&entry.input_path))
            {
                continue;
            }

            let options = entry
                .to_options(&self.settings)
                .normalized(self.hardware_encoder.as_deref());
            let output_path = match resolve_output_path(
                &entry.input_path,
                &options.output_dir,
                options.output_format,
                &self.reserved_outputs(),
            ) {
                Ok(path) => path,
                Err(e) => {
                    self.store.history().system(&format!(
                        "Unable to prepare output during restore for {}: {e}",
                        entry.input_path.display()
                    ));
                    continue;
                }
            };

            let mut job = Job::new(entry.input_path.clone(), options, output_path);
            job.retry_count = entry.retry_count().min(self.policy.max_retries);
            self.jobs.push(job);
            restored += 1;
        }

        if restored == 0 {
            return;
        }

        info!(restored, "Queue restored from snapshot");
        self.store.history().system(&format!(
            "Restored {restored} queued job(s) from previous session."
        ));
        self.persist();

        if self.settings.auto_resume {
            self.store.history().system(&format!(
                "Auto-resuming {restored} queued job(s) from last session."
            ));
            self.processing = true;
            self.try_launch();
        }
    }

    /// Announces a drained queue once per run and evaluates auto-shutdown.
    fn check_drained(&mut self) {
        if !self.processing
            || self.drain_announced
            || self.active > 0
            || self.jobs.is_empty()
            || self.jobs.iter().any(Job::is_active)
        {
            return;
        }
        self.drain_announced = true;

        let count = |status: JobStatus| self.jobs.iter().filter(|j| j.status == status).count();
        let mut summary = DrainSummary {
            completed: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
            cancelled: count(JobStatus::Cancelled),
            shutdown_requested: false,
        };

        if self.settings.auto_shutdown && summary.completed > 0 && !self.shutdown_requested {
            self.shutdown_requested = true;
            summary.shutdown_requested = true;
            self.store
                .history()
                .system("Queue drained, system shutdown requested.");
        }

        info!(?summary, "Queue drained");
        self.emit(QueueEvent::Drained(summary));
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            active_workers: self.active,
            max_concurrency: self.settings.max_concurrency,
            processing: self.processing,
            ..QueueStats::default()
        };
        for job in &self.jobs {
            match job.status {
                JobStatus::Queued if job.retry_pending => stats.retry_pending += 1,
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Converting => stats.converting += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Saves settings with the resume preference and a final snapshot.
    fn shutdown(&mut self) {
        self.settings.auto_resume = self.processing;
        self.store.save_settings(&self.settings);
        self.processing = false;
        self.store.save_queue(&self.jobs);
        self.store.history().system("Application shutting down.");
    }

    fn persist(&self) {
        self.store.save_queue(&self.jobs);
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn timeout_of(settings: &Settings) -> Option<Duration> {
    settings.conversion_timeout_secs.map(Duration::from_secs)
}
