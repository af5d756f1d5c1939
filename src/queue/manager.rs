//! Cloneable handle to the queue controller task.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::actor::{Command, QueueActor};
use super::events::{QueueEvent, QueueStats};
use super::job::{Job, JobId, JobRequest};
use super::retry::RetryPolicy;
use crate::config::Settings;
use crate::encoder::Transcoder;
use crate::error::QueueError;
use crate::store::StateStore;

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 1024;

/// Front door to the queue. All state lives in the controller task; this
/// handle only sends it requests and hands out event subscriptions.
#[derive(Clone)]
pub struct QueueManager {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<QueueEvent>,
}

/// Options for starting a controller.
pub struct QueueBuilder {
    store: Arc<StateStore>,
    settings: Option<Settings>,
    hardware_encoder: Option<String>,
    retry_policy: Option<RetryPolicy>,
    restore: bool,
}

impl QueueBuilder {
    /// Uses these settings instead of the stored ones.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Hardware encoder offered to jobs that request GPU encoding.
    pub fn hardware_encoder(mut self, encoder: Option<String>) -> Self {
        self.hardware_encoder = encoder;
        self
    }

    /// Overrides the retry budget and backoff derived from settings.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Whether to rebuild the queue from the stored snapshot (default true).
    pub fn restore(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    /// Spawns the controller task.
    pub fn spawn<E: Transcoder>(self, encoder: Arc<E>) -> (QueueManager, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

        let settings = self
            .settings
            .unwrap_or_else(|| self.store.load_settings());
        let entries = if self.restore {
            self.store.load_queue()
        } else {
            Vec::new()
        };

        let mut actor = QueueActor::new(
            settings,
            encoder,
            self.hardware_encoder,
            self.store,
            event_tx.clone(),
            command_rx,
        );
        if let Some(policy) = self.retry_policy {
            actor.set_retry_policy(policy);
        }

        let handle = tokio::spawn(async move {
            actor.restore(entries);
            actor.run().await;
        });

        (
            QueueManager {
                commands: command_tx,
                events: event_tx,
            },
            handle,
        )
    }
}

impl QueueManager {
    /// Starts configuring a controller backed by `store`.
    pub fn builder(store: Arc<StateStore>) -> QueueBuilder {
        QueueBuilder {
            store,
            settings: None,
            hardware_encoder: None,
            retry_policy: None,
            restore: true,
        }
    }

    /// Subscribes to job and queue notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Adds one file. Rejects missing sources, duplicates and unusable output directories.
    pub async fn enqueue(&self, request: JobRequest) -> Result<JobId, QueueError> {
        self.enqueue_many(vec![request])
            .await?
            .pop()
            .unwrap_or(Err(QueueError::ControllerClosed))
    }

    /// Adds several files; one result per request, in order.
    pub async fn enqueue_many(
        &self,
        requests: Vec<JobRequest>,
    ) -> Result<Vec<Result<JobId, QueueError>>, QueueError> {
        self.request(|reply| Command::Enqueue { requests, reply })
            .await
    }

    /// Validates and starts processing. False when nothing is left to run.
    pub async fn start(&self) -> Result<bool, QueueError> {
        self.request(|reply| Command::Start { reply }).await
    }

    /// Fails queued jobs whose source is gone. True if queued jobs remain.
    pub async fn validate(&self) -> Result<bool, QueueError> {
        self.request(|reply| Command::Validate { reply }).await
    }

    /// Stops launching new jobs; running ones continue.
    pub async fn pause(&self) -> Result<(), QueueError> {
        self.request(|reply| Command::Pause { reply }).await
    }

    /// Cancels a converting job. False if it was not converting.
    pub async fn cancel(&self, job_id: &str) -> Result<bool, QueueError> {
        let job_id = job_id.to_string();
        self.request(|reply| Command::Cancel { job_id, reply })
            .await?
    }

    /// Cancels every converting job.
    pub async fn cancel_all(&self) -> Result<usize, QueueError> {
        self.request(|reply| Command::CancelAll { reply }).await
    }

    /// Removes the given jobs unless they are converting.
    pub async fn remove(&self, job_ids: Vec<JobId>) -> Result<usize, QueueError> {
        self.request(|reply| Command::Remove { job_ids, reply })
            .await
    }

    /// Removes every queued job.
    pub async fn clear_queued(&self) -> Result<usize, QueueError> {
        self.request(|reply| Command::ClearQueued { reply }).await
    }

    /// Changes the parallel limit; returns the clamped value applied.
    pub async fn set_max_concurrency(&self, limit: i64) -> Result<usize, QueueError> {
        self.request(|reply| Command::SetMaxConcurrency { limit, reply })
            .await
    }

    /// Replaces settings for jobs added from now on.
    pub async fn update_settings(&self, settings: Settings) -> Result<(), QueueError> {
        let settings = Box::new(settings);
        self.request(|reply| Command::UpdateSettings { settings, reply })
            .await
    }

    /// Current settings.
    pub async fn settings(&self) -> Result<Settings, QueueError> {
        self.request(|reply| Command::GetSettings { reply }).await
    }

    /// All jobs in insertion order.
    pub async fn jobs(&self) -> Result<Vec<Job>, QueueError> {
        self.request(|reply| Command::Jobs { reply }).await
    }

    /// One job by id.
    pub async fn job(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        Ok(self.jobs().await?.into_iter().find(|j| j.id == job_id))
    }

    /// Current counts.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Saves settings and the snapshot, then stops the controller.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, QueueError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| QueueError::ControllerClosed)?;
        rx.await.map_err(|_| QueueError::ControllerClosed)
    }
}
