//! Notifications published by the queue controller.

use serde::Serialize;

use super::job::{Job, JobId};

/// Published on every observable state change.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A job was added or its status, progress or retry state changed.
    JobChanged(Job),
    /// A job left the queue.
    JobRemoved(JobId),
    /// Processing is active and nothing is queued or converting any more.
    Drained(DrainSummary),
}

/// Final tallies when the queue drains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Auto-shutdown is enabled and fires for the first time.
    pub shutdown_requested: bool,
}

/// Point-in-time counts for status displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub retry_pending: usize,
    pub converting: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Workers currently running, including ones winding down after a cancel.
    pub active_workers: usize,
    pub max_concurrency: usize,
    pub processing: bool,
}
