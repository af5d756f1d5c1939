//! Conversion queue: job model, controller and persistence records.

mod actor;
pub mod events;
pub mod job;
pub mod manager;
pub mod output;
pub mod retry;
pub mod snapshot;

pub use events::{DrainSummary, QueueEvent, QueueStats};
pub use job::{Job, JobId, JobOptions, JobRequest, JobStatus};
pub use manager::QueueManager;
pub use output::resolve_output_path;
pub use retry::{FailureAction, RetryPolicy};
pub use snapshot::QueueEntry;
