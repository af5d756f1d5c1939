//! Persistence of settings, the queue snapshot and the audit log.
//!
//! Files are replaced atomically (write to a sibling temp file, then rename)
//! and writes are serialized. Save failures are logged and swallowed so a
//! full disk never stops the queue.

use std::path::Path;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::config::{loader, AppPaths, Settings};
use crate::error::StoreError;
use crate::history::HistoryLog;
use crate::queue::job::{Job, JobStatus};
use crate::queue::snapshot::QueueEntry;

/// Owns the on-disk state of the application.
#[derive(Debug)]
pub struct StateStore {
    paths: AppPaths,
    history: HistoryLog,
    write_lock: Mutex<()>,
}

impl StateStore {
    /// Creates a store rooted at `paths`.
    pub fn new(paths: AppPaths) -> Self {
        Self {
            history: HistoryLog::new(&paths.history),
            paths,
            write_lock: Mutex::new(()),
        }
    }

    /// File locations.
    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    /// Audit log stored alongside the state files.
    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Loads settings; missing or corrupt files yield defaults.
    pub fn load_settings(&self) -> Settings {
        loader::load_or_default(&self.paths.settings)
    }

    /// Writes settings. Failures are logged.
    pub fn save_settings(&self, settings: &Settings) {
        let result = serde_json::to_vec_pretty(settings)
            .map_err(StoreError::from)
            .and_then(|bytes| self.write_atomic(&self.paths.settings, &bytes));
        if let Err(e) = result {
            warn!(error = %e, "Failed to save settings");
            self.history.system(&format!("Failed to save settings: {e}"));
        }
    }

    /// Loads the queue snapshot; a missing or corrupt file yields an empty list.
    pub fn load_queue(&self) -> Vec<QueueEntry> {
        let content = match std::fs::read_to_string(&self.paths.queue) {
            Ok(content) => content,
            Err(e) => {
                debug!(error = %e, "No queue snapshot");
                return Vec::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, path = ?self.paths.queue, "Queue snapshot unreadable, starting empty");
                Vec::new()
            }
        }
    }

    /// Writes every job still waiting to run. Converting and finished jobs
    /// are left out. Failures are logged.
    pub fn save_queue(&self, jobs: &[Job]) {
        let entries: Vec<QueueEntry> = jobs
            .iter()
            .filter(|job| job.status == JobStatus::Queued)
            .map(QueueEntry::from_job)
            .collect();

        let result = serde_json::to_vec_pretty(&entries)
            .map_err(StoreError::from)
            .and_then(|bytes| self.write_atomic(&self.paths.queue, &bytes));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist queue");
            self.history.system(&format!("Failed to persist queue: {e}"));
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(&self.paths.data_dir).map_err(io_err)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{OutputFormat, QualityTier};
    use crate::queue::job::JobOptions;
    use std::path::PathBuf;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(AppPaths::new(dir.path().join("data")));
        (dir, store)
    }

    #[test]
    fn settings_survive_a_save() {
        let (_dir, store) = store();
        let settings = Settings {
            max_concurrency: 5,
            auto_resume: true,
            ..Settings::default()
        };
        store.save_settings(&settings);
        assert_eq!(store.load_settings(), settings);
        assert!(!store.paths().data_dir.join("settings.json.tmp").exists());
    }

    #[test]
    fn only_waiting_jobs_are_snapshotted() {
        let (_dir, store) = store();
        let mut opts = JobOptions::from_settings(&Settings::default());
        opts.output_format = OutputFormat::Mkv;
        opts.quality = QualityTier::Custom;

        let queued = Job::new(PathBuf::from("/in/a.mov"), opts.clone(), PathBuf::from("/out/a.mkv"));
        let mut done = Job::new(PathBuf::from("/in/b.mov"), opts.clone(), PathBuf::from("/out/b.mkv"));
        done.begin(PathBuf::from("/out/b.mkv")).unwrap();
        done.complete().unwrap();
        let mut running = Job::new(PathBuf::from("/in/c.mov"), opts, PathBuf::from("/out/c.mkv"));
        running.begin(PathBuf::from("/out/c.mkv")).unwrap();

        store.save_queue(&[queued, done, running]);
        let entries = store.load_queue();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].input_path, PathBuf::from("/in/a.mov"));
        assert_eq!(entries[0].output_format, Some(OutputFormat::Mkv));
        assert_eq!(entries[0].quality, Some(QualityTier::Custom));
    }

    #[test]
    fn corrupt_snapshot_loads_empty() {
        let (_dir, store) = store();
        std::fs::create_dir_all(&store.paths().data_dir).unwrap();
        std::fs::write(&store.paths().queue, "[{").unwrap();
        assert!(store.load_queue().is_empty());
    }
}
