//! Append-only audit log of queue activity.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Local, SecondsFormat};
use tracing::{debug, info};

/// Subject written for entries not tied to a job.
const SYSTEM_SUBJECT: &str = "SYSTEM";

/// Writes `timestamp | subject | message` lines to the history file.
///
/// Write failures never reach callers.
#[derive(Debug)]
pub struct HistoryLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryLog {
    /// Creates a log that appends to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Location of the history file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records a message about a job, identified by its file name.
    pub fn job(&self, file_name: &str, message: &str) {
        self.record(Some(file_name), message);
    }

    /// Records a message not tied to a job.
    pub fn system(&self, message: &str) {
        self.record(None, message);
    }

    /// Appends one entry and mirrors it to tracing.
    pub fn record(&self, subject: Option<&str>, message: &str) {
        let subject = subject.unwrap_or(SYSTEM_SUBJECT);
        info!(target: "history", subject, "{message}");

        let line = format!(
            "{} | {} | {}\n",
            Local::now().to_rfc3339_opts(SecondsFormat::Millis, false),
            subject,
            message
        );

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = self.append(&line) {
            debug!(error = %e, path = ?self.path, "History append failed");
        }
    }

    /// Returns up to the last `count` entries, oldest first.
    pub fn tail(&self, count: usize) -> Vec<String> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(count);
        lines[start..].iter().map(|l| l.to_string()).collect()
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_appended_with_subject() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::new(dir.path().join("logs").join("history.log"));

        log.system("Queue processing started for 2 job(s).");
        log.job("clip.mov", "Completed");

        let lines = log.tail(10);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" | SYSTEM | Queue processing started for 2 job(s)."));
        assert!(lines[1].ends_with(" | clip.mov | Completed"));
        assert_eq!(log.tail(1), vec![lines[1].clone()]);
    }

    #[test]
    fn unwritable_location_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let log = HistoryLog::new(blocker.join("history.log"));
        log.system("still fine");
        assert!(log.tail(5).is_empty());
    }
}
