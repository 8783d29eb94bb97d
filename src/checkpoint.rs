//! Job state machine and the durable checkpoint record.
//! Idle → Running → Completed | Stopped | Error; Stopped, Error and Completed
//! go back to Running only through `start`.
//! The checkpoint is stored as one JSON row per job key in SQLite.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

/// All states a translation job can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Running,
    Stopped,
    Completed,
    Error,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Idle => write!(f, "idle"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Stopped => write!(f, "stopped"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

impl JobStatus {
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Idle, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Running) // restart while running
                | (JobStatus::Running, JobStatus::Stopped)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Error)
                | (JobStatus::Stopped, JobStatus::Running)
                | (JobStatus::Error, JobStatus::Running)
                | (JobStatus::Completed, JobStatus::Running)
        )
    }

    /// States in which a poll must not do any translation work.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Stopped | JobStatus::Completed | JobStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: Severity,
}

/// Bounded activity log; keeps the most recent `capacity` entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityLog {
    entries: VecDeque<LogEntry>,
    next_seq: u64,
    /// Highest sequence already handed out in a progress snapshot.
    reported_seq: u64,
}

impl ActivityLog {
    pub fn push(&mut self, capacity: usize, level: Severity, message: impl Into<String>) {
        self.next_seq += 1;
        self.entries.push_back(LogEntry {
            seq: self.next_seq,
            timestamp: Utc::now(),
            message: message.into(),
            level,
        });
        while self.entries.len() > capacity.max(1) {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_unreported(&self) -> bool {
        self.next_seq > self.reported_seq
    }

    /// Entries not yet delivered; marks them delivered.
    pub fn take_unreported(&mut self) -> Vec<LogEntry> {
        let since = self.reported_seq;
        self.reported_seq = self.next_seq;
        self.entries
            .iter()
            .filter(|e| e.seq > since)
            .cloned()
            .collect()
    }
}

/// Last product touched, for display only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentProduct {
    pub code: String,
    pub name: String,
    pub language: String,
}

/// The entire resumable state of one translation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: uuid::Uuid,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub source_language: String,
    pub total_products: usize,
    pub languages: Vec<String>,
    pub current_language_index: usize,
    pub current_product_index: usize,
    pub api_calls: u64,
    pub force_retranslate: bool,
    #[serde(default)]
    pub current_product: Option<CurrentProduct>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub log: ActivityLog,
    pub log_capacity: usize,
}

impl Checkpoint {
    pub fn new(
        source_language: String,
        languages: Vec<String>,
        total_products: usize,
        force_retranslate: bool,
        log_capacity: usize,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            status: JobStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            source_language,
            total_products,
            languages,
            current_language_index: 0,
            current_product_index: 0,
            api_calls: 0,
            force_retranslate,
            current_product: None,
            error: None,
            log: ActivityLog::default(),
            log_capacity,
        }
    }

    pub fn current_language(&self) -> Option<&str> {
        self.languages
            .get(self.current_language_index)
            .map(String::as_str)
    }

    pub fn all_languages_done(&self) -> bool {
        self.current_language_index >= self.languages.len()
    }

    pub fn log(&mut self, level: Severity, message: impl Into<String>) {
        let capacity = self.log_capacity;
        self.log.push(capacity, level, message);
    }

    /// Apply a status change, logging rejected transitions.
    pub fn transition(&mut self, next: JobStatus) -> std::result::Result<(), String> {
        if !self.status.can_transition_to(next) {
            let msg = format!("invalid transition: {} -> {}", self.status, next);
            tracing::warn!("{}", msg);
            return Err(msg);
        }
        info!(from = %self.status, to = %next, run_id = %self.run_id, "job_transition");
        self.status = next;
        Ok(())
    }

    /// Language finished: move the cursor, reset the product index.
    pub fn advance_language(&mut self) {
        self.current_language_index += 1;
        self.current_product_index = 0;
    }
}

/// SQLite-backed checkpoint storage, one row per job key.
pub struct CheckpointStore {
    conn: Mutex<Connection>,
}

impl CheckpointStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::init(conn)?;
        info!(path = %db_path.display(), "checkpoint store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pipeline_checkpoints (
                job_key TEXT PRIMARY KEY,
                state_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn load(&self, job_key: &str) -> Result<Option<Checkpoint>> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT state_json FROM pipeline_checkpoints WHERE job_key = ?1",
                params![job_key],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, job_key: &str, checkpoint: &Checkpoint) -> Result<()> {
        let json = serde_json::to_string(checkpoint)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO pipeline_checkpoints (job_key, state_json, updated_at)
             VALUES (?1, ?2, ?3)",
            params![job_key, json, Utc::now().timestamp()],
        )?;
        debug!(
            job_key,
            status = %checkpoint.status,
            language_index = checkpoint.current_language_index,
            product_index = checkpoint.current_product_index,
            "checkpoint saved"
        );
        Ok(())
    }

    pub fn delete(&self, job_key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM pipeline_checkpoints WHERE job_key = ?1",
            params![job_key],
        )?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint() -> Checkpoint {
        Checkpoint::new("ru".into(), vec!["en".into(), "de".into()], 3, false, 4)
    }

    #[test]
    fn terminal_states_only_leave_through_start() {
        for status in [JobStatus::Stopped, JobStatus::Completed, JobStatus::Error] {
            assert!(status.is_terminal());
            assert!(status.can_transition_to(JobStatus::Running));
            assert!(!status.can_transition_to(JobStatus::Stopped));
        }
        assert!(!JobStatus::Idle.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Stopped.can_transition_to(JobStatus::Error));
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn invalid_transition_keeps_status() {
        let mut cp = checkpoint();
        cp.transition(JobStatus::Stopped).unwrap();
        assert!(cp.transition(JobStatus::Completed).is_err());
        assert_eq!(cp.status, JobStatus::Stopped);
    }

    #[test]
    fn log_is_bounded_and_reports_once() {
        let mut cp = checkpoint();
        for i in 0..6 {
            cp.log(Severity::Info, format!("entry {i}"));
        }
        assert_eq!(cp.log.len(), 4);
        let first: Vec<u64> = cp.log.take_unreported().iter().map(|e| e.seq).collect();
        assert_eq!(first, vec![3, 4, 5, 6]);
        assert!(cp.log.take_unreported().is_empty());

        cp.log(Severity::Warning, "late");
        let late = cp.log.take_unreported();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].message, "late");
    }

    #[test]
    fn advance_language_resets_product_cursor() {
        let mut cp = checkpoint();
        cp.current_product_index = 3;
        cp.advance_language();
        assert_eq!(cp.current_language_index, 1);
        assert_eq!(cp.current_product_index, 0);
        assert_eq!(cp.current_language(), Some("de"));
        cp.advance_language();
        assert!(cp.all_languages_done());
        assert_eq!(cp.current_language(), None);
    }

    #[test]
    fn store_round_trips_by_job_key() {
        let store = CheckpointStore::open_in_memory().unwrap();
        assert!(store.load("job").unwrap().is_none());

        let mut cp = checkpoint();
        cp.api_calls = 7;
        cp.log(Severity::Success, "done");
        store.save("job", &cp).unwrap();

        assert_eq!(store.load("job").unwrap(), Some(cp));
        assert!(store.load("other").unwrap().is_none());
        assert!(store.delete("job").unwrap());
        assert!(store.load("job").unwrap().is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("pipeline.sqlite3");
        let cp = checkpoint();
        CheckpointStore::open(&path).unwrap().save("job", &cp).unwrap();

        let reopened = CheckpointStore::open(&path).unwrap();
        assert_eq!(reopened.load("job").unwrap().unwrap().run_id, cp.run_id);
    }
}
