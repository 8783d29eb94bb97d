//! Progress snapshot returned to the driver after every invocation, and the
//! per-batch counters behind the batch log line.

use std::time::Duration;

use serde::Serialize;

use crate::checkpoint::{Checkpoint, CurrentProduct, JobStatus, LogEntry};

/// Per-invocation counters. Not persisted; only summarized into the log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub scanned: usize,
    pub skipped: usize,
    pub processed: usize,
    pub fields_translated: usize,
    pub cache_hits: usize,
    pub api_calls: usize,
    pub errors: usize,
}

impl BatchStats {
    /// `from`/`to` are 0-based, end-exclusive product indices.
    pub fn summary_line(&self, language: &str, from: usize, to: usize, elapsed: Duration) -> String {
        format!(
            "Products {}-{} ({language}): {} processed, {} skipped, {} fields, {} cache hits, {} API calls, {} errors in {:.1}s",
            from + 1,
            to,
            self.processed,
            self.skipped,
            self.fields_translated,
            self.cache_hits,
            self.api_calls,
            self.errors,
            elapsed.as_secs_f64()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitProgress {
    pub completed: usize,
    pub total: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguagesProgress {
    pub completed: usize,
    pub total: usize,
}

/// Present only once the job is completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionStats {
    pub total_products: usize,
    pub total_languages: usize,
    pub api_calls: u64,
    /// Seconds between `start` and the commit.
    pub execution_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    pub completed_units: usize,
    pub total_units: usize,
    pub percent: f64,
    pub current_language: Option<String>,
    pub current_language_progress: UnitProgress,
    pub languages_progress: LanguagesProgress,
    pub api_calls: u64,
    pub current_product: Option<CurrentProduct>,
    /// Entries appended since the previous snapshot.
    pub log: Vec<LogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<CompletionStats>,
}

impl ProgressSnapshot {
    /// No checkpoint exists.
    pub fn idle() -> Self {
        Self {
            status: JobStatus::Idle,
            completed_units: 0,
            total_units: 0,
            percent: 0.0,
            current_language: None,
            current_language_progress: UnitProgress {
                completed: 0,
                total: 0,
                percent: 0.0,
            },
            languages_progress: LanguagesProgress {
                completed: 0,
                total: 0,
            },
            api_calls: 0,
            current_product: None,
            log: Vec::new(),
            error: None,
            stats: None,
        }
    }

    /// Each language weighs the same: a language is `total_products` units.
    pub fn from_checkpoint(cp: &Checkpoint, log: Vec<LogEntry>) -> Self {
        let total = cp.total_products;
        let languages = cp.languages.len();
        let languages_done = cp.current_language_index.min(languages);
        let in_language = if cp.all_languages_done() {
            0
        } else {
            cp.current_product_index.min(total)
        };

        let completed_units = languages_done * total + in_language;
        let total_units = total * languages;
        let overall = if cp.status == JobStatus::Completed {
            100.0
        } else {
            percent(completed_units, total_units)
        };

        let current_language_progress = if cp.all_languages_done() {
            UnitProgress {
                completed: total,
                total,
                percent: 100.0,
            }
        } else {
            UnitProgress {
                completed: in_language,
                total,
                percent: percent(in_language, total),
            }
        };

        let stats = (cp.status == JobStatus::Completed).then(|| CompletionStats {
            total_products: total,
            total_languages: languages,
            api_calls: cp.api_calls,
            execution_time: cp
                .completed_at
                .map(|end| (end - cp.started_at).num_milliseconds().max(0) as f64 / 1000.0)
                .unwrap_or(0.0),
        });

        Self {
            status: cp.status,
            completed_units,
            total_units,
            percent: overall,
            current_language: cp.current_language().map(str::to_string),
            current_language_progress,
            languages_progress: LanguagesProgress {
                completed: languages_done,
                total: languages,
            },
            api_calls: cp.api_calls,
            current_product: cp.current_product.clone(),
            log,
            error: cp.error.clone(),
            stats,
        }
    }
}

/// Percentage rounded to one decimal.
fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 * 1000.0 / total as f64).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(total: usize, languages: &[&str]) -> Checkpoint {
        Checkpoint::new(
            "ru".into(),
            languages.iter().map(|l| l.to_string()).collect(),
            total,
            false,
            10,
        )
    }

    #[test]
    fn languages_weigh_equally() {
        let mut cp = checkpoint(4, &["en", "de"]);
        cp.current_language_index = 1;
        cp.current_product_index = 2;
        let snap = ProgressSnapshot::from_checkpoint(&cp, Vec::new());
        assert_eq!(snap.completed_units, 6);
        assert_eq!(snap.total_units, 8);
        assert_eq!(snap.percent, 75.0);
        assert_eq!(snap.current_language.as_deref(), Some("de"));
        assert_eq!(snap.current_language_progress.percent, 50.0);
        assert_eq!(snap.languages_progress.completed, 1);
        assert!(snap.stats.is_none());
    }

    #[test]
    fn completed_reports_stats() {
        let mut cp = checkpoint(3, &["en"]);
        cp.current_language_index = 1;
        cp.status = JobStatus::Completed;
        cp.api_calls = 9;
        cp.completed_at = Some(cp.started_at + chrono::Duration::milliseconds(2500));
        let snap = ProgressSnapshot::from_checkpoint(&cp, Vec::new());
        assert_eq!(snap.percent, 100.0);
        let stats = snap.stats.unwrap();
        assert_eq!(stats.api_calls, 9);
        assert_eq!(stats.execution_time, 2.5);
        assert_eq!(snap.current_language, None);
    }

    #[test]
    fn empty_job_does_not_divide_by_zero() {
        let cp = checkpoint(0, &[]);
        let snap = ProgressSnapshot::from_checkpoint(&cp, Vec::new());
        assert_eq!(snap.percent, 0.0);
        assert_eq!(snap.total_units, 0);
    }

    #[test]
    fn percent_rounds_to_one_decimal() {
        assert_eq!(percent(1, 3), 33.3);
        assert_eq!(percent(2, 3), 66.7);
    }

    #[test]
    fn summary_line_is_one_based() {
        let stats = BatchStats {
            processed: 2,
            fields_translated: 5,
            ..BatchStats::default()
        };
        let line = stats.summary_line("en", 0, 10, Duration::from_millis(1500));
        assert!(line.starts_with("Products 1-10 (en): 2 processed"));
        assert!(line.ends_with("in 1.5s"));
    }
}
