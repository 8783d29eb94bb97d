//! Pipeline error taxonomy.
//! Field-level translation failures live in `translate::TranslateError` and
//! never surface here; these are the invocation-level failures.

/// Failures that abort a `start`, `stop` or batch invocation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Missing or malformed catalog, no target languages, no credentials.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The final promote-and-verify step failed. Staged data is kept.
    #[error("commit failed: {0}")]
    Commit(String),

    /// Staged catalog or checkpoint could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl PipelineError {
    /// True for errors the operator has to fix in settings or input files.
    pub fn is_configuration(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
