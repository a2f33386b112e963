//! Error types for the repograph core library.

use std::fmt;

/// Failures reported by the repository access collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepoAccessError {
    /// Private repository, missing or invalid credential.
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Network hiccups and similar conditions worth another attempt.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepoAccessError {
    /// Access failures that another attempt cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AccessDenied(_) | Self::NotFound(_))
    }
}

/// Failures reported by the inference collaborator. Both are non-fatal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InferenceError {
    #[error("inference service unavailable: {0}")]
    Unavailable(String),

    #[error("inference request timed out after {0} ms")]
    Timeout(u64),
}

/// Why a single file could not be turned into a syntax tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseCategory {
    Read,
    Decode,
    Grammar,
    Timeout,
    Panic,
    Syntax,
}

impl ParseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Decode => "decode",
            Self::Grammar => "grammar",
            Self::Timeout => "timeout",
            Self::Panic => "panic",
            Self::Syntax => "syntax",
        }
    }
}

impl fmt::Display for ParseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-file parse problem. Never propagates past the parser dispatcher.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{path}: {category} error: {message}")]
pub struct FileParseError {
    pub path: String,
    pub category: ParseCategory,
    pub message: String,
}

impl FileParseError {
    pub fn new(path: &str, category: ParseCategory, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            category,
            message: message.into(),
        }
    }
}

/// Top-level error enum for the repograph core library.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("repository access error: {0}")]
    RepositoryAccess(#[from] RepoAccessError),

    #[error("transient failure during {stage}: {message}")]
    Transient { stage: String, message: String },

    #[error("job {0} was cancelled")]
    Cancelled(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("job {job_id} is not complete (status: {status})")]
    NotReady { job_id: String, status: String },

    #[error("graph invariant violated: {0}")]
    Graph(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnalysisError {
    pub fn transient(stage: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    /// Whether the orchestrator should spend another attempt on this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RepositoryAccess(err) => !err.is_fatal(),
            Self::Cancelled(_)
            | Self::UnknownJob(_)
            | Self::NotReady { .. }
            | Self::Config(_) => false,
            Self::Transient { .. }
            | Self::Graph(_)
            | Self::Store(_)
            | Self::Sqlite(_)
            | Self::Io(_)
            | Self::Json(_) => true,
        }
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_errors_are_not_retried() {
        let denied = AnalysisError::from(RepoAccessError::AccessDenied("private".into()));
        let missing = AnalysisError::from(RepoAccessError::NotFound("gone".into()));
        let flaky = AnalysisError::from(RepoAccessError::Unavailable("503".into()));
        assert!(!denied.is_retryable());
        assert!(!missing.is_retryable());
        assert!(flaky.is_retryable());
    }

    #[test]
    fn test_transient_and_cancel() {
        assert!(AnalysisError::transient("mapping", "boom").is_retryable());
        assert!(!AnalysisError::Cancelled("j1".into()).is_retryable());
    }

    #[test]
    fn test_file_parse_error_mentions_path_and_category() {
        let err = FileParseError::new("src/b.py", ParseCategory::Syntax, "unexpected token");
        let text = err.to_string();
        assert!(text.contains("src/b.py"));
        assert!(text.contains("syntax"));
    }
}
