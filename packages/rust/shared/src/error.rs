//! Error types for Geist.
//!
//! Library crates use [`GeistError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::context::Context;

/// Whether a failed capability call is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityErrorKind {
    /// Rate limiting, timeouts, upstream 5xx. Retried with backoff.
    Transient,
    /// Malformed request, auth failure, unusable response. Never retried.
    Fatal,
}

impl std::fmt::Display for CapabilityErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Fatal => f.write_str("fatal"),
        }
    }
}

/// Failure of a single completion call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} capability error: {message}")]
pub struct CapabilityError {
    pub kind: CapabilityErrorKind,
    pub message: String,
}

impl CapabilityError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self {
            kind: CapabilityErrorKind::Transient,
            message: msg.into(),
        }
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self {
            kind: CapabilityErrorKind::Fatal,
            message: msg.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == CapabilityErrorKind::Transient
    }
}

/// Top-level error type for all Geist operations.
#[derive(Debug, thiserror::Error)]
pub enum GeistError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The model capability failed (after retries, for transient failures).
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// Malformed pipeline definition or inputs (missing context key, cycle, ...).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Per-file analysis failure. Normally recorded as a warning, not propagated.
    #[error("analysis error in {path}: {message}")]
    Analysis { path: String, message: String },

    /// An artifact with the same name already exists.
    #[error("artifact already exists: {}", path.display())]
    ArtifactCollision { path: PathBuf },

    /// A pipeline task failed; carries the context produced before it.
    #[error("task `{task_id}` failed: {source}")]
    TaskFailed {
        task_id: String,
        #[source]
        source: Box<GeistError>,
        partial: Box<Context>,
    },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, GeistError>;

impl GeistError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a per-file analysis error.
    pub fn analysis(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Analysis {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The run stage this error belongs to, for user-facing reports.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Capability(_) => "capability",
            Self::Validation { .. } => "validation",
            Self::Analysis { .. } => "analysis",
            Self::ArtifactCollision { .. } => "write",
            Self::TaskFailed { .. } => "task",
            Self::Io { .. } => "io",
        }
    }

    /// The id of the failing task, if a task failed.
    pub fn failed_task(&self) -> Option<&str> {
        match self {
            Self::TaskFailed { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = GeistError::config("missing model binding");
        assert_eq!(err.to_string(), "config error: missing model binding");

        let err = GeistError::validation("task `report` reads `outline`");
        assert!(err.to_string().contains("outline"));
    }

    #[test]
    fn capability_error_kinds() {
        let err = CapabilityError::transient("HTTP 429");
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "transient capability error: HTTP 429");

        let err: GeistError = CapabilityError::fatal("HTTP 401").into();
        assert_eq!(err.stage(), "capability");
        assert!(err.to_string().starts_with("fatal"));
    }

    #[test]
    fn task_failure_names_task_and_cause() {
        let err = GeistError::TaskFailed {
            task_id: "research".into(),
            source: Box::new(CapabilityError::fatal("bad key").into()),
            partial: Box::new(Context::new()),
        };
        assert_eq!(err.stage(), "task");
        assert_eq!(err.failed_task(), Some("research"));
        assert!(err.to_string().contains("research"));
        assert!(err.to_string().contains("bad key"));
    }
}
