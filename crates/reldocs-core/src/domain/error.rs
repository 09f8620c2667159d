//! Domain-level error taxonomy for reldocs.

use serde::{Deserialize, Serialize};

use super::run::RunState;

/// Errors produced while validating run input. Raised before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("release identifier must not be empty")]
    EmptyReleaseIdentifier,

    #[error("release branch must look like 'release/x.y.z' or 'release/x.y.z-pre', got: {branch}")]
    InvalidBranch { branch: String },

    #[error("invalid version: {version}")]
    InvalidVersion { version: String },

    #[error("base tag must not contain whitespace: {tag:?}")]
    InvalidBaseTag { tag: String },
}

/// Configuration errors (environment, tunables, source registry).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("required source '{0}' is not registered")]
    UnknownRequiredSource(String),

    #[error("source '{0}' is registered more than once")]
    DuplicateSource(String),
}

/// Whether a source failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    /// Source unavailable: timeouts, 5xx, throttling, cancellation. Retried.
    Transient,
    /// Authorization or request errors. Never retried.
    Permanent,
}

impl std::fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceErrorKind::Transient => f.write_str("source unavailable"),
            SourceErrorKind::Permanent => f.write_str("source permanent error"),
        }
    }
}

/// Failure of a single source adapter call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == SourceErrorKind::Transient
    }
}

/// Failures of the content generator boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("content generator temporarily unavailable: {0}")]
    Transient(String),

    #[error("content generation failed: {0}")]
    Permanent(String),

    #[error("generated document set is incomplete: {0}")]
    Incomplete(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }
}

/// Errors returned by a remote repository host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The object (e.g. an open change request) already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A compare-and-swap precondition failed (branch moved underneath us).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("repository host unavailable: {0}")]
    Transient(String),

    #[error("repository host error: {0}")]
    Permanent(String),
}

/// Terminal run errors. The orchestrator is the only place that produces these.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no required source succeeded (failed: {})", failed.join(", "))]
    NoRequiredSource { failed: Vec<String> },

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("write conflict on branch {branch}: {reason}; resolve the branch manually and re-run")]
    WriteConflict { branch: String, reason: String },

    #[error("write failed: {0}")]
    Write(HostError),

    #[error("run cancelled during {stage}")]
    Cancelled { stage: RunState },

    #[error("internal error: {0}")]
    Internal(String),
}

impl RunError {
    /// Stable machine-readable kind, used in run results and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Validation(_) => "validation_error",
            RunError::Config(_) => "config_error",
            RunError::NoRequiredSource { .. } => "no_required_source",
            RunError::Generation(_) => "generation_error",
            RunError::WriteConflict { .. } => "write_conflict_error",
            RunError::Write(_) => "write_error",
            RunError::Cancelled { .. } => "cancellation_error",
            RunError::Internal(_) => "internal_error",
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, RunError::Cancelled { .. })
    }
}

/// Result type for run-level operations.
pub type Result<T> = std::result::Result<T, RunError>;
