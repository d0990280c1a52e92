//! Categorized error model for the collection and synchronization runtime.
//!
//! [`IntegrationError`] carries classification, an upstream-facing code, and
//! retry metadata. Construct via category-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a runtime error.
///
/// Determines propagation: `validation` and `config` abort a run before any
/// step executes; `duplicate_key` and `step_handler` fail the owning step
/// only; the `upload_*` and `sync_api` categories belong to the
/// synchronization phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invocation validation rejected the run.
    Validation,
    /// Malformed step set, missing start state, cyclic dependency.
    Config,
    /// Two graph objects of the same kind share a `_key`.
    DuplicateKey,
    /// A step handler returned or threw an error.
    StepHandler,
    /// Transient upload failure (network, 5xx, 413, credentials).
    UploadRetriable,
    /// Upload failure that must stop the synchronization job.
    UploadFatal,
    /// Non-retriable synchronization API response.
    SyncApi,
    /// Local filesystem or serialization failure.
    Io,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Config => "config",
            Self::DuplicateKey => "duplicate_key",
            Self::StepHandler => "step_handler",
            Self::UploadRetriable => "upload_retriable",
            Self::UploadFatal => "upload_fatal",
            Self::SyncApi => "sync_api",
            Self::Io => "io",
        };
        f.write_str(s)
    }
}

/// Structured runtime error.
///
/// Carries classification, a stable code, and retry metadata. The optional
/// HTTP status is populated for errors surfaced from the synchronization
/// service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct IntegrationError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl IntegrationError {
    fn new(
        category: ErrorCategory,
        retryable: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retryable,
            status: None,
        }
    }

    /// Invocation validation failure (aborts the run).
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Validation,
            false,
            "VALIDATION_ERROR",
            message,
        )
    }

    /// Configuration error (not retryable).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, false, code, message)
    }

    /// Duplicate `_key` within a run.
    #[must_use]
    pub fn duplicate_key(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::DuplicateKey, false, "DUPLICATE_KEY", message)
    }

    /// Step handler failure.
    #[must_use]
    pub fn step_handler(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::StepHandler,
            false,
            "STEP_HANDLER_ERROR",
            message,
        )
    }

    /// Transient upload failure (retried by the uploader).
    #[must_use]
    pub fn upload_retriable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::UploadRetriable, true, code, message)
    }

    /// Upload failure that stops the synchronization job.
    #[must_use]
    pub fn upload_fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::UploadFatal, false, code, message)
    }

    /// Non-retriable synchronization API response.
    #[must_use]
    pub fn sync_api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::SyncApi, false, code, message)
    }

    /// Local I/O or serialization failure.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Io, false, "IO_ERROR", message)
    }

    /// Attach the HTTP status the error was surfaced with.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether the uploader may retry the failed operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl From<std::io::Error> for IntegrationError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serde_json::Error> for IntegrationError {
    fn from(e: serde_json::Error) -> Self {
        Self::io(format!("JSON serialization failed: {e}"))
    }
}
