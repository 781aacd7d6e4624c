//! Typed error hierarchy for the Muse orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `WorkerError` — failures reported by (or on behalf of) pipeline workers
//! - `AdmissionError` — synchronous rejections from session/rate admission
//! - `StoreError` — artifact persistence failures
//!
//! QA rejections are deliberately NOT errors: a failed quality check is a
//! domain verdict that drives the retry loop and is recorded in the trace.

use thiserror::Error;

/// Errors from a single worker invocation.
///
/// The engine retries `Transient` errors up to its own bound before
/// recording the step as failed; `Fatal` aborts the run immediately.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("transient worker error: {message}")]
    Transient { message: String },

    #[error("worker deadline exceeded after {seconds}s")]
    DeadlineExceeded { seconds: u64 },

    #[error("fatal worker error: {message}")]
    Fatal { message: String },
}

impl WorkerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Whether the engine may retry this invocation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WorkerError::Transient { .. } | WorkerError::DeadlineExceeded { .. }
        )
    }

    /// Short machine-readable kind recorded in the trace.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::Transient { .. } => "transient",
            WorkerError::DeadlineExceeded { .. } => "deadline",
            WorkerError::Fatal { .. } => "fatal",
        }
    }
}

/// Synchronous rejections from admission control.
///
/// These are returned immediately — never queued — so callers can surface
/// an explicit rejection to the client.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("session registry at capacity ({capacity})")]
    CapacityExceeded { capacity: usize },

    #[error("rate limit exceeded for {key}")]
    RateLimited { key: String },
}

/// Errors from the artifact store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create run directory at {path}: {source}")]
    CreateDirFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to append trace entry for run {run_id}: {source}")]
    TraceAppendFailed {
        run_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to seal run {run_id}: {source}")]
    SealFailed {
        run_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
