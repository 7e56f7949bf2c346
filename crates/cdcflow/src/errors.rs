use thiserror::Error;

use crate::jobs::model::{JobId, JobStatus};

/// Errors surfaced synchronously to callers of the registry.
///
/// Every variant except `Store` is detected before any mutation, so the job
/// is left exactly as it was.
#[derive(Debug, Error)]
pub enum ChangefeedError {
    #[error("job {job_id} is {status}: {reason}")]
    InvalidState {
        job_id: JobId,
        status: JobStatus,
        reason: &'static str,
    },

    #[error("cannot drop all targets of changefeed {0}")]
    EmptyTargetSet(JobId),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid option {name}: {reason}")]
    InvalidOption { name: String, reason: String },

    #[error("invalid sink: {0}")]
    InvalidSink(String),

    #[error("job {job_id} did not acknowledge pause within {timeout_ms}ms")]
    PauseTimeout { job_id: JobId, timeout_ms: u128 },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl ChangefeedError {
    pub fn invalid_option(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn job_not_found(job_id: JobId) -> Self {
        Self::NotFound(format!("job {job_id}"))
    }

    pub fn table_not_found(name: &str) -> Self {
        Self::NotFound(format!("table {name:?}"))
    }

    /// Stable machine-readable code, used by the admin API error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::EmptyTargetSet(_) => "EMPTY_TARGET_SET",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidOption { .. } => "INVALID_OPTION",
            Self::InvalidSink(_) => "INVALID_SINK",
            Self::PauseTimeout { .. } => "PAUSE_TIMEOUT",
            Self::Store(_) => "STORE",
        }
    }
}

pub type Result<T, E = ChangefeedError> = std::result::Result<T, E>;
