use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const CHANGEFEED_JOB_TYPE: &str = "changefeed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Failed,
    Succeeded,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Failed => "failed",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "paused" => Some(JobStatus::Paused),
            "failed" => Some(JobStatus::Failed),
            "succeeded" => Some(JobStatus::Succeeded),
            "canceled" => Some(JobStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Succeeded | JobStatus::Canceled
        )
    }

    /// Legal edges of the job lifecycle:
    ///
    /// - `pending -> running`
    /// - `running <-> paused`
    /// - `running -> succeeded` (only jobs with a completion point)
    /// - any non-terminal state -> `failed` | `canceled`
    ///
    /// Terminal states never transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (*self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed) | (_, Canceled) => true,
            (Pending, Running) => true,
            (Running, Paused) | (Paused, Running) => true,
            (Running, Succeeded) => true,
            _ => false,
        }
    }

    pub fn transition(self, next: JobStatus) -> Result<JobStatus, IllegalTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(IllegalTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Row persisted per job id. The payload is opaque to the store; changefeed
/// records carry a serialized `ChangefeedDescriptor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: String,
    pub status: JobStatus,
    pub payload: Value,
    pub error: Option<String>,
    pub high_water: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn is_changefeed(&self) -> bool {
        self.job_type == CHANGEFEED_JOB_TYPE
    }
}
