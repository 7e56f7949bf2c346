use serde::{Deserialize, Serialize};

use crate::changefeed::view::{RowOrder, SortKey};
use crate::jobs::model::{JobId, JobStatus};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub order_by: Option<SortKey>,
    #[serde(default)]
    pub desc: bool,
}

impl ListQuery {
    pub fn order(&self) -> RowOrder {
        RowOrder {
            key: self.order_by.unwrap_or_default(),
            descending: self.desc,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResponse {
    pub job_id: JobId,
}

/// Body returned by pause/resume/cancel/alter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub error: String,
}
