use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::changefeed::descriptor::ChangefeedDescriptor;
use crate::jobs::cell::{Control, JobCell, TaskPhase};
use crate::jobs::model::JobId;
use crate::jobs::store::JobStore;
use crate::BoxFuture;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),
    #[error("changefeed task canceled")]
    Canceled,
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// The long-running body of one changefeed job.
///
/// `resume` runs until the feed finishes or fails. It must call
/// [`TaskContext::checkpoint`] regularly; that is where pause and cancel
/// requests take effect.
pub trait ChangefeedTask: Send + Sync {
    fn resume<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<(), TaskError>>;

    /// Cleanup after `resume` failed or the job was canceled.
    fn on_fail_or_cancel<'a>(
        &'a self,
        ctx: &'a TaskContext,
        error: &'a TaskError,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        let _ = (ctx, error);
        Box::pin(async { Ok(()) })
    }
}

/// Builds a fresh task each time a job starts or resumes without a live
/// task (after creation, recovery, or a resume following a restart).
pub trait TaskFactory: Send + Sync {
    fn create(&self, descriptor: &ChangefeedDescriptor) -> Arc<dyn ChangefeedTask>;
}

impl<F> TaskFactory for F
where
    F: Fn(&ChangefeedDescriptor) -> Arc<dyn ChangefeedTask> + Send + Sync,
{
    fn create(&self, descriptor: &ChangefeedDescriptor) -> Arc<dyn ChangefeedTask> {
        self(descriptor)
    }
}

/// Handle a running task uses to talk to its job.
pub struct TaskContext {
    cell: Arc<JobCell>,
    store: Arc<dyn JobStore>,
}

impl TaskContext {
    pub(crate) fn new(cell: Arc<JobCell>, store: Arc<dyn JobStore>) -> Self {
        Self { cell, store }
    }

    pub fn job_id(&self) -> JobId {
        self.cell.id()
    }

    /// Current configuration. Alterations land between pause and resume, so
    /// a task should read this again after every checkpoint.
    pub fn descriptor(&self) -> Result<ChangefeedDescriptor, TaskError> {
        self.cell
            .snapshot()
            .map(|s| s.descriptor)
            .map_err(|e| TaskError::Failed(e.to_string()))
    }

    /// Last recorded high-water mark.
    pub fn high_water(&self) -> Option<DateTime<Utc>> {
        self.cell.snapshot().ok().and_then(|s| s.high_water)
    }

    /// Resolves once the registry asks the task to stop running, so a task
    /// waiting on I/O can race it against its own work.
    pub async fn signaled(&self) {
        let mut rx = self.cell.control.subscribe();
        let _ = rx.wait_for(|s| s.control != Control::Run).await;
    }

    /// Records `high_water` (if any), then honours pending control requests.
    /// Blocks while the job is paused. Returns `Err(Canceled)` when the job
    /// is being canceled; the task should return that error.
    pub async fn checkpoint(&self, high_water: Option<DateTime<Utc>>) -> Result<(), TaskError> {
        if let Some(ts) = high_water {
            self.cell
                .commit(self.store.as_ref(), |state| {
                    if state.high_water.map_or(true, |prev| ts > prev) {
                        state.high_water = Some(ts);
                    }
                    Ok(())
                })
                .await
                .map_err(|e| TaskError::Failed(format!("recording high-water: {e}")))?;
        }

        let mut rx = self.cell.control.subscribe();
        loop {
            let signal = *rx.borrow_and_update();
            match signal.control {
                Control::Run => {
                    self.cell.acknowledge(TaskPhase::Running, signal.epoch);
                    return Ok(());
                }
                Control::Stop => return Err(TaskError::Canceled),
                Control::Suspend => {
                    self.cell.acknowledge(TaskPhase::Suspended, signal.epoch);
                    if rx.changed().await.is_err() {
                        return Err(TaskError::Canceled);
                    }
                }
            }
        }
    }
}
