use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::changefeed::descriptor::ChangefeedDescriptor;
use crate::changefeed::view::JobSnapshot;
use crate::errors::ChangefeedError;
use crate::jobs::model::{JobId, JobRecord, JobStatus, CHANGEFEED_JOB_TYPE};
use crate::jobs::store::JobStore;
use crate::jobs::task::ChangefeedTask;

/// What the registry asks of the running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Run,
    Suspend,
    Stop,
}

/// What the task last acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// Started, no checkpoint reached yet.
    Pending,
    Running,
    Suspended,
    Exited,
}

/// A control request tagged with a per-job sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub control: Control,
    pub epoch: u64,
}

/// An acknowledgement of the signal with the same epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub phase: TaskPhase,
    pub epoch: u64,
}

#[derive(Debug, Clone)]
pub struct JobState {
    pub descriptor: ChangefeedDescriptor,
    pub status: JobStatus,
    pub error: Option<String>,
    pub high_water: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl JobState {
    pub fn from_record(record: &JobRecord) -> anyhow::Result<Self> {
        let descriptor: ChangefeedDescriptor = serde_json::from_value(record.payload.clone())?;
        if descriptor.job_id() != record.id {
            anyhow::bail!(
                "job {} carries a descriptor for job {}",
                record.id,
                descriptor.job_id()
            );
        }
        Ok(Self {
            descriptor,
            status: record.status,
            error: record.error.clone(),
            high_water: record.high_water,
            created_at: record.created_at,
            modified_at: record.modified_at,
        })
    }

    pub fn to_record(&self) -> anyhow::Result<JobRecord> {
        Ok(JobRecord {
            id: self.descriptor.job_id(),
            job_type: CHANGEFEED_JOB_TYPE.to_string(),
            status: self.status,
            payload: serde_json::to_value(&self.descriptor)?,
            error: self.error.clone(),
            high_water: self.high_water,
            created_at: self.created_at,
            modified_at: self.modified_at,
        })
    }

    pub fn transition(&mut self, next: JobStatus, reason: &'static str) -> Result<(), ChangefeedError> {
        self.status = self
            .status
            .transition(next)
            .map_err(|e| ChangefeedError::InvalidState {
                job_id: self.descriptor.job_id(),
                status: e.from,
                reason,
            })?;
        Ok(())
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            descriptor: self.descriptor.clone(),
            status: self.status,
            error: self.error.clone(),
            high_water: self.high_water,
            created_at: self.created_at,
        }
    }
}

pub(crate) struct LiveTask {
    pub task: Arc<dyn ChangefeedTask>,
    pub handle: JoinHandle<()>,
}

/// Shared per-job state between the task, the registry and readers.
pub struct JobCell {
    id: JobId,
    state: Mutex<JobState>,
    /// Serializes persist + commit so the store never sees writes out of order.
    write: tokio::sync::Mutex<()>,
    /// Serializes pause/resume/alter/cancel across their awaits.
    pub(crate) ops: tokio::sync::Mutex<()>,
    pub(crate) control: watch::Sender<Signal>,
    pub(crate) ack: watch::Sender<Ack>,
    pub(crate) live: Mutex<Option<LiveTask>>,
}

impl JobCell {
    pub fn new(state: JobState) -> Self {
        Self {
            id: state.descriptor.job_id(),
            state: Mutex::new(state),
            write: tokio::sync::Mutex::new(()),
            ops: tokio::sync::Mutex::new(()),
            control: watch::channel(Signal {
                control: Control::Run,
                epoch: 0,
            })
            .0,
            ack: watch::channel(Ack {
                phase: TaskPhase::Pending,
                epoch: 0,
            })
            .0,
            live: Mutex::new(None),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    fn lock(&self) -> Result<MutexGuard<'_, JobState>, ChangefeedError> {
        self.state
            .lock()
            .map_err(|_| ChangefeedError::Store(anyhow::anyhow!("job {} state lock poisoned", self.id)))
    }

    pub fn snapshot(&self) -> Result<JobSnapshot, ChangefeedError> {
        Ok(self.lock()?.snapshot())
    }

    pub fn status(&self) -> Result<JobStatus, ChangefeedError> {
        Ok(self.lock()?.status)
    }

    /// Applies `f` to a copy of the state, persists the copy, then swaps it
    /// in. If `f` or the write fails the state is left untouched.
    pub async fn commit<R, F>(&self, store: &dyn JobStore, f: F) -> Result<R, ChangefeedError>
    where
        R: Send,
        F: FnOnce(&mut JobState) -> Result<R, ChangefeedError> + Send,
    {
        let _write = self.write.lock().await;

        let mut next = self.lock()?.clone();
        let out = f(&mut next)?;
        next.modified_at = Utc::now();

        store.put(&next.to_record()?).await?;

        *self.lock()? = next;
        Ok(out)
    }

    /// Publishes a new control request and returns its epoch.
    pub(crate) fn signal(&self, control: Control) -> u64 {
        let mut epoch = 0;
        self.control.send_modify(|s| {
            s.epoch += 1;
            s.control = control;
            epoch = s.epoch;
        });
        epoch
    }

    pub(crate) fn acknowledge(&self, phase: TaskPhase, epoch: u64) {
        self.ack.send_replace(Ack { phase, epoch });
    }

    pub(crate) fn set_live(&self, task: LiveTask) -> Result<(), ChangefeedError> {
        let mut live = self
            .live
            .lock()
            .map_err(|_| ChangefeedError::Store(anyhow::anyhow!("job {} task slot poisoned", self.id)))?;
        if let Some(previous) = live.replace(task) {
            previous.handle.abort();
        }
        Ok(())
    }

    pub(crate) fn task_alive(&self) -> bool {
        self.live
            .lock()
            .map(|live| live.as_ref().is_some_and(|l| !l.handle.is_finished()))
            .unwrap_or(false)
    }

    pub(crate) fn take_live(&self) -> Option<LiveTask> {
        self.live.lock().ok().and_then(|mut live| live.take())
    }
}
