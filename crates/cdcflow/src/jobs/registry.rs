use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, QualifiedName, TableId};
use crate::changefeed::alter::{plan_alteration, AlterChangefeed};
use crate::changefeed::descriptor::ChangefeedDescriptor;
use crate::changefeed::options::normalize_options;
use crate::changefeed::redact::redact_message;
use crate::changefeed::sink::SinkAddress;
use crate::changefeed::view::{build_row, sort_rows, IntrospectionRow, RowOrder};
use crate::errors::{ChangefeedError, Result};
use crate::jobs::cell::{Control, JobCell, JobState, LiveTask, TaskPhase};
use crate::jobs::model::{JobId, JobStatus};
use crate::jobs::store::JobStore;
use crate::jobs::task::{ChangefeedTask, TaskContext, TaskError, TaskFactory};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long `pause` waits for the task to acknowledge.
    pub pause_timeout: Duration,
    /// How long `cancel` waits for the task to exit before aborting it.
    pub cancel_grace: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            pause_timeout: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(10),
        }
    }
}

/// `CREATE CHANGEFEED FOR TABLE <targets> INTO '<sink_uri>' WITH <options>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChangefeed {
    pub targets: Vec<String>,
    pub sink_uri: String,
    #[serde(default)]
    pub options: BTreeMap<String, Option<String>>,
}

/// Live table of changefeed jobs and the only writer of their state.
pub struct ChangefeedRegistry {
    store: Arc<dyn JobStore>,
    catalog: Arc<dyn Catalog>,
    factory: Arc<dyn TaskFactory>,
    config: RegistryConfig,
    jobs: RwLock<BTreeMap<JobId, Arc<JobCell>>>,
}

impl ChangefeedRegistry {
    pub fn new(
        store: Arc<dyn JobStore>,
        catalog: Arc<dyn Catalog>,
        factory: Arc<dyn TaskFactory>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            factory,
            config,
            jobs: RwLock::new(BTreeMap::new()),
        }
    }

    fn cell(&self, id: JobId) -> Result<Option<Arc<JobCell>>> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| ChangefeedError::Store(anyhow::anyhow!("job table lock poisoned")))?;
        Ok(jobs.get(&id).cloned())
    }

    fn require(&self, id: JobId) -> Result<Arc<JobCell>> {
        self.cell(id)?.ok_or_else(|| ChangefeedError::job_not_found(id))
    }

    fn cells(&self) -> Result<Vec<Arc<JobCell>>> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| ChangefeedError::Store(anyhow::anyhow!("job table lock poisoned")))?;
        Ok(jobs.values().cloned().collect())
    }

    fn insert(&self, cell: Arc<JobCell>) -> Result<()> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| ChangefeedError::Store(anyhow::anyhow!("job table lock poisoned")))?;
        jobs.insert(cell.id(), cell);
        Ok(())
    }

    /// Loads changefeed records from the store. Pending and running jobs get
    /// a task; paused jobs get one on resume. Returns the number of tasks
    /// started.
    pub async fn recover(&self) -> anyhow::Result<usize> {
        let records = self.store.list().await?;
        let mut loaded = 0;
        let mut started = 0;

        for record in records.iter().filter(|r| r.is_changefeed()) {
            if self.cell(record.id)?.is_some() {
                continue;
            }
            let state = match JobState::from_record(record) {
                Ok(state) => state,
                Err(e) => {
                    warn!(job_id = %record.id, error = %e, "skipping unreadable changefeed record");
                    continue;
                }
            };
            let status = state.status;
            let cell = Arc::new(JobCell::new(state));
            self.insert(cell.clone())?;
            loaded += 1;

            if matches!(status, JobStatus::Pending | JobStatus::Running) {
                self.spawn_task(&cell)?;
                started += 1;
            }
        }

        info!(loaded, started, "recovered changefeed jobs");
        Ok(started)
    }

    pub async fn create(&self, request: CreateChangefeed) -> Result<JobId> {
        let sink = SinkAddress::parse(&request.sink_uri)?;
        let options = normalize_options(
            request
                .options
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_deref())),
        )?;

        // a table named twice, possibly spelled differently, is written once
        let mut seen = HashSet::new();
        let mut written = Vec::with_capacity(request.targets.len());
        let mut tables = Vec::with_capacity(request.targets.len());
        for name in &request.targets {
            let table = self
                .catalog
                .resolve(name)
                .await?
                .ok_or_else(|| ChangefeedError::table_not_found(name))?;
            if seen.insert(table.id) {
                written.push(name.clone());
                tables.push(table);
            }
        }

        let job_id = self.store.allocate_id().await?;
        let descriptor = ChangefeedDescriptor::new(job_id, written, tables, sink, options)?;
        let sink = descriptor.sink().redacted();

        let now = Utc::now();
        let state = JobState {
            descriptor,
            status: JobStatus::Pending,
            error: None,
            high_water: None,
            created_at: now,
            modified_at: now,
        };
        self.store.put(&state.to_record()?).await?;

        let cell = Arc::new(JobCell::new(state));
        self.insert(cell.clone())?;
        self.spawn_task(&cell)?;

        info!(job_id = %job_id, sink = %sink, "created changefeed");
        Ok(job_id)
    }

    pub fn status(&self, id: JobId) -> Result<JobStatus> {
        self.require(id)?.status()
    }

    /// Zero rows when `id` is unknown or not a changefeed.
    pub async fn show_job(&self, id: JobId) -> Result<Vec<IntrospectionRow>> {
        match self.cell(id)? {
            Some(cell) => Ok(vec![self.row(&cell).await?]),
            None => Ok(Vec::new()),
        }
    }

    pub async fn show_jobs(&self, order: RowOrder) -> Result<Vec<IntrospectionRow>> {
        let mut rows = Vec::new();
        for cell in self.cells()? {
            rows.push(self.row(&cell).await?);
        }
        sort_rows(&mut rows, order);
        Ok(rows)
    }

    async fn row(&self, cell: &JobCell) -> Result<IntrospectionRow> {
        let snapshot = cell.snapshot()?;

        let mut names: HashMap<TableId, QualifiedName> = HashMap::new();
        for id in snapshot.descriptor.targets().ids() {
            match self.catalog.lookup(id).await {
                Ok(Some(name)) => {
                    names.insert(id, name);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(job_id = %cell.id(), table_id = %id, error = %e, "using recorded table name");
                }
            }
        }

        Ok(build_row(&snapshot, |id| names.get(&id).cloned()))
    }

    /// Blocks until the task acknowledges suspension, then commits `paused`.
    /// On timeout the job keeps running.
    pub async fn pause(&self, id: JobId) -> Result<()> {
        let cell = self.require(id)?;
        let _op = cell.ops.lock().await;

        match cell.status()? {
            JobStatus::Paused => return Ok(()),
            JobStatus::Running => {}
            status => {
                return Err(ChangefeedError::InvalidState {
                    job_id: id,
                    status,
                    reason: "only running jobs can be paused",
                })
            }
        }

        if cell.task_alive() {
            let mut acks = cell.ack.subscribe();
            let epoch = cell.signal(Control::Suspend);

            let acked = timeout(self.config.pause_timeout, async {
                acks.wait_for(|a| {
                    a.phase == TaskPhase::Exited
                        || (a.phase == TaskPhase::Suspended && a.epoch == epoch)
                })
                .await
                .map(|a| a.phase)
            })
            .await;

            match acked {
                Ok(Ok(TaskPhase::Suspended)) => {}
                Ok(_) => {
                    return Err(ChangefeedError::InvalidState {
                        job_id: id,
                        status: cell.status()?,
                        reason: "task exited before pausing",
                    });
                }
                Err(_) => {
                    cell.signal(Control::Run);
                    warn!(
                        job_id = %id,
                        timeout_ms = self.config.pause_timeout.as_millis() as u64,
                        "pause not acknowledged"
                    );
                    return Err(ChangefeedError::PauseTimeout {
                        job_id: id,
                        timeout_ms: self.config.pause_timeout.as_millis(),
                    });
                }
            }
        }

        let committed = cell
            .commit(self.store.as_ref(), |s| {
                s.transition(JobStatus::Paused, "only running jobs can be paused")
            })
            .await;
        if let Err(e) = committed {
            // the task is parked; let it carry on so status and task agree
            cell.signal(Control::Run);
            return Err(e);
        }

        info!(job_id = %id, "paused changefeed");
        Ok(())
    }

    /// Commits `running`, then wakes the task (or starts a new one when the
    /// job has none, e.g. after recovery).
    pub async fn resume(&self, id: JobId) -> Result<()> {
        let cell = self.require(id)?;
        let _op = cell.ops.lock().await;

        match cell.status()? {
            JobStatus::Running => return Ok(()),
            JobStatus::Paused => {}
            status => {
                return Err(ChangefeedError::InvalidState {
                    job_id: id,
                    status,
                    reason: "only paused jobs can be resumed",
                })
            }
        }

        cell.commit(self.store.as_ref(), |s| {
            s.transition(JobStatus::Running, "only paused jobs can be resumed")
        })
        .await?;

        if cell.task_alive() {
            cell.signal(Control::Run);
        } else {
            self.spawn_task(&cell)?;
        }

        info!(job_id = %id, "resumed changefeed");
        Ok(())
    }

    pub async fn alter(&self, id: JobId, request: &AlterChangefeed) -> Result<()> {
        let cell = self.require(id)?;
        let _op = cell.ops.lock().await;

        let snapshot = cell.snapshot()?;
        if snapshot.status != JobStatus::Paused {
            return Err(ChangefeedError::InvalidState {
                job_id: id,
                status: snapshot.status,
                reason: "must pause before altering",
            });
        }

        let delta = plan_alteration(request, &snapshot.descriptor, self.catalog.as_ref()).await?;
        cell.commit(self.store.as_ref(), |s| {
            s.descriptor.apply_alteration(s.status, &delta)
        })
        .await?;

        info!(
            job_id = %id,
            added = delta.add.len(),
            dropped = delta.drop.len(),
            options = delta.set_options.len() + delta.unset_options.len(),
            "altered changefeed"
        );
        Ok(())
    }

    /// Stops the task, waiting up to `cancel_grace` before aborting it, and
    /// marks the job canceled.
    pub async fn cancel(&self, id: JobId) -> Result<()> {
        let cell = self.require(id)?;
        let _op = cell.ops.lock().await;

        let status = cell.status()?;
        if status.is_terminal() {
            return Err(ChangefeedError::InvalidState {
                job_id: id,
                status,
                reason: "job already finished",
            });
        }

        cell.signal(Control::Stop);

        match cell.take_live() {
            Some(LiveTask { task, mut handle }) => {
                if timeout(self.config.cancel_grace, &mut handle).await.is_err() {
                    warn!(job_id = %id, "task ignored cancellation, aborting");
                    handle.abort();
                    self.cleanup(&cell, task.as_ref()).await;
                }
            }
            None => {
                let task = self.factory.create(&cell.snapshot()?.descriptor);
                self.cleanup(&cell, task.as_ref()).await;
            }
        }

        cell.commit(self.store.as_ref(), |s| {
            if !s.status.is_terminal() {
                s.transition(JobStatus::Canceled, "job already finished")?;
            }
            Ok(())
        })
        .await?;

        info!(job_id = %id, "canceled changefeed");
        Ok(())
    }

    async fn cleanup(&self, cell: &Arc<JobCell>, task: &dyn ChangefeedTask) {
        let ctx = TaskContext::new(cell.clone(), self.store.clone());
        if let Err(e) = task.on_fail_or_cancel(&ctx, &TaskError::Canceled).await {
            warn!(job_id = %cell.id(), error = %e, "cancel cleanup failed");
        }
    }

    /// Aborts every task without touching persisted status, so the next
    /// `recover` picks the jobs up again.
    pub fn shutdown(&self) {
        let Ok(cells) = self.cells() else {
            return;
        };
        for cell in cells {
            if let Some(live) = cell.take_live() {
                live.handle.abort();
            }
        }
        info!("changefeed registry shut down");
    }

    fn spawn_task(&self, cell: &Arc<JobCell>) -> Result<()> {
        let descriptor = cell.snapshot()?.descriptor;
        let task = self.factory.create(&descriptor);

        cell.signal(Control::Run);
        cell.acknowledge(TaskPhase::Pending, 0);

        let handle = tokio::spawn(supervise(cell.clone(), self.store.clone(), task.clone()));
        cell.set_live(LiveTask { task, handle })
    }
}

/// Drives one task to completion and records its outcome.
async fn supervise(cell: Arc<JobCell>, store: Arc<dyn JobStore>, task: Arc<dyn ChangefeedTask>) {
    let job_id = cell.id();
    let ctx = TaskContext::new(cell.clone(), store.clone());

    let started = cell
        .commit(store.as_ref(), |s| {
            if s.status == JobStatus::Pending {
                s.transition(JobStatus::Running, "job is no longer pending")?;
            }
            Ok(())
        })
        .await;
    if let Err(e) = started {
        warn!(job_id = %job_id, error = %e, "could not mark changefeed running");
        cell.acknowledge(TaskPhase::Exited, 0);
        return;
    }

    debug!(job_id = %job_id, "changefeed task started");
    let result = task.resume(&ctx).await;

    let (status, error) = match result {
        Ok(()) => (JobStatus::Succeeded, None),
        Err(err) => {
            if let Err(e) = task.on_fail_or_cancel(&ctx, &err).await {
                warn!(job_id = %job_id, error = %e, "changefeed cleanup failed");
            }
            match err {
                TaskError::Canceled => (JobStatus::Canceled, None),
                TaskError::Failed(message) => (JobStatus::Failed, Some(message)),
            }
        }
    };

    let recorded = cell
        .commit(store.as_ref(), |s| {
            if s.status.is_terminal() {
                return Ok(());
            }
            s.transition(status, "job already finished")?;
            s.error = error.clone();
            Ok(())
        })
        .await;

    match (&recorded, &error) {
        (Err(e), _) => warn!(job_id = %job_id, error = %e, "could not record task outcome"),
        (Ok(()), Some(message)) => {
            warn!(job_id = %job_id, error = %redact_message(message), "changefeed failed")
        }
        (Ok(()), None) => info!(job_id = %job_id, status = %status, "changefeed task exited"),
    }

    cell.acknowledge(TaskPhase::Exited, 0);
}
