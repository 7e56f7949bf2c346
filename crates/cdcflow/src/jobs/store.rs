use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use crate::jobs::model::{JobId, JobRecord, JobStatus};
use crate::BoxFuture;

/// Persisted job rows keyed by job id. The encoding of the payload belongs
/// to the job type; the store only moves it around.
pub trait JobStore: Send + Sync {
    /// Next job id. Ids only ever grow.
    fn allocate_id(&self) -> BoxFuture<'_, anyhow::Result<JobId>>;

    /// Insert or replace the row for `record.id`.
    fn put<'a>(&'a self, record: &'a JobRecord) -> BoxFuture<'a, anyhow::Result<()>>;

    fn get(&self, id: JobId) -> BoxFuture<'_, anyhow::Result<Option<JobRecord>>>;

    /// All rows, ordered by id.
    fn list(&self) -> BoxFuture<'_, anyhow::Result<Vec<JobRecord>>>;
}

#[derive(Default)]
pub struct MemoryJobStore {
    next_id: AtomicI64,
    rows: Mutex<BTreeMap<JobId, JobRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put` fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn rows(&self) -> anyhow::Result<std::sync::MutexGuard<'_, BTreeMap<JobId, JobRecord>>> {
        self.rows
            .lock()
            .map_err(|_| anyhow::anyhow!("job store lock poisoned"))
    }
}

impl JobStore for MemoryJobStore {
    fn allocate_id(&self) -> BoxFuture<'_, anyhow::Result<JobId>> {
        Box::pin(async move { Ok(JobId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)) })
    }

    fn put<'a>(&'a self, record: &'a JobRecord) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if self.fail_writes.load(Ordering::SeqCst) {
                anyhow::bail!("injected write failure for job {}", record.id);
            }
            let mut rows = self.rows()?;
            // keep allocation ahead of ids written by other producers
            self.next_id.fetch_max(record.id.0, Ordering::SeqCst);
            rows.insert(record.id, record.clone());
            Ok(())
        })
    }

    fn get(&self, id: JobId) -> BoxFuture<'_, anyhow::Result<Option<JobRecord>>> {
        Box::pin(async move { Ok(self.rows()?.get(&id).cloned()) })
    }

    fn list(&self) -> BoxFuture<'_, anyhow::Result<Vec<JobRecord>>> {
        Box::pin(async move { Ok(self.rows()?.values().cloned().collect()) })
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    job_type: String,
    status: String,
    payload: Value,
    error: Option<String>,
    high_water: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = anyhow::Error;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_str(&row.status)
            .ok_or_else(|| anyhow::anyhow!("job {} has unknown status {:?}", row.id, row.status))?;
        Ok(JobRecord {
            id: JobId(row.id),
            job_type: row.job_type,
            status,
            payload: row.payload,
            error: row.error,
            high_water: row.high_water,
            created_at: row.created_at,
            modified_at: row.modified_at,
        })
    }
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn next_id(&self) -> anyhow::Result<JobId> {
        let id: i64 = sqlx::query_scalar("SELECT nextval('cdc_job_ids')")
            .fetch_one(&self.pool)
            .await?;
        Ok(JobId(id))
    }

    async fn upsert(&self, record: &JobRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cdc_jobs (id, job_type, status, payload, error, high_water, created_at, modified_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                payload = EXCLUDED.payload,
                error = EXCLUDED.error,
                high_water = EXCLUDED.high_water,
                modified_at = EXCLUDED.modified_at
            "#,
        )
        .bind(record.id.0)
        .bind(&record.job_type)
        .bind(record.status.as_str())
        .bind(&record.payload)
        .bind(&record.error)
        .bind(record.high_water)
        .bind(record.created_at)
        .bind(record.modified_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch(&self, id: JobId) -> anyhow::Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, job_type, status, payload, error, high_water, created_at, modified_at
            FROM cdc_jobs
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn fetch_all(&self) -> anyhow::Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, job_type, status, payload, error, high_water, created_at, modified_at
            FROM cdc_jobs
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRecord::try_from).collect()
    }
}

impl JobStore for PgJobStore {
    fn allocate_id(&self) -> BoxFuture<'_, anyhow::Result<JobId>> {
        Box::pin(self.next_id())
    }

    fn put<'a>(&'a self, record: &'a JobRecord) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.upsert(record))
    }

    fn get(&self, id: JobId) -> BoxFuture<'_, anyhow::Result<Option<JobRecord>>> {
        Box::pin(self.fetch(id))
    }

    fn list(&self) -> BoxFuture<'_, anyhow::Result<Vec<JobRecord>>> {
        Box::pin(self.fetch_all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::CHANGEFEED_JOB_TYPE;

    fn record(id: i64) -> JobRecord {
        JobRecord {
            id: JobId(id),
            job_type: CHANGEFEED_JOB_TYPE.into(),
            status: JobStatus::Pending,
            payload: serde_json::json!({}),
            error: None,
            high_water: None,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_ids_are_monotonic_past_external_writes() {
        let store = MemoryJobStore::new();
        assert_eq!(store.allocate_id().await.unwrap(), JobId(1));
        store.put(&record(41)).await.unwrap();
        assert_eq!(store.allocate_id().await.unwrap(), JobId(42));
    }

    #[tokio::test]
    async fn injected_write_failures() {
        let store = MemoryJobStore::new();
        store.set_fail_writes(true);
        assert!(store.put(&record(1)).await.is_err());
        store.set_fail_writes(false);
        store.put(&record(1)).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.get(JobId(2)).await.unwrap().is_none());
    }
}
