#![allow(dead_code)]

use cdcflow::catalog::{MemoryCatalog, TableId};
use cdcflow::changefeed::view::IntrospectionRow;
use cdcflow::jobs::{
    ChangefeedRegistry, CreateChangefeed, JobId, JobRecord, JobStatus, JobStore, MemoryJobStore,
    RegistryConfig, TaskFactory,
};
use chrono::Utc;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub registry: Arc<ChangefeedRegistry>,
    pub store: Arc<MemoryJobStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub foo: TableId,
    pub bar: TableId,
    pub baz: TableId,
}

pub fn fast_config() -> RegistryConfig {
    RegistryConfig {
        pause_timeout: Duration::from_secs(5),
        cancel_grace: Duration::from_secs(5),
    }
}

/// Registry over in-memory store and catalog; database `d` has tables
/// `foo`, `bar` and `baz`.
pub fn harness(factory: Arc<dyn TaskFactory>) -> Harness {
    harness_with(factory, fast_config())
}

pub fn harness_with(factory: Arc<dyn TaskFactory>, config: RegistryConfig) -> Harness {
    let store = Arc::new(MemoryJobStore::new());
    let catalog = Arc::new(MemoryCatalog::new("d"));
    let foo = catalog.create_table("foo").expect("create foo");
    let bar = catalog.create_table("bar").expect("create bar");
    let baz = catalog.create_table("baz").expect("create baz");

    let registry = Arc::new(ChangefeedRegistry::new(
        store.clone(),
        catalog.clone(),
        factory,
        config,
    ));

    Harness {
        registry,
        store,
        catalog,
        foo,
        bar,
        baz,
    }
}

pub fn create_request(sink_uri: &str, targets: &[&str], options: &[(&str, Option<&str>)]) -> CreateChangefeed {
    CreateChangefeed {
        targets: targets.iter().map(|t| t.to_string()).collect(),
        sink_uri: sink_uri.to_string(),
        options: options
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// Writes a job of another type, which also moves id allocation past `id`.
pub async fn seed_foreign_job(store: &dyn JobStore, id: i64) {
    store
        .put(&JobRecord {
            id: JobId(id),
            job_type: "schema_change".into(),
            status: JobStatus::Running,
            payload: serde_json::json!({"table": "foo"}),
            error: None,
            high_water: None,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        })
        .await
        .expect("seed foreign job");
}

pub async fn wait_for_status(registry: &ChangefeedRegistry, id: JobId, want: JobStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = registry.status(id).expect("job exists");
        if status == want {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("job {id} stuck in {status}, wanted {want}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn only_row(registry: &ChangefeedRegistry, id: JobId) -> IntrospectionRow {
    let mut rows = registry.show_job(id).await.expect("show job");
    assert_eq!(rows.len(), 1, "expected exactly one row for job {id}");
    rows.remove(0)
}

/// Postgres pool from `TEST_DATABASE_URL`, migrated and emptied. `None` when
/// the variable is not set, in which case the caller skips.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let url = std::env::var("TEST_DATABASE_URL").ok()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query("TRUNCATE TABLE cdc_jobs")
        .execute(&pool)
        .await
        .expect("truncate failed");

    Some(pool)
}
