use cdcflow::api;
use cdcflow::catalog::PgCatalog;
use cdcflow::config;
use cdcflow::db;
use cdcflow::jobs::{ChangefeedRegistry, PgJobStore};

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod tasks;
use tasks::polling_factory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = config::Config::from_env()?;
    let api_addr = cfg.admin_addr.clone();

    info!(
        api = api_addr.as_deref().unwrap_or("disabled"),
        migrate_on_startup = cfg.migrate_on_startup,
        pause_timeout_ms = cfg.pause_timeout.as_millis() as u64,
        cancel_grace_ms = cfg.cancel_grace.as_millis() as u64,
        checkpoint_interval_ms = cfg.checkpoint_interval.as_millis() as u64,
        "cdcflow worker starting"
    );

    let pool = db::make_pool(&cfg.database_url, &cfg.pool).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let registry = Arc::new(ChangefeedRegistry::new(
        Arc::new(PgJobStore::new(pool.clone())),
        Arc::new(PgCatalog::new(pool.clone(), &cfg.default_schema)),
        polling_factory(cfg.checkpoint_interval),
        cfg.registry(),
    ));

    let started = registry.recover().await?;
    info!(started, "changefeed tasks resumed");

    let app = api::router(api::ApiState {
        registry: registry.clone(),
    });

    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("admin api listening on http://{addr}");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    tokio::select! {
        res = api_handle => {
            if let Err(e) = res? {
                error!(error = %e, "admin api stopped");
                registry.shutdown();
                return Err(e);
            }
        }
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("shutdown requested");
        }
    }

    registry.shutdown();
    Ok(())
}
