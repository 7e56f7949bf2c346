use std::time::Duration;

use crate::catalog::DEFAULT_SCHEMA;
use crate::db::PoolSettings;
use crate::jobs::registry::RegistryConfig;

/// Runtime configuration, read from `CDCFLOW_*` variables with short-name
/// fallbacks.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub admin_addr: Option<String>,
    pub migrate_on_startup: bool,
    pub pause_timeout: Duration,
    pub cancel_grace: Duration,
    /// How often the worker's tasks record a high-water mark.
    pub checkpoint_interval: Duration,
    /// Schema used to resolve unqualified table names.
    pub default_schema: String,
    pub pool: PoolSettings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |primary: &str, fallback: &str| {
            lookup(primary)
                .filter(|s| !s.trim().is_empty())
                .or_else(|| lookup(fallback).filter(|s| !s.trim().is_empty()))
        };

        let database_url = var("CDCFLOW_DATABASE_URL", "DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let admin_addr = var("CDCFLOW_ADMIN_ADDR", "ADMIN_ADDR")
            .map(|s| normalize_optional_addr(&s))
            .unwrap_or_else(|| Some("127.0.0.1:8088".to_string()));

        let migrate_on_startup = var("CDCFLOW_MIGRATE_ON_STARTUP", "MIGRATE_ON_STARTUP")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        let millis = |primary: &str, fallback: &str, default: u64| -> anyhow::Result<Duration> {
            match var(primary, fallback) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| anyhow::anyhow!("{primary} must be a number of milliseconds, got {v:?}")),
                None => Ok(Duration::from_millis(default)),
            }
        };

        let pause_timeout = millis("CDCFLOW_PAUSE_TIMEOUT_MS", "PAUSE_TIMEOUT_MS", 30_000)?;
        let cancel_grace = millis("CDCFLOW_CANCEL_GRACE_MS", "CANCEL_GRACE_MS", 10_000)?;
        let checkpoint_interval =
            millis("CDCFLOW_CHECKPOINT_INTERVAL_MS", "CHECKPOINT_INTERVAL_MS", 1_000)?;

        let default_schema = var("CDCFLOW_DEFAULT_SCHEMA", "DEFAULT_SCHEMA")
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_else(|| DEFAULT_SCHEMA.to_string());

        let number = |primary: &str, fallback: &str| -> anyhow::Result<Option<u64>> {
            var(primary, fallback)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .map_err(|_| anyhow::anyhow!("{primary} must be a number, got {v:?}"))
                })
                .transpose()
        };

        let defaults = PoolSettings::default();
        let pool = PoolSettings {
            max_connections: number("CDCFLOW_DB_MAX_CONNECTIONS", "DB_MAX_CONNECTIONS")?
                .map(|n| n.clamp(1, 32) as u32)
                .unwrap_or(defaults.max_connections),
            acquire_timeout: number("CDCFLOW_DB_ACQUIRE_TIMEOUT_SECS", "DB_ACQUIRE_TIMEOUT_SECS")?
                .map(|n| Duration::from_secs(n.clamp(1, 60)))
                .unwrap_or(defaults.acquire_timeout),
        };

        Ok(Self {
            database_url,
            admin_addr,
            migrate_on_startup,
            pause_timeout,
            cancel_grace,
            checkpoint_interval,
            default_schema,
            pool,
        })
    }

    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            pause_timeout: self.pause_timeout,
            cancel_grace: self.cancel_grace,
        }
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() || matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
