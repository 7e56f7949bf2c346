use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use crate::BoxFuture;

pub const DEFAULT_DATABASE: &str = "defaultdb";
pub const DEFAULT_SCHEMA: &str = "public";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub database: String,
    pub schema: String,
    pub table: String,
}

impl QualifiedName {
    pub fn new(database: &str, schema: &str, table: &str) -> Self {
        Self {
            database: database.to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.table)
    }
}

/// A user-written table reference: `table`, `schema.table` or
/// `database.schema.table`. Unquoted identifiers fold to lower case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub table: String,
}

impl TableName {
    pub fn parse(name: &str) -> Option<Self> {
        let parts: Vec<String> = name
            .trim()
            .split('.')
            .map(|p| p.trim().to_lowercase())
            .collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        match parts.as_slice() {
            [table] => Some(Self {
                database: None,
                schema: None,
                table: table.clone(),
            }),
            [schema, table] => Some(Self {
                database: None,
                schema: Some(schema.clone()),
                table: table.clone(),
            }),
            [database, schema, table] => Some(Self {
                database: Some(database.clone()),
                schema: Some(schema.clone()),
                table: table.clone(),
            }),
            _ => None,
        }
    }

    pub fn qualify(&self, default_database: &str, default_schema: &str) -> QualifiedName {
        QualifiedName {
            database: self
                .database
                .clone()
                .unwrap_or_else(|| default_database.to_string()),
            schema: self
                .schema
                .clone()
                .unwrap_or_else(|| default_schema.to_string()),
            table: self.table.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub id: TableId,
    pub name: QualifiedName,
}

/// Name resolution collaborator. Target tables are tracked by id; names are
/// looked up again whenever they are displayed.
pub trait Catalog: Send + Sync {
    fn resolve<'a>(&'a self, name: &'a str) -> BoxFuture<'a, anyhow::Result<Option<TableRef>>>;

    fn lookup<'a>(&'a self, id: TableId) -> BoxFuture<'a, anyhow::Result<Option<QualifiedName>>>;
}

struct MemoryTables {
    next_id: u32,
    by_id: HashMap<TableId, QualifiedName>,
}

/// In-process catalog, used by tests and for seeding a standalone worker.
pub struct MemoryCatalog {
    database: String,
    schema: String,
    tables: RwLock<MemoryTables>,
}

impl MemoryCatalog {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            tables: RwLock::new(MemoryTables {
                next_id: 100,
                by_id: HashMap::new(),
            }),
        }
    }

    pub fn create_table(&self, name: &str) -> anyhow::Result<TableId> {
        let parsed = TableName::parse(name)
            .ok_or_else(|| anyhow::anyhow!("invalid table name {name:?}"))?;
        let qualified = parsed.qualify(&self.database, &self.schema);

        let mut tables = self.tables.write().map_err(|_| anyhow::anyhow!("catalog lock poisoned"))?;
        if tables.by_id.values().any(|n| *n == qualified) {
            anyhow::bail!("table {qualified} already exists");
        }
        let id = TableId(tables.next_id);
        tables.next_id += 1;
        tables.by_id.insert(id, qualified);
        Ok(id)
    }

    pub fn rename_table(&self, id: TableId, new_table: &str) -> anyhow::Result<()> {
        let mut tables = self.tables.write().map_err(|_| anyhow::anyhow!("catalog lock poisoned"))?;
        let name = tables
            .by_id
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("table {id} not found"))?;
        name.table = new_table.trim().to_lowercase();
        Ok(())
    }

    fn find(&self, name: &str) -> anyhow::Result<Option<TableRef>> {
        let Some(parsed) = TableName::parse(name) else {
            return Ok(None);
        };
        let qualified = parsed.qualify(&self.database, &self.schema);
        let tables = self.tables.read().map_err(|_| anyhow::anyhow!("catalog lock poisoned"))?;
        Ok(tables
            .by_id
            .iter()
            .find(|(_, n)| **n == qualified)
            .map(|(id, n)| TableRef {
                id: *id,
                name: n.clone(),
            }))
    }

    fn get(&self, id: TableId) -> anyhow::Result<Option<QualifiedName>> {
        let tables = self.tables.read().map_err(|_| anyhow::anyhow!("catalog lock poisoned"))?;
        Ok(tables.by_id.get(&id).cloned())
    }
}

impl Catalog for MemoryCatalog {
    fn resolve<'a>(&'a self, name: &'a str) -> BoxFuture<'a, anyhow::Result<Option<TableRef>>> {
        Box::pin(async move { self.find(name) })
    }

    fn lookup<'a>(&'a self, id: TableId) -> BoxFuture<'a, anyhow::Result<Option<QualifiedName>>> {
        Box::pin(async move { self.get(id) })
    }
}

/// Resolves tables of the connected Postgres database through `pg_class`.
/// The relation oid is the stable table id.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
    default_schema: String,
}

impl PgCatalog {
    pub fn new(pool: PgPool, default_schema: &str) -> Self {
        Self {
            pool,
            default_schema: default_schema.to_string(),
        }
    }

    async fn resolve_name(&self, name: &str) -> anyhow::Result<Option<TableRef>> {
        let Some(parsed) = TableName::parse(name) else {
            return Ok(None);
        };
        let schema = parsed
            .schema
            .clone()
            .unwrap_or_else(|| self.default_schema.clone());

        let row = sqlx::query_as::<_, (i64, String, String, String)>(
            r#"
            SELECT c.oid::int8, current_database()::text, n.nspname::text, c.relname::text
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind IN ('r', 'p')
              AND n.nspname = $1
              AND c.relname = $2
            "#,
        )
        .bind(&schema)
        .bind(&parsed.table)
        .fetch_optional(&self.pool)
        .await?;

        let Some((oid, database, schema, table)) = row else {
            return Ok(None);
        };
        if parsed.database.as_deref().is_some_and(|d| d != database) {
            return Ok(None);
        }

        Ok(Some(TableRef {
            id: TableId(u32::try_from(oid)?),
            name: QualifiedName {
                database,
                schema,
                table,
            },
        }))
    }

    async fn lookup_id(&self, id: TableId) -> anyhow::Result<Option<QualifiedName>> {
        let row = sqlx::query_as::<_, (String, String, String)>(
            r#"
            SELECT current_database()::text, n.nspname::text, c.relname::text
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.oid = $1::int8::oid
            "#,
        )
        .bind(i64::from(id.0))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(database, schema, table)| QualifiedName {
            database,
            schema,
            table,
        }))
    }
}

impl Catalog for PgCatalog {
    fn resolve<'a>(&'a self, name: &'a str) -> BoxFuture<'a, anyhow::Result<Option<TableRef>>> {
        Box::pin(self.resolve_name(name))
    }

    fn lookup<'a>(&'a self, id: TableId) -> BoxFuture<'a, anyhow::Result<Option<QualifiedName>>> {
        Box::pin(self.lookup_id(id))
    }
}
