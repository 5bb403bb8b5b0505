use crate::db::lock::lock_key;
use crate::db::quote_ident;
use anyhow::{Context, Result, anyhow};
use chrono::NaiveDateTime;
use sqlx::{PgConnection, PgPool};
use std::fmt;
use tracing::debug;

/// Possibly schema-qualified name of the goose version table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    /// Parse "table" or "schema.table"
    pub fn parse(value: &str) -> Result<Self> {
        let (schema, name) = match value.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, value),
        };

        if let Some(schema) = schema
            && !is_valid_sql_identifier(schema)
        {
            return Err(anyhow!(
                "Invalid schema name '{}' in version table '{}': must contain only letters, numbers, underscores, and dollar signs, starting with letter or underscore",
                schema,
                value
            ));
        }

        if !is_valid_sql_identifier(name) {
            return Err(anyhow!(
                "Invalid version table name '{}': must contain only letters, numbers, underscores, and dollar signs, starting with letter or underscore",
                value
            ));
        }

        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    /// Quoted form for use in SQL text
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

fn is_valid_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    (first.is_alphabetic() || first == '_') && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// A version recorded as applied
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AppliedVersion {
    pub version_id: i64,
    pub tstamp: Option<NaiveDateTime>,
}

/// The goose version table
#[derive(Debug, Clone)]
pub struct VersionTable {
    table: TableName,
}

impl VersionTable {
    pub fn new(table: TableName) -> Self {
        Self { table }
    }

    pub fn name(&self) -> &TableName {
        &self.table
    }

    /// Create the table with its initial version 0 row, if missing
    ///
    /// Concurrent callers serialize on a transaction-scoped advisory lock
    /// keyed on the table name, so only one of them creates the table.
    pub async fn ensure(&self, pool: &PgPool) -> Result<()> {
        let mut tx = pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(lock_key(&self.table.quoted()))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to lock version table {}", self.table))?;

        if self.exists(&mut *tx).await? {
            tx.commit().await?;
            return Ok(());
        }

        debug!("Creating version table {}", self.table);

        sqlx::query(&format!(
            r#"
            CREATE TABLE {} (
                id serial NOT NULL,
                version_id bigint NOT NULL,
                is_applied boolean NOT NULL,
                tstamp timestamp NULL DEFAULT now(),
                PRIMARY KEY (id)
            )
            "#,
            self.table.quoted()
        ))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to create version table {}", self.table))?;

        self.insert(&mut *tx, 0).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn exists(&self, conn: &mut PgConnection) -> Result<bool> {
        sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(self.table.quoted())
            .fetch_one(conn)
            .await
            .with_context(|| format!("Failed to look up version table {}", self.table))
    }

    /// Applied versions, ascending, excluding the initial version 0 row
    pub async fn applied(&self, pool: &PgPool) -> Result<Vec<AppliedVersion>> {
        sqlx::query_as::<_, AppliedVersion>(&format!(
            "SELECT version_id, max(tstamp) AS tstamp FROM {} \
             WHERE is_applied AND version_id > 0 \
             GROUP BY version_id ORDER BY version_id",
            self.table.quoted()
        ))
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to read applied versions from {}", self.table))
    }

    pub async fn insert(&self, conn: &mut PgConnection, version: i64) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (version_id, is_applied) VALUES ($1, true)",
            self.table.quoted()
        ))
        .bind(version)
        .execute(conn)
        .await
        .with_context(|| format!("Failed to record version {} in {}", version, self.table))?;
        Ok(())
    }

    pub async fn delete(&self, conn: &mut PgConnection, version: i64) -> Result<()> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE version_id = $1",
            self.table.quoted()
        ))
        .bind(version)
        .execute(conn)
        .await
        .with_context(|| format!("Failed to remove version {} from {}", version, self.table))?;
        Ok(())
    }
}
