//! Removal of leftover templates and instances, e.g. databases kept by
//! failed tests.

use crate::config::Config;
use crate::constants::{INSTANCE_INFIX, TEMPLATE_PREFIX};
use crate::db::quote_ident;
use crate::testdb::template::{self, drop_database};
use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseKind {
    Template,
    Instance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedDatabase {
    pub name: String,
    pub kind: DatabaseKind,
}

impl ManagedDatabase {
    fn from_name(name: String) -> Self {
        let kind = if name.contains(INSTANCE_INFIX) {
            DatabaseKind::Instance
        } else {
            DatabaseKind::Template
        };
        Self { name, kind }
    }
}

/// Every database this library created on the server, instances first
pub async fn list_databases(config: &Config) -> Result<Vec<ManagedDatabase>> {
    let pool = config.connect().await?;
    let result = fetch_managed(&pool).await;
    pool.close().await;
    result
}

async fn fetch_managed(pool: &PgPool) -> Result<Vec<ManagedDatabase>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT datname FROM pg_database WHERE left(datname, length($1::text)) = $1::text ORDER BY datname",
    )
    .bind(TEMPLATE_PREFIX)
    .fetch_all(pool)
    .await
    .context("Failed to list test databases")?;

    let mut databases: Vec<ManagedDatabase> =
        names.into_iter().map(ManagedDatabase::from_name).collect();
    // Instances must go before the templates they were cloned from
    databases.sort_by_key(|db| db.kind == DatabaseKind::Template);
    Ok(databases)
}

/// Drop every managed database, returning what was (or would be) dropped
pub async fn drop_all(config: &Config, dry_run: bool) -> Result<Vec<ManagedDatabase>> {
    let pool = config.connect().await?;
    let databases = fetch_managed(&pool).await?;

    if dry_run {
        pool.close().await;
        return Ok(databases);
    }

    for db in &databases {
        if db.kind == DatabaseKind::Template {
            sqlx::query(&format!(
                "ALTER DATABASE {} WITH IS_TEMPLATE false",
                quote_ident(&db.name)
            ))
            .execute(&pool)
            .await
            .with_context(|| format!("Failed to unmark template {}", db.name))?;
        }

        drop_database(&pool, &db.name, config.force_terminate_connections).await?;
        if db.kind == DatabaseKind::Template {
            template::forget(&db.name);
        }
        info!("Dropped {}", db.name);
    }

    pool.close().await;
    Ok(databases)
}
