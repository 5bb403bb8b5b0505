//! Template databases: created and migrated once per migrator hash, then
//! cloned for every test.

use crate::config::{Config, Role};
use crate::constants::{INSTANCE_INFIX, ROLE_LOCK_NAME, TEMPLATE_PREFIX};
use crate::db::lock::AdvisoryLock;
use crate::db::{quote_ident, quote_literal};
use crate::migrator::Migrator;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// SQLSTATE raised when a database is still in use by other sessions
const OBJECT_IN_USE: &str = "55006";
const OBJECT_IN_USE_RETRIES: u32 = 10;
const OBJECT_IN_USE_DELAY: Duration = Duration::from_millis(100);

/// Roles and templates this process has already verified
static READY: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn is_ready(key: &str) -> bool {
    READY
        .lock()
        .map(|ready| ready.contains(key))
        .unwrap_or(false)
}

fn mark_ready(key: &str) {
    if let Ok(mut ready) = READY.lock() {
        ready.insert(key.to_string());
    }
}

/// Forget a template, e.g. after it was dropped
pub fn forget(key: &str) {
    if let Ok(mut ready) = READY.lock() {
        ready.remove(key);
    }
}

/// Turn a migrator hash into something safe to embed in a database name
pub fn normalize_hash(hash: &str) -> String {
    let is_simple = !hash.is_empty()
        && hash.len() <= 32
        && hash
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if is_simple {
        hash.to_string()
    } else {
        format!("{:x}", md5::compute(hash.as_bytes()))
    }
}

pub fn template_name(hash: &str) -> String {
    format!("{}{}", TEMPLATE_PREFIX, normalize_hash(hash))
}

pub fn instance_name(template: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}{}", template, INSTANCE_INFIX, &suffix[..8])
}

/// Create the test role if it does not exist yet
pub async fn ensure_role(admin_pool: &PgPool, admin: &Config, role: &Role) -> Result<()> {
    let key = format!("role:{}", role.username);
    if is_ready(&key) {
        return Ok(());
    }

    let lock = AdvisoryLock::acquire(admin, ROLE_LOCK_NAME).await?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = $1)")
        .bind(&role.username)
        .fetch_one(admin_pool)
        .await
        .context("Failed to look up test role")?;

    if !exists {
        info!("Creating test role {}", role.username);
        sqlx::query(&format!(
            "CREATE ROLE {} WITH LOGIN PASSWORD {} {}",
            quote_ident(&role.username),
            quote_literal(&role.password),
            role.capabilities
        ))
        .execute(admin_pool)
        .await
        .with_context(|| format!("Failed to create test role {}", role.username))?;
    }

    lock.release().await?;
    mark_ready(&key);
    Ok(())
}

/// Make sure a migrated template named `template` exists
///
/// Concurrent callers, in this process or others, serialize on an advisory
/// lock named after the template, so each template is migrated exactly once.
pub async fn ensure_template<M>(
    admin_pool: &PgPool,
    admin: &Config,
    migrator: &M,
    template: &str,
) -> Result<()>
where
    M: Migrator + ?Sized,
{
    if is_ready(template) {
        debug!("Template {} already verified", template);
        return Ok(());
    }

    let lock = AdvisoryLock::acquire(admin, template).await?;

    let is_template: Option<bool> =
        sqlx::query_scalar("SELECT datistemplate FROM pg_database WHERE datname = $1")
            .bind(template)
            .fetch_optional(admin_pool)
            .await
            .context("Failed to look up template database")?;

    match is_template {
        Some(true) => debug!("Reusing template {}", template),
        Some(false) => {
            warn!("Template {} was left half-built; recreating it", template);
            drop_database(admin_pool, template, true).await?;
            build_template(admin_pool, admin, migrator, template).await?;
        }
        None => build_template(admin_pool, admin, migrator, template).await?,
    }

    lock.release().await?;
    mark_ready(template);
    Ok(())
}

async fn build_template<M>(
    admin_pool: &PgPool,
    admin: &Config,
    migrator: &M,
    template: &str,
) -> Result<()>
where
    M: Migrator + ?Sized,
{
    info!("Creating template database {}", template);

    sqlx::query(&format!(
        "CREATE DATABASE {} OWNER {}",
        quote_ident(template),
        quote_ident(admin.owner())
    ))
    .execute(admin_pool)
    .await
    .with_context(|| format!("Failed to create template database {}", template))?;

    if let Err(e) = migrate_template(admin, migrator, template).await {
        if let Err(drop_err) = drop_database(admin_pool, template, true).await {
            warn!("Failed to drop broken template {}: {}", template, drop_err);
        }
        return Err(e);
    }

    sqlx::query(&format!(
        "ALTER DATABASE {} WITH IS_TEMPLATE true",
        quote_ident(template)
    ))
    .execute(admin_pool)
    .await
    .with_context(|| format!("Failed to mark {} as a template", template))?;

    Ok(())
}

async fn migrate_template<M>(admin: &Config, migrator: &M, template: &str) -> Result<()>
where
    M: Migrator + ?Sized,
{
    let mut template_config = admin.with_database(template);
    if let Some(role) = &admin.test_role {
        template_config = template_config.with_role(role);
    }

    let pool = template_config.connect().await?;
    let result = migrator.migrate(&pool, &template_config).await;
    // Cloning fails while any session is connected to the template
    pool.close().await;

    result.with_context(|| format!("Failed to migrate template database {}", template))
}

/// Clone `template` into a new database named `instance`
pub async fn create_instance(
    admin_pool: &PgPool,
    admin: &Config,
    template: &str,
    instance: &str,
) -> Result<()> {
    let sql = format!(
        "CREATE DATABASE {} WITH TEMPLATE {} OWNER {}",
        quote_ident(instance),
        quote_ident(template),
        quote_ident(admin.owner())
    );

    retry_while_in_use(|| sqlx::query(&sql).execute(admin_pool))
        .await
        .with_context(|| format!("Failed to create {} from template {}", instance, template))?;

    debug!("Created instance {} from {}", instance, template);
    Ok(())
}

/// Drop a database, terminating its sessions first when `force` is set
pub async fn drop_database(pool: &PgPool, name: &str, force: bool) -> Result<()> {
    let sql = if force {
        format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", quote_ident(name))
    } else {
        format!("DROP DATABASE IF EXISTS {}", quote_ident(name))
    };

    retry_while_in_use(|| sqlx::query(&sql).execute(pool))
        .await
        .with_context(|| format!("Failed to drop database {}", name))?;

    Ok(())
}

/// Retry `op` while PostgreSQL reports the source or target database in use
async fn retry_while_in_use<F, Fut, T>(mut op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if attempt < OBJECT_IN_USE_RETRIES && is_object_in_use(&e) => {
                attempt += 1;
                debug!("Database in use, retrying ({}/{})", attempt, OBJECT_IN_USE_RETRIES);
                tokio::time::sleep(OBJECT_IN_USE_DELAY).await;
            }
            result => return result,
        }
    }
}

fn is_object_in_use(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == OBJECT_IN_USE)
}
