use crate::config::Config;
use crate::db::connection::connect_once;
use anyhow::{Context, Result};
use sqlx::{Connection, PgConnection};
use tracing::debug;

/// Session-level PostgreSQL advisory lock held on a dedicated connection
///
/// The lock belongs to the session, so dropping the guard (and with it the
/// connection) releases it server-side even when `release` is never reached.
pub struct AdvisoryLock {
    conn: PgConnection,
    name: String,
    key: i64,
}

impl AdvisoryLock {
    /// Block until the lock for `name` is held
    pub async fn acquire(config: &Config, name: &str) -> Result<Self> {
        let mut conn = connect_once(config).await?;
        let key = lock_key(name);

        debug!("Waiting for advisory lock {} ({})", name, key);
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(key)
            .execute(&mut conn)
            .await
            .with_context(|| format!("Failed to acquire advisory lock '{}'", name))?;
        debug!("Acquired advisory lock {}", name);

        Ok(Self {
            conn,
            name: name.to_string(),
            key,
        })
    }

    pub async fn release(mut self) -> Result<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut self.conn)
            .await
            .with_context(|| format!("Failed to release advisory lock '{}'", self.name))?;
        debug!("Released advisory lock {}", self.name);

        self.conn.close().await?;
        Ok(())
    }
}

/// Map a lock name onto the bigint key space of `pg_advisory_lock`
pub fn lock_key(name: &str) -> i64 {
    let digest = md5::compute(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.0[..8]);
    i64::from_be_bytes(bytes)
}
