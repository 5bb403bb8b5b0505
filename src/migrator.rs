use crate::config::Config;
use anyhow::Result;
use futures_util::future::BoxFuture;
use sqlx::PgPool;

/// Brings a freshly created template database up to the desired schema.
///
/// The hash identifies the schema a migrator produces: templates are named
/// after it, so two migrators with equal hashes share one template and any
/// change to the migrations yields a new one.
pub trait Migrator: Send + Sync {
    /// Stable fingerprint of everything that influences the resulting schema
    fn hash(&self) -> Result<String>;

    /// Migrate the template database behind `pool`
    ///
    /// `config` describes the same database, for migrators that need to open
    /// their own connections.
    fn migrate<'a>(&'a self, pool: &'a PgPool, config: &'a Config) -> BoxFuture<'a, Result<()>>;
}

/// Leaves the template empty
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMigrator;

impl Migrator for NoopMigrator {
    fn hash(&self) -> Result<String> {
        Ok("noop".to_string())
    }

    fn migrate<'a>(&'a self, _pool: &'a PgPool, _config: &'a Config) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
