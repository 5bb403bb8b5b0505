use crate::config::Config;
use crate::constants::DEFAULT_GOOSE_TABLE;
use crate::goose::{MigrationSource, Provider, ProviderOptions};
use crate::migrator::Migrator;
use crate::migrators::common::Hasher;
use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use include_dir::Dir;
use sqlx::PgPool;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// Migrates templates with goose-style SQL migrations
///
/// ```rust,no_run
/// use include_dir::{Dir, include_dir};
/// use pgtestdb::migrators::GooseMigrator;
///
/// static MIGRATIONS: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/tests/fixtures");
///
/// // Read from disk, relative to the working directory
/// let from_disk = GooseMigrator::new("tests/fixtures/migrations");
///
/// // Read from the binary, with a custom version table
/// let embedded = GooseMigrator::new("migrations")
///     .with_fs(&MIGRATIONS)
///     .with_table_name("goose_example_migrations");
/// ```
#[derive(Clone)]
pub struct GooseMigrator {
    migrations_dir: PathBuf,
    fs: Option<&'static Dir<'static>>,
    table_name: String,
    allow_missing: bool,
}

impl fmt::Debug for GooseMigrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GooseMigrator")
            .field("migrations_dir", &self.migrations_dir)
            .field("embedded", &self.fs.is_some())
            .field("table_name", &self.table_name)
            .field("allow_missing", &self.allow_missing)
            .finish()
    }
}

impl GooseMigrator {
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            fs: None,
            table_name: DEFAULT_GOOSE_TABLE.to_string(),
            allow_missing: false,
        }
    }

    /// Read migrations from an embedded tree instead of the filesystem
    pub fn with_fs(mut self, fs: &'static Dir<'static>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn with_allow_missing(mut self, allow_missing: bool) -> Self {
        self.allow_missing = allow_missing;
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn source(&self) -> MigrationSource {
        match self.fs {
            Some(root) => MigrationSource::embedded(root, self.migrations_dir.clone()),
            None => MigrationSource::directory(self.migrations_dir.clone()),
        }
    }

    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            table_name: self.table_name.clone(),
            allow_missing: self.allow_missing,
        }
    }
}

impl Migrator for GooseMigrator {
    fn hash(&self) -> Result<String> {
        let hash = Hasher::new()
            .field("table_name", &self.table_name)
            .source(&self.source())
            .context("Failed to hash goose migrations")?
            .finish();
        Ok(hash)
    }

    fn migrate<'a>(&'a self, pool: &'a PgPool, config: &'a Config) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            debug!(
                "Running goose migrations from {} on {}",
                self.source(),
                config.database
            );
            let provider = Provider::new(pool.clone(), &self.source(), self.provider_options())?;
            provider.up().await?;
            Ok(())
        })
    }
}
