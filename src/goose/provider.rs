use crate::constants::DEFAULT_GOOSE_TABLE;
use crate::db::error_context::SqlErrorContext;
use crate::goose::source::{Migration, MigrationSource, collect_migrations};
use crate::goose::sql_parser::{Statement, parse_sql};
use crate::goose::version_table::{TableName, VersionTable};
use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDateTime;
use itertools::Itertools;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOptions {
    pub table_name: String,
    /// Apply pending migrations older than the current version instead of failing
    pub allow_missing: bool,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_GOOSE_TABLE.to_string(),
            allow_missing: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Outcome of running a single migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResult {
    pub version: i64,
    pub name: String,
    pub direction: Direction,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "applied_at", rename_all = "snake_case")]
pub enum MigrationState {
    Applied(Option<NaiveDateTime>),
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: i64,
    pub name: String,
    #[serde(flatten)]
    pub state: MigrationState,
}

/// Runs goose migrations from a source against one database
pub struct Provider {
    pool: PgPool,
    table: VersionTable,
    migrations: Vec<Migration>,
    options: ProviderOptions,
}

impl Provider {
    /// Read and validate every migration in `source` up front
    pub fn new(pool: PgPool, source: &MigrationSource, options: ProviderOptions) -> Result<Self> {
        let table = VersionTable::new(TableName::parse(&options.table_name)?);
        let migrations = collect_migrations(source)
            .with_context(|| format!("Failed to load migrations from {}", source))?;

        debug!(
            "Loaded {} migration(s) from {} (version table {})",
            migrations.len(),
            source,
            table.name()
        );

        Ok(Self {
            pool,
            table,
            migrations,
            options,
        })
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Highest applied version, 0 when nothing has been applied
    pub async fn current_version(&self) -> Result<i64> {
        Ok(self.applied_versions().await?.last().copied().unwrap_or(0))
    }

    pub async fn status(&self) -> Result<Vec<MigrationStatus>> {
        self.table.ensure(&self.pool).await?;
        let applied: BTreeMap<i64, Option<NaiveDateTime>> = self
            .table
            .applied(&self.pool)
            .await?
            .into_iter()
            .map(|v| (v.version_id, v.tstamp))
            .collect();

        Ok(self
            .migrations
            .iter()
            .map(|m| MigrationStatus {
                version: m.version,
                name: m.name.clone(),
                state: match applied.get(&m.version) {
                    Some(tstamp) => MigrationState::Applied(*tstamp),
                    None => MigrationState::Pending,
                },
            })
            .collect())
    }

    /// Apply every pending migration
    pub async fn up(&self) -> Result<Vec<MigrationResult>> {
        self.up_to(i64::MAX).await
    }

    /// Apply pending migrations with a version up to and including `version`
    pub async fn up_to(&self, version: i64) -> Result<Vec<MigrationResult>> {
        let pending = self.pending(version).await?;
        let mut results = Vec::with_capacity(pending.len());

        for migration in &pending {
            results.push(self.run(migration, Direction::Up).await?);
        }

        if results.is_empty() {
            info!("No migrations to apply; database is up to date");
        } else {
            info!(
                "Successfully migrated database to version {}",
                self.current_version().await?
            );
        }

        Ok(results)
    }

    /// Apply the next pending migration
    pub async fn up_by_one(&self) -> Result<MigrationResult> {
        let pending = self.pending(i64::MAX).await?;
        let next = pending
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No pending migrations to apply"))?;

        self.run(&next, Direction::Up).await
    }

    /// Roll back the most recently applied migration
    pub async fn down(&self) -> Result<MigrationResult> {
        let current = self.current_version().await?;
        if current == 0 {
            bail!("No applied migrations to roll back");
        }

        let migration = self.find(current)?;
        self.run(migration, Direction::Down).await
    }

    /// Roll back the most recently applied migration and apply that same
    /// migration again, even when older ones are still pending
    pub async fn redo(&self) -> Result<Vec<MigrationResult>> {
        let down = self.down().await?;
        let migration = self.find(down.version)?;
        let up = self.run(migration, Direction::Up).await?;
        Ok(vec![down, up])
    }

    /// Roll back every applied migration newer than `version`
    pub async fn down_to(&self, version: i64) -> Result<Vec<MigrationResult>> {
        let applied = self.applied_versions().await?;
        let mut results = Vec::new();

        for applied_version in applied.into_iter().rev().filter(|v| *v > version) {
            let migration = self.find(applied_version)?;
            results.push(self.run(migration, Direction::Down).await?);
        }

        Ok(results)
    }

    async fn applied_versions(&self) -> Result<BTreeSet<i64>> {
        self.table.ensure(&self.pool).await?;
        Ok(self
            .table
            .applied(&self.pool)
            .await?
            .into_iter()
            .map(|v| v.version_id)
            .collect())
    }

    /// Unapplied migrations up to `target`, checking for out-of-order files
    async fn pending(&self, target: i64) -> Result<Vec<Migration>> {
        let applied = self.applied_versions().await?;
        let current = applied.last().copied().unwrap_or(0);

        let pending: Vec<Migration> = self
            .migrations
            .iter()
            .filter(|m| !applied.contains(&m.version) && m.version <= target)
            .cloned()
            .collect();

        let missing: Vec<&Migration> = pending.iter().filter(|m| m.version < current).collect();

        if !missing.is_empty() && !self.options.allow_missing {
            bail!(
                "Found {} missing migration(s) older than current version {}: {}\n\n\
                 💡 Renumber them after the current version, or allow out-of-order migrations",
                missing.len(),
                current,
                missing.iter().map(|m| m.name.as_str()).join(", ")
            );
        }

        Ok(pending)
    }

    fn find(&self, version: i64) -> Result<&Migration> {
        self.migrations
            .iter()
            .find(|m| m.version == version)
            .ok_or_else(|| {
                anyhow!(
                    "Version {} is recorded in {} but no migration file has that version",
                    version,
                    self.table.name()
                )
            })
    }

    async fn run(&self, migration: &Migration, direction: Direction) -> Result<MigrationResult> {
        let parsed = parse_sql(&migration.sql)
            .with_context(|| format!("Failed to parse migration {}", migration.name))?;
        let statements = match direction {
            Direction::Up => &parsed.up,
            Direction::Down => &parsed.down,
        };

        let start = Instant::now();

        if parsed.use_tx {
            let mut tx = self.pool.begin().await?;
            for statement in statements {
                execute_statement(&mut *tx, migration, statement).await?;
            }
            self.record(&mut *tx, migration.version, direction).await?;
            tx.commit().await.with_context(|| {
                format!("Failed to commit migration {} ({})", migration.name, direction)
            })?;
        } else {
            // One session, so SET and temp tables carry over between statements
            let mut conn = self.pool.acquire().await?;
            for statement in statements {
                execute_statement(&mut *conn, migration, statement).await?;
            }
            self.record(&mut *conn, migration.version, direction).await?;
        }

        let duration = start.elapsed();
        info!("OK   {} {} ({:.2?})", direction, migration.name, duration);

        Ok(MigrationResult {
            version: migration.version,
            name: migration.name.clone(),
            direction,
            duration,
        })
    }

    async fn record(
        &self,
        conn: &mut PgConnection,
        version: i64,
        direction: Direction,
    ) -> Result<()> {
        match direction {
            Direction::Up => self.table.insert(conn, version).await,
            Direction::Down => self.table.delete(conn, version).await,
        }
    }
}

async fn execute_statement(
    conn: &mut PgConnection,
    migration: &Migration,
    statement: &Statement,
) -> Result<()> {
    // No bind arguments, so this goes over the simple query protocol
    sqlx::Executor::execute(conn, statement.sql.as_str())
        .await
        .map_err(|e| {
            let ctx = SqlErrorContext::from_sqlx_error(&e, &statement.sql, statement.line);
            anyhow!("{}", ctx.format(&migration.name, &migration.sql))
        })?;
    Ok(())
}
