//! Isolated, pre-migrated PostgreSQL databases for tests.
//!
//! Every call to [`new`] returns a brand new database cloned from a template
//! that was migrated once per distinct migrator hash. Cloning a template is
//! far cheaper than running migrations, so each test can own its database.

pub mod cleanup;
pub mod template;

use crate::config::Config;
use crate::constants::DROP_TIMEOUT;
use crate::migrator::Migrator;
use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::{debug, info, warn};

/// A test database cloned from a migrated template
///
/// Dropped databases are removed from the server, unless the thread is
/// panicking: then the database is kept and its URL logged so a failing test
/// can be inspected.
pub struct TestDatabase {
    pool: Option<PgPool>,
    name: String,
    template: String,
    config: Config,
    admin: Config,
    released: bool,
}

impl TestDatabase {
    pub fn pool(&self) -> &PgPool {
        self.pool
            .as_ref()
            .expect("pool is only taken when the database is released")
    }

    /// Name of this instance database
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the template this instance was cloned from
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Connection settings for this instance
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn url(&self) -> String {
        self.config.url()
    }

    /// Close the pool and drop the database
    pub async fn cleanup(mut self) -> Result<()> {
        self.released = true;
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }

        drop_instance(&self.admin, &self.name).await
    }

    /// Keep the database after this handle is dropped, returning its settings
    pub fn keep(mut self) -> Config {
        self.released = true;
        info!("Keeping test database {}: {}", self.name, self.config.masked_url());
        self.config.clone()
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        if std::thread::panicking() {
            warn!(
                "Test failed; keeping database {} for inspection: {}",
                self.name,
                self.config.masked_url()
            );
            return;
        }

        // Released connections return to the pool on the test's runtime, which
        // is blocked below; their sessions are terminated by the drop instead
        drop(self.pool.take());
        let admin = self.admin.clone();
        let name = self.name.clone();

        // Block on cleanup so the database is gone before the test returns,
        // on a fresh runtime since the test's runtime may be shutting down
        let cleanup = std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    debug!("Failed to create runtime for cleanup: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                match tokio::time::timeout(DROP_TIMEOUT, drop_instance(&admin, &name)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Failed to drop test database {}: {:#}", name, e),
                    Err(_) => warn!("Timed out dropping test database {}", name),
                }
            });
        });

        let _ = cleanup.join();
    }
}

async fn drop_instance(admin: &Config, name: &str) -> Result<()> {
    let pool = admin.connect().await?;
    if !admin.force_terminate_connections {
        terminate_own_sessions(&pool, name).await;
    }
    let dropped = template::drop_database(&pool, name, admin.force_terminate_connections).await;
    pool.close().await;

    dropped.with_context(|| format!("Failed to drop test database {}", name))?;
    debug!("Dropped test database {}", name);
    Ok(())
}

/// End the sessions opened through this handle's pool
///
/// Only sessions tagged with the instance name as application_name are
/// touched; anything else connected to the database still blocks the drop.
async fn terminate_own_sessions(pool: &PgPool, name: &str) {
    let pids: Vec<i32> = match sqlx::query_scalar(
        "SELECT pid FROM pg_stat_activity \
         WHERE datname = $1 AND application_name = $1 AND pid <> pg_backend_pid()",
    )
    .bind(name)
    .fetch_all(pool)
    .await
    {
        Ok(pids) => pids,
        Err(e) => {
            debug!("Could not list pooled sessions on {}: {}", name, e);
            return;
        }
    };

    for pid in pids {
        if let Err(e) = sqlx::query("SELECT pg_terminate_backend($1)")
            .bind(pid)
            .execute(pool)
            .await
        {
            debug!("Could not terminate session {} on {}: {}", pid, name, e);
        }
    }
}

/// Create a fresh database migrated by `migrator`
///
/// ```rust,no_run
/// # async fn example() -> anyhow::Result<()> {
/// use pgtestdb::Config;
/// use pgtestdb::migrators::GooseMigrator;
///
/// let db = pgtestdb::new(&Config::default(), &GooseMigrator::new("migrations")).await?;
/// let users: i64 = sqlx::query_scalar("SELECT count(*) FROM users")
///     .fetch_one(db.pool())
///     .await?;
/// assert_eq!(users, 0);
/// # Ok(())
/// # }
/// ```
pub async fn new<M>(config: &Config, migrator: &M) -> Result<TestDatabase>
where
    M: Migrator + ?Sized,
{
    let hash = migrator.hash().context("Failed to compute migrator hash")?;
    let template_name = template::template_name(&hash);
    let instance_name = template::instance_name(&template_name);

    let admin_pool = config
        .connect()
        .await
        .context("Failed to connect to the admin database")?;

    let provisioned = provision(&admin_pool, config, migrator, &template_name, &instance_name).await;
    admin_pool.close().await;
    provisioned?;

    let mut instance_config = config.with_database(&instance_name);
    if let Some(role) = &config.test_role {
        instance_config = instance_config.with_role(role);
    }

    let pool = match instance_config
        .with_application_name(&instance_name)
        .connect()
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            if let Err(drop_err) = drop_instance(config, &instance_name).await {
                warn!("Failed to drop unreachable test database {}: {}", instance_name, drop_err);
            }
            return Err(e);
        }
    };

    debug!("Test database {} ready", instance_name);

    Ok(TestDatabase {
        pool: Some(pool),
        name: instance_name,
        template: template_name,
        config: instance_config,
        admin: config.clone(),
        released: false,
    })
}

async fn provision<M>(
    admin_pool: &PgPool,
    config: &Config,
    migrator: &M,
    template_name: &str,
    instance_name: &str,
) -> Result<()>
where
    M: Migrator + ?Sized,
{
    if let Some(role) = &config.test_role {
        template::ensure_role(admin_pool, config, role).await?;
    }
    template::ensure_template(admin_pool, config, migrator, template_name).await?;
    template::create_instance(admin_pool, config, template_name, instance_name).await
}

/// Run `test_fn` against a fresh database, dropping it afterwards
///
/// If `test_fn` panics the database is kept for inspection.
pub async fn with_test_db<M, F, R>(config: &Config, migrator: &M, test_fn: F) -> Result<R>
where
    M: Migrator + ?Sized,
    F: std::ops::AsyncFnOnce(&TestDatabase) -> R,
{
    let db = new(config, migrator).await?;
    let result = test_fn(&db).await;
    db.cleanup().await?;
    Ok(result)
}
