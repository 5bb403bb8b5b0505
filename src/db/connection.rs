use crate::config::Config;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, PgPool};
use std::time::Duration;
use tracing::{debug, info};

/// Mask password in database URL for display
pub fn mask_url_password(url: &str) -> String {
    let Some((protocol, rest)) = url.split_once("://") else {
        return url.to_string();
    };

    // Check if there's user info (user:pass@host or user@host)
    if let Some(at_pos) = rest.rfind('@') {
        let user_info = &rest[..at_pos];
        let host_and_path = &rest[at_pos + 1..];

        if let Some((username, _)) = user_info.split_once(':') {
            return format!("{}://{}:***@{}", protocol, username, host_and_path);
        }
    }

    url.to_string()
}

/// Database connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum number of retries for database connections
    pub max_retries: u32,
    /// Delay between connection retries
    pub retry_delay: Duration,
    /// How long to wait for a pooled connection
    pub acquire_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(200),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Connect a pool with retry logic
///
/// Absorbs the short window where a freshly created database or a restarting
/// server refuses connections.
pub async fn connect_with_retry(config: &Config, retry: &ConnectionConfig) -> Result<PgPool> {
    let connect_options = config.connect_options()?;
    let mut last_error = None;

    for attempt in 0..=retry.max_retries {
        let result = PgPoolOptions::new()
            .acquire_timeout(retry.acquire_timeout)
            .connect_with(connect_options.clone())
            .await;

        match result {
            Ok(pool) => {
                if attempt > 0 {
                    info!(
                        "✅ Connected to {} (after {} retry{})",
                        config.database,
                        attempt,
                        if attempt == 1 { "" } else { "ies" }
                    );
                } else {
                    debug!("Connected to {}", config.database);
                }
                return Ok(pool);
            }
            Err(e) => {
                last_error = Some(e);
                if attempt < retry.max_retries {
                    if attempt == 0 {
                        info!("🔄 Database {} not ready, retrying...", config.database);
                    }
                    tokio::time::sleep(retry.retry_delay).await;
                }
            }
        }
    }

    Err(anyhow::anyhow!(
        "Failed to connect to database at {} after {} attempts: {}",
        config.masked_url(),
        retry.max_retries + 1,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

/// Open a single session, outside of any pool
///
/// Used where the session itself carries state, such as advisory locks.
pub async fn connect_once(config: &Config) -> Result<PgConnection> {
    PgConnection::connect_with(&config.connect_options()?)
        .await
        .with_context(|| format!("Failed to connect to {}", config.masked_url()))
}
