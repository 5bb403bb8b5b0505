use crate::config::types::{Config, Role};
use crate::db::connection::{ConnectionConfig, connect_with_retry, mask_url_password};
use anyhow::{Result, anyhow, bail};
use itertools::Itertools;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::str::FromStr;

const SUPPORTED_DRIVERS: &[&str] = &["pgx", "postgres", "postgresql"];

impl Config {
    /// Build sqlx connect options for this configuration
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if !SUPPORTED_DRIVERS.contains(&self.driver_name.as_str()) {
            bail!(
                "Unsupported driver '{}': expected one of {}",
                self.driver_name,
                SUPPORTED_DRIVERS.join(", ")
            );
        }

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database);

        for (key, value) in parse_options(&self.options)? {
            options = match key {
                "sslmode" => options.ssl_mode(
                    PgSslMode::from_str(value)
                        .map_err(|e| anyhow!("Invalid sslmode '{}': {}", value, e))?,
                ),
                "application_name" => options.application_name(value),
                other => bail!(
                    "Unsupported connection option '{}' (supported: sslmode, application_name)",
                    other
                ),
            };
        }

        Ok(options)
    }

    /// Connection URL, including the password
    pub fn url(&self) -> String {
        let mut url = format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        );

        let params: Vec<String> = self
            .options
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }

        url
    }

    /// Connection URL safe for logs and error messages
    pub fn masked_url(&self) -> String {
        mask_url_password(&self.url())
    }

    /// Same server and credentials, different database
    pub fn with_database(&self, database: &str) -> Config {
        Config {
            database: database.to_string(),
            ..self.clone()
        }
    }

    /// Same server and database, connecting as `role`
    pub fn with_role(&self, role: &Role) -> Config {
        Config {
            user: role.username.clone(),
            password: role.password.clone(),
            ..self.clone()
        }
    }

    /// Same connection, reporting `name` as the session's application_name
    pub fn with_application_name(&self, name: &str) -> Config {
        Config {
            options: set_option(&self.options, "application_name", name),
            ..self.clone()
        }
    }

    /// Name of the role that owns templates and instances
    pub fn owner(&self) -> &str {
        self.test_role
            .as_ref()
            .map(|r| r.username.as_str())
            .unwrap_or(&self.user)
    }

    /// Connect a pool to this database, retrying transient failures
    pub async fn connect(&self) -> Result<PgPool> {
        connect_with_retry(self, &ConnectionConfig::default()).await
    }
}

/// Split libpq style `key=value key2=value2` options
pub fn parse_options(options: &str) -> Result<Vec<(&str, &str)>> {
    options
        .split_whitespace()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("Malformed connection option '{}': expected key=value", pair))?;
            if key.is_empty() {
                bail!("Malformed connection option '{}': empty key", pair);
            }
            Ok((key, value))
        })
        .collect()
}

/// Set `key` in a `key=value` option string, replacing any earlier value
pub fn set_option(options: &str, key: &str, value: &str) -> String {
    let prefix = format!("{}=", key);
    let entry = format!("{}{}", prefix, value);
    options
        .split_whitespace()
        .filter(|option| !option.starts_with(&prefix))
        .chain(std::iter::once(entry.as_str()))
        .join(" ")
}
