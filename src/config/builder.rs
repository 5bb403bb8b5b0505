use crate::config::database::set_option;
use crate::config::{merge::Merge, types::*};
use anyhow::{Context, Result, anyhow};

pub struct ConfigBuilder {
    config_input: ConfigInput,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config_input: ConfigInput::default(),
        }
    }

    pub fn with_file(mut self, file_input: ConfigInput) -> Self {
        self.config_input = self.config_input.merge(file_input);
        self
    }

    /// Layer the standard libpq environment variables on top of the file config
    pub fn with_env(self) -> Self {
        self.with_env_lookup(|key| std::env::var(key).ok())
    }

    /// Like `with_env`, reading variables through `lookup`
    ///
    /// `PGSSLMODE` and `PGAPPNAME` replace their key in the connection
    /// options. `PGOPTIONS` holds server settings (`-c name=value`) rather
    /// than connection options and is left to the server.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_options = [("PGSSLMODE", "sslmode"), ("PGAPPNAME", "application_name")]
            .into_iter()
            .filter_map(|(var, key)| lookup(var).map(|value| (key, value)))
            .fold(None, |options: Option<String>, (key, value)| {
                let base = options.unwrap_or_else(|| self.current_options());
                Some(set_option(&base, key, &value))
            });

        let env_input = ConfigInput {
            database: Some(DatabaseInput {
                host: lookup("PGHOST"),
                port: lookup("PGPORT").and_then(|p| p.parse().ok()),
                user: lookup("PGUSER"),
                password: lookup("PGPASSWORD"),
                database: lookup("PGDATABASE"),
                options: env_options,
                ..Default::default()
            }),
            goose: None,
        };
        self.config_input = self.config_input.merge(env_input);
        self
    }

    /// Options from the layers so far, falling back to the defaults
    fn current_options(&self) -> String {
        self.config_input
            .database
            .as_ref()
            .and_then(|d| d.options.clone())
            .unwrap_or_else(|| Settings::default().database.options)
    }

    pub fn with_cli_args(mut self, cli_input: ConfigInput) -> Self {
        self.config_input = self.config_input.merge(cli_input);
        self
    }

    pub fn resolve(self) -> Result<Settings> {
        let defaults = Settings::default();

        Ok(Settings {
            database: self.resolve_database(&defaults.database)?,
            goose: self.resolve_goose(&defaults.goose)?,
        })
    }

    fn resolve_database(&self, defaults: &Config) -> Result<Config> {
        let db_input = self.config_input.database.as_ref();

        let config = Config {
            driver_name: db_input
                .and_then(|d| d.driver_name.clone())
                .unwrap_or_else(|| defaults.driver_name.clone()),
            host: db_input
                .and_then(|d| d.host.clone())
                .unwrap_or_else(|| defaults.host.clone()),
            port: db_input.and_then(|d| d.port).unwrap_or(defaults.port),
            user: db_input
                .and_then(|d| d.user.clone())
                .unwrap_or_else(|| defaults.user.clone()),
            password: db_input
                .and_then(|d| d.password.clone())
                .unwrap_or_else(|| defaults.password.clone()),
            database: db_input
                .and_then(|d| d.database.clone())
                .unwrap_or_else(|| defaults.database.clone()),
            options: db_input
                .and_then(|d| d.options.clone())
                .unwrap_or_else(|| defaults.options.clone()),
            test_role: Self::resolve_role(
                db_input.and_then(|d| d.test_role.as_ref()),
                defaults.test_role.as_ref(),
            ),
            force_terminate_connections: db_input
                .and_then(|d| d.force_terminate_connections)
                .unwrap_or(defaults.force_terminate_connections),
        };

        // Surface bad driver names and options at load time rather than on first connect
        config
            .connect_options()
            .context("Invalid database configuration")?;

        Ok(config)
    }

    fn resolve_role(input: Option<&RoleInput>, default: Option<&Role>) -> Option<Role> {
        let Some(input) = input else {
            return default.cloned();
        };

        if input.enabled == Some(false) {
            return None;
        }

        let base = default.cloned().unwrap_or_default();
        Some(Role {
            username: input.username.clone().unwrap_or(base.username),
            password: input.password.clone().unwrap_or(base.password),
            capabilities: input.capabilities.clone().unwrap_or(base.capabilities),
        })
    }

    fn resolve_goose(&self, defaults: &GooseSettings) -> Result<GooseSettings> {
        let goose_input = self.config_input.goose.as_ref();

        let table_name = goose_input
            .and_then(|g| g.table_name.clone())
            .unwrap_or_else(|| defaults.table_name.clone());

        if table_name.trim().is_empty() {
            return Err(anyhow!("Goose table name cannot be empty"));
        }

        Ok(GooseSettings {
            migrations_dir: goose_input
                .and_then(|g| g.migrations_dir.clone())
                .unwrap_or_else(|| defaults.migrations_dir.clone()),
            table_name,
            allow_missing: goose_input
                .and_then(|g| g.allow_missing)
                .unwrap_or(defaults.allow_missing),
        })
    }
}
