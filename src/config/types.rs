use clap::Args;
use serde::{Deserialize, Serialize};

/// Raw configuration input - all fields Optional for merging
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigInput {
    pub database: Option<DatabaseInput>,
    pub goose: Option<GooseInput>,
}

/// Resolved configuration with all defaults applied
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub database: Config,
    pub goose: GooseSettings,
}

// Database configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseInput {
    pub driver_name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub options: Option<String>,
    pub test_role: Option<RoleInput>,
    pub force_terminate_connections: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoleInput {
    /// Set to false to run everything as the admin user
    pub enabled: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub capabilities: Option<String>,
}

/// Connection parameters for the PostgreSQL server hosting test databases.
///
/// `database` names the admin database used to create templates and
/// instances. `options` uses libpq's `key=value` syntax separated by
/// whitespace, e.g. `sslmode=disable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub driver_name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub options: String,
    /// Role that owns every template and instance; `None` uses `user`
    pub test_role: Option<Role>,
    /// Terminate lingering connections when dropping a test database
    pub force_terminate_connections: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub username: String,
    pub password: String,
    pub capabilities: String,
}

// Goose configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GooseInput {
    pub migrations_dir: Option<String>,
    pub table_name: Option<String>,
    pub allow_missing: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GooseSettings {
    pub migrations_dir: String,
    pub table_name: String,
    pub allow_missing: bool,
}

// CLI argument groups for command-specific options
#[derive(Debug, Clone, Default, Args)]
pub struct DatabaseArgs {
    #[arg(long, help = "PostgreSQL host")]
    pub host: Option<String>,

    #[arg(long, help = "PostgreSQL port")]
    pub port: Option<u16>,

    #[arg(long, help = "Admin user")]
    pub user: Option<String>,

    #[arg(long, help = "Admin password")]
    pub password: Option<String>,

    #[arg(long, help = "Database to connect to")]
    pub database: Option<String>,

    #[arg(long, help = "Connection options, e.g. 'sslmode=disable'")]
    pub options: Option<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct GooseArgs {
    #[arg(long, help = "Directory containing goose SQL migrations")]
    pub dir: Option<String>,

    #[arg(long, help = "Name of the goose version table")]
    pub table: Option<String>,

    #[arg(long, help = "Apply migrations that are older than the current version")]
    pub allow_missing: bool,
}

// Conversion functions from CLI args to config input
impl From<DatabaseArgs> for DatabaseInput {
    fn from(args: DatabaseArgs) -> Self {
        Self {
            driver_name: None,
            host: args.host,
            port: args.port,
            user: args.user,
            password: args.password,
            database: args.database,
            options: args.options,
            test_role: None, // Role config comes from file only
            force_terminate_connections: None,
        }
    }
}

impl From<GooseArgs> for GooseInput {
    fn from(args: GooseArgs) -> Self {
        Self {
            migrations_dir: args.dir,
            table_name: args.table,
            allow_missing: if args.allow_missing { Some(true) } else { None },
        }
    }
}
