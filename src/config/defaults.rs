use crate::config::types::*;
use crate::constants::{
    DEFAULT_GOOSE_TABLE, DEFAULT_MIGRATIONS_DIR, DEFAULT_ROLE_CAPABILITIES, DEFAULT_ROLE_PASSWORD,
    DEFAULT_ROLE_USERNAME,
};

// Settings derives Default

impl Default for Config {
    fn default() -> Self {
        Self {
            driver_name: "pgx".to_string(),
            host: "localhost".to_string(),
            port: 5433,
            user: "postgres".to_string(),
            password: "password".to_string(),
            database: "postgres".to_string(),
            options: "sslmode=disable".to_string(),
            test_role: Some(Role::default()),
            force_terminate_connections: true,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Self {
            username: DEFAULT_ROLE_USERNAME.to_string(),
            password: DEFAULT_ROLE_PASSWORD.to_string(),
            capabilities: DEFAULT_ROLE_CAPABILITIES.to_string(),
        }
    }
}

impl Default for GooseSettings {
    fn default() -> Self {
        Self {
            migrations_dir: DEFAULT_MIGRATIONS_DIR.to_string(),
            table_name: DEFAULT_GOOSE_TABLE.to_string(),
            allow_missing: false,
        }
    }
}
