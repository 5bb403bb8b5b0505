use std::time::Duration;

// Template / instance database naming
pub const TEMPLATE_PREFIX: &str = "testdb_tpl_";
pub const INSTANCE_INFIX: &str = "_inst_";

// Default role used to own test databases
pub const DEFAULT_ROLE_USERNAME: &str = "pgtdbuser";
pub const DEFAULT_ROLE_PASSWORD: &str = "pgtdbpass";
pub const DEFAULT_ROLE_CAPABILITIES: &str = "NOSUPERUSER NOCREATEDB NOCREATEROLE";

// Advisory lock names
pub const ROLE_LOCK_NAME: &str = "pgtestdb-role";

// Goose conventions
pub const DEFAULT_GOOSE_TABLE: &str = "goose_db_version";
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";
pub const MIGRATION_FILE_PATTERN: &str = "*.sql";

// Configuration file name
pub const CONFIG_FILENAME: &str = "pgtestdb.yaml";

// Background cleanup of dropped test databases
pub const DROP_TIMEOUT: Duration = Duration::from_secs(10);
