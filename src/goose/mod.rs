//! A goose-compatible SQL migration engine for PostgreSQL.
//!
//! Reads `<version>_<name>.sql` files annotated with `-- +goose Up` /
//! `-- +goose Down` from a directory or an embedded tree, and records applied
//! versions in a goose version table (`goose_db_version` by default), so
//! databases migrated here stay compatible with the goose CLI.

pub mod provider;
pub mod source;
pub mod sql_parser;
pub mod version_table;

pub use provider::{
    Direction, MigrationResult, MigrationState, MigrationStatus, Provider, ProviderOptions,
};
pub use source::{Migration, MigrationSource, collect_migrations, parse_version};
pub use sql_parser::{ParsedSql, Statement, parse_sql};
pub use version_table::{TableName, VersionTable};
