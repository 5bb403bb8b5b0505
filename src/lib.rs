//! Fast, isolated PostgreSQL databases for tests.
//!
//! A [`Migrator`] describes how to build a schema. The first request for a
//! given migrator creates and migrates a template database; every
//! [`new`] call then clones that template into a fresh database owned by the
//! test, which is dropped again when the [`TestDatabase`] goes away.

pub mod config;
pub mod constants;
pub mod db;
pub mod fixtures;
pub mod goose;
pub mod migrator;
pub mod migrators;
pub mod testdb;

pub use config::{Config, Role};
pub use migrator::{Migrator, NoopMigrator};
pub use testdb::{TestDatabase, new, with_test_db};
