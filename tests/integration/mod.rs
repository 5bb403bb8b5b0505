/// Integration tests against a live PostgreSQL server
pub mod goose_migrator;
pub mod provider;
pub mod testdb;
