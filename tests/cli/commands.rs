//! CLI commands
//!
//! Every invocation runs in a scratch directory so that a stray
//! `pgtestdb.yaml` or `.env` in the repository does not leak in.

use crate::helpers::harness::{migrations_dir, test_config};
use anyhow::Result;
use assert_cmd::Command;
use pgtestdb::config::Config;
use pgtestdb::migrators::GooseMigrator;
use pgtestdb::testdb::template::template_name;
use pgtestdb::{Migrator, NoopMigrator};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn pgtestdb_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pgtestdb").expect("pgtestdb binary is built");
    cmd.current_dir(dir.path()).env_remove("RUST_LOG");
    cmd
}

fn connection_args(config: &Config) -> Vec<String> {
    vec![
        "--host".to_string(),
        config.host.clone(),
        "--port".to_string(),
        config.port.to_string(),
        "--user".to_string(),
        config.user.clone(),
        "--password".to_string(),
        config.password.clone(),
        "--database".to_string(),
        config.database.clone(),
        "--options".to_string(),
        config.options.clone(),
    ]
}

#[test]
fn test_help_lists_commands() -> Result<()> {
    let dir = TempDir::new()?;

    pgtestdb_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("up-by-one")
                .and(predicate::str::contains("status"))
                .and(predicate::str::contains("hash"))
                .and(predicate::str::contains("clean")),
        );

    Ok(())
}

#[test]
fn test_hash_prints_template_name() -> Result<()> {
    let dir = TempDir::new()?;
    let expected = template_name(&GooseMigrator::new(migrations_dir()).hash()?);

    pgtestdb_cmd(&dir)
        .args(["hash", "--dir"])
        .arg(migrations_dir())
        .assert()
        .success()
        .stdout(format!("{}\n", expected));

    let with_table = template_name(
        &GooseMigrator::new(migrations_dir())
            .with_table_name("goose_example_migrations")
            .hash()?,
    );
    assert_ne!(expected, with_table);

    pgtestdb_cmd(&dir)
        .args(["hash", "--table", "goose_example_migrations", "--dir"])
        .arg(migrations_dir())
        .assert()
        .success()
        .stdout(format!("{}\n", with_table));

    Ok(())
}

#[test]
fn test_hash_reads_directory_relative_to_config_file() -> Result<()> {
    let dir = TempDir::new()?;
    let project = dir.path().join("project");
    fs::create_dir_all(project.join("db"))?;
    fs::write(
        project.join("pgtestdb.yaml"),
        format!("goose:\n  migrations_dir: {}\n", "db"),
    )?;
    fs::write(
        project.join("db").join("00001_init.sql"),
        "-- +goose Up\nCREATE TABLE init (id int);\n",
    )?;

    let expected = template_name(&GooseMigrator::new(project.join("db")).hash()?);

    pgtestdb_cmd(&dir)
        .args(["--config-file", "project/pgtestdb.yaml", "hash"])
        .assert()
        .success()
        .stdout(format!("{}\n", expected));

    Ok(())
}

#[test]
fn test_hash_missing_directory_fails() -> Result<()> {
    let dir = TempDir::new()?;

    pgtestdb_cmd(&dir)
        .args(["hash", "--dir", "does-not-exist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));

    Ok(())
}

#[tokio::test]
async fn test_up_version_status_down() -> Result<()> {
    let dir = TempDir::new()?;
    let db = pgtestdb::new(&test_config(), &NoopMigrator).await?;

    let mut args = connection_args(db.config());
    args.push("--dir".to_string());
    args.push(migrations_dir().display().to_string());

    pgtestdb_cmd(&dir)
        .arg("up")
        .args(&args)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("00001_users_and_cats.sql")
                .and(predicate::str::contains("00002_blog_posts.sql")),
        );

    pgtestdb_cmd(&dir)
        .arg("version")
        .args(&args)
        .assert()
        .success()
        .stdout("2\n");

    let output = pgtestdb_cmd(&dir)
        .args(["status", "--format", "json"])
        .args(&args)
        .output()?;
    assert!(output.status.success());
    let statuses: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(statuses.as_array().map(Vec::len), Some(2));
    assert_eq!(statuses[1]["state"], "applied");

    pgtestdb_cmd(&dir)
        .arg("down")
        .args(&args)
        .assert()
        .success()
        .stdout(predicate::str::contains("00002_blog_posts.sql"));

    pgtestdb_cmd(&dir)
        .arg("version")
        .args(&args)
        .assert()
        .success()
        .stdout("1\n");

    db.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_clean_dry_run_lists_databases() -> Result<()> {
    let dir = TempDir::new()?;
    let config = test_config();
    let db = pgtestdb::new(&config, &NoopMigrator).await?;

    pgtestdb_cmd(&dir)
        .args(["clean", "--dry-run"])
        .args(connection_args(&config))
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Would drop {}", db.name())));

    // Still there
    sqlx::query("SELECT 1").execute(db.pool()).await?;
    db.cleanup().await?;
    Ok(())
}
