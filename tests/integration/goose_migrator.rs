//! Test databases migrated by the goose migrator, from disk and from an
//! embedded tree.

use crate::helpers::harness::{FIXTURES, assert_example_schema, fixtures_dir, test_config};
use pgtestdb::fixtures::WorkingDirGuard;
use pgtestdb::migrators::GooseMigrator;

async fn run_from_disk(migrations_dir: &str) {
    let migrator = GooseMigrator::new(migrations_dir);
    let db = pgtestdb::new(&test_config(), &migrator)
        .await
        .unwrap_or_else(|e| panic!("Failed to create test database from {}: {:#}", migrations_dir, e));

    assert_example_schema(db.pool(), "goose_db_version").await;
}

/// Both working directory cases share one test, so nothing else observes
/// the directory change
#[tokio::test]
async fn test_goose_migrator_from_disk() {
    {
        let _cwd = WorkingDirGuard::change_to(fixtures_dir()).unwrap();
        run_from_disk("migrations").await;
    }

    {
        let _cwd = WorkingDirGuard::change_to(fixtures_dir().join("migrations")).unwrap();
        run_from_disk("../migrations").await;
    }
}

#[tokio::test]
async fn test_goose_migrator_from_fs() {
    let migrator = GooseMigrator::new("migrations")
        .with_fs(&FIXTURES)
        .with_table_name("goose_example_migrations");

    let db = pgtestdb::new(&test_config(), &migrator).await.unwrap();

    assert_example_schema(db.pool(), "goose_example_migrations").await;
}

#[tokio::test]
async fn test_disk_and_embedded_sources_share_a_template() {
    let from_disk = GooseMigrator::new(fixtures_dir().join("migrations"));
    let embedded = GooseMigrator::new("migrations").with_fs(&FIXTURES);

    let config = test_config();
    let a = pgtestdb::new(&config, &from_disk).await.unwrap();
    let b = pgtestdb::new(&config, &embedded).await.unwrap();

    assert_eq!(a.template(), b.template());
    assert_ne!(a.name(), b.name());
    assert_example_schema(a.pool(), "goose_db_version").await;
    assert_example_schema(b.pool(), "goose_db_version").await;
}

#[tokio::test]
async fn test_concurrent_instances_are_isolated() {
    let migrator = GooseMigrator::new(fixtures_dir().join("migrations"));
    let config = test_config();

    let (a, b) = tokio::join!(
        pgtestdb::new(&config, &migrator),
        pgtestdb::new(&config, &migrator)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    sqlx::query("INSERT INTO users (email) VALUES ('ada@example.com')")
        .execute(a.pool())
        .await
        .unwrap();

    let in_a: i64 = sqlx::query_scalar("SELECT count(*) FROM users")
        .fetch_one(a.pool())
        .await
        .unwrap();
    let in_b: i64 = sqlx::query_scalar("SELECT count(*) FROM users")
        .fetch_one(b.pool())
        .await
        .unwrap();

    assert_eq!(in_a, 1);
    assert_eq!(in_b, 0);
}

#[tokio::test]
async fn test_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let migrator = GooseMigrator::new(dir.path().join("missing"));

    let err = pgtestdb::new(&test_config(), &migrator)
        .await
        .err()
        .expect("missing migrations directory should fail");
    assert!(format!("{:#}", err).contains("does not exist"));
}
