//! The goose provider against a real database

use crate::helpers::harness::{table_exists, test_config, write_migrations};
use pgtestdb::NoopMigrator;
use pgtestdb::goose::{Direction, MigrationSource, MigrationState, Provider, ProviderOptions};
use pgtestdb::with_test_db;

const USERS: (&str, &str) = (
    "00001_users.sql",
    "-- +goose Up\nCREATE TABLE users (id int);\n\n-- +goose Down\nDROP TABLE users;\n",
);
const CATS: (&str, &str) = (
    "00002_cats.sql",
    "-- +goose Up\nCREATE TABLE cats (id int);\n\n-- +goose Down\nDROP TABLE cats;\n",
);
const POSTS: (&str, &str) = (
    "00003_posts.sql",
    "-- +goose Up\nCREATE TABLE posts (id int);\n\n-- +goose Down\nDROP TABLE posts;\n",
);

fn provider_for(db: &pgtestdb::TestDatabase, dir: &std::path::Path) -> Provider {
    Provider::new(
        db.pool().clone(),
        &MigrationSource::directory(dir),
        ProviderOptions::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_up_down_and_status() {
    let dir = tempfile::tempdir().unwrap();
    write_migrations(dir.path(), &[USERS, CATS]);

    with_test_db(&test_config(), &NoopMigrator, async |db| {
        let provider = provider_for(db, dir.path());
        assert_eq!(provider.current_version().await.unwrap(), 0);

        let applied = provider.up().await.unwrap();
        assert_eq!(applied.iter().map(|r| r.version).collect::<Vec<_>>(), vec![1, 2]);
        assert!(applied.iter().all(|r| r.direction == Direction::Up));
        assert_eq!(provider.current_version().await.unwrap(), 2);
        assert!(table_exists(db.pool(), "cats").await);

        // Nothing left to do
        assert!(provider.up().await.unwrap().is_empty());

        let rolled_back = provider.down().await.unwrap();
        assert_eq!(rolled_back.version, 2);
        assert_eq!(rolled_back.direction, Direction::Down);
        assert!(!table_exists(db.pool(), "cats").await);

        let status = provider.status().await.unwrap();
        assert!(matches!(status[0].state, MigrationState::Applied(Some(_))));
        assert_eq!(status[1].state, MigrationState::Pending);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_up_to_and_down_to() {
    let dir = tempfile::tempdir().unwrap();
    write_migrations(dir.path(), &[USERS, CATS, POSTS]);

    with_test_db(&test_config(), &NoopMigrator, async |db| {
        let provider = provider_for(db, dir.path());

        provider.up_to(2).await.unwrap();
        assert_eq!(provider.current_version().await.unwrap(), 2);
        assert!(!table_exists(db.pool(), "posts").await);

        let next = provider.up_by_one().await.unwrap();
        assert_eq!(next.version, 3);
        assert!(provider.up_by_one().await.is_err());

        let rolled_back = provider.down_to(1).await.unwrap();
        assert_eq!(
            rolled_back.iter().map(|r| r.version).collect::<Vec<_>>(),
            vec![3, 2]
        );
        assert_eq!(provider.current_version().await.unwrap(), 1);

        provider.down_to(0).await.unwrap();
        assert_eq!(provider.current_version().await.unwrap(), 0);
        assert!(provider.down().await.is_err());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_missing_migrations_are_rejected_unless_allowed() {
    let dir = tempfile::tempdir().unwrap();
    write_migrations(dir.path(), &[USERS, POSTS]);

    with_test_db(&test_config(), &NoopMigrator, async |db| {
        provider_for(db, dir.path()).up().await.unwrap();

        // A migration numbered below the current version shows up later
        write_migrations(dir.path(), &[CATS]);

        let err = provider_for(db, dir.path()).up().await.unwrap_err();
        assert!(err.to_string().contains("00002_cats.sql"), "{}", err);

        let allowing = Provider::new(
            db.pool().clone(),
            &MigrationSource::directory(dir.path()),
            ProviderOptions {
                allow_missing: true,
                ..Default::default()
            },
        )
        .unwrap();
        let applied = allowing.up().await.unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].version, 2);
        assert!(table_exists(db.pool(), "cats").await);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_redo_reapplies_the_rolled_back_version() {
    let dir = tempfile::tempdir().unwrap();
    write_migrations(dir.path(), &[USERS, POSTS]);

    with_test_db(&test_config(), &NoopMigrator, async |db| {
        provider_for(db, dir.path()).up().await.unwrap();
        write_migrations(dir.path(), &[CATS]);

        let allowing = Provider::new(
            db.pool().clone(),
            &MigrationSource::directory(dir.path()),
            ProviderOptions {
                allow_missing: true,
                ..Default::default()
            },
        )
        .unwrap();

        // 00002_cats.sql is pending and older than the redone version
        let redone = allowing.redo().await.unwrap();
        assert_eq!(
            redone
                .iter()
                .map(|r| (r.version, r.direction))
                .collect::<Vec<_>>(),
            vec![(3, Direction::Down), (3, Direction::Up)]
        );
        assert!(table_exists(db.pool(), "posts").await);
        assert!(!table_exists(db.pool(), "cats").await);
        assert_eq!(allowing.current_version().await.unwrap(), 3);

        let status = allowing.status().await.unwrap();
        assert_eq!(status[1].version, 2);
        assert_eq!(status[1].state, MigrationState::Pending);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_no_transaction_migration() {
    let dir = tempfile::tempdir().unwrap();
    write_migrations(
        dir.path(),
        &[
            USERS,
            (
                "00002_index.sql",
                "-- +goose NO TRANSACTION\n-- +goose Up\nCREATE INDEX CONCURRENTLY users_id_idx ON users (id);\n\n-- +goose Down\nDROP INDEX CONCURRENTLY users_id_idx;\n",
            ),
        ],
    );

    with_test_db(&test_config(), &NoopMigrator, async |db| {
        let provider = provider_for(db, dir.path());
        provider.up().await.unwrap();
        assert!(table_exists(db.pool(), "users_id_idx").await);

        provider.down().await.unwrap();
        assert!(!table_exists(db.pool(), "users_id_idx").await);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_failed_migration_reports_location_and_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    write_migrations(
        dir.path(),
        &[
            USERS,
            (
                "00002_broken.sql",
                "-- +goose Up\nCREATE TABLE pets (id int);\n\nSELECT missing_column\nFROM users;\n",
            ),
        ],
    );

    with_test_db(&test_config(), &NoopMigrator, async |db| {
        let provider = provider_for(db, dir.path());
        let err = provider.up().await.unwrap_err().to_string();

        assert!(err.contains("00002_broken.sql"), "{}", err);
        assert!(err.contains("at line 4"), "{}", err);
        assert!(err.contains("SQLSTATE 42703"), "{}", err);

        assert_eq!(provider.current_version().await.unwrap(), 1);
        assert!(!table_exists(db.pool(), "pets").await);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_custom_version_table() {
    let dir = tempfile::tempdir().unwrap();
    write_migrations(dir.path(), &[USERS]);

    with_test_db(&test_config(), &NoopMigrator, async |db| {
        let provider = Provider::new(
            db.pool().clone(),
            &MigrationSource::directory(dir.path()),
            ProviderOptions {
                table_name: "migrations.history".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        sqlx::query("CREATE SCHEMA migrations")
            .execute(db.pool())
            .await
            .unwrap();
        provider.up().await.unwrap();

        assert!(table_exists(db.pool(), "migrations.history").await);
        assert!(!table_exists(db.pool(), "goose_db_version").await);

        let versions: Vec<i64> =
            sqlx::query_scalar("SELECT version_id FROM migrations.history ORDER BY id")
                .fetch_all(db.pool())
                .await
                .unwrap();
        assert_eq!(versions, vec![0, 1]);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_concurrent_first_use_creates_one_version_table() {
    let dir = tempfile::tempdir().unwrap();
    write_migrations(dir.path(), &[USERS]);

    with_test_db(&test_config(), &NoopMigrator, async |db| {
        let providers: Vec<Provider> = (0..4).map(|_| provider_for(db, dir.path())).collect();

        let versions =
            futures_util::future::join_all(providers.iter().map(|p| p.current_version())).await;
        for version in versions {
            assert_eq!(version.unwrap(), 0);
        }

        let initial_rows: i64 =
            sqlx::query_scalar("SELECT count(*) FROM goose_db_version WHERE version_id = 0")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(initial_rows, 1);
    })
    .await
    .unwrap();
}
