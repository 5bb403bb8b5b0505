//! Template and instance lifecycle

use crate::helpers::harness::{
    count_rows, database_exists, migrations_dir, test_config, write_migrations,
};
use pgtestdb::config::Config;
use pgtestdb::migrators::GooseMigrator;
use pgtestdb::testdb::cleanup::{DatabaseKind, list_databases};
use pgtestdb::{NoopMigrator, with_test_db};

#[tokio::test]
async fn test_instance_is_dropped_on_cleanup() {
    let config = test_config();
    let db = pgtestdb::new(&config, &NoopMigrator).await.unwrap();
    let name = db.name().to_string();

    assert!(name.starts_with("testdb_tpl_noop_inst_"));
    assert!(database_exists(&config, &name).await);

    db.cleanup().await.unwrap();
    assert!(!database_exists(&config, &name).await);
    // The template outlives its instances
    assert!(database_exists(&config, "testdb_tpl_noop").await);
}

#[tokio::test]
async fn test_instance_is_dropped_with_the_handle() {
    let config = test_config();
    let db = pgtestdb::new(&config, &NoopMigrator).await.unwrap();
    let name = db.name().to_string();

    drop(db);
    assert!(!database_exists(&config, &name).await);
}

#[tokio::test]
async fn test_instance_is_dropped_without_force_after_queries() {
    let config = Config {
        force_terminate_connections: false,
        ..test_config()
    };

    for _ in 0..3 {
        let db = pgtestdb::new(&config, &NoopMigrator).await.unwrap();
        let name = db.name().to_string();

        let one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(one, 1);

        drop(db);
        assert!(!database_exists(&config, &name).await, "{} was left behind", name);
    }
}

#[tokio::test]
async fn test_cleanup_without_force_drops_instance() {
    let config = Config {
        force_terminate_connections: false,
        ..test_config()
    };
    let db = pgtestdb::new(&config, &NoopMigrator).await.unwrap();
    let name = db.name().to_string();

    let application_name: String = sqlx::query_scalar("SELECT current_setting('application_name')")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(application_name, name);
    // The settings handed out to tests keep the configured options
    assert!(!db.config().options.contains("application_name"));

    db.cleanup().await.unwrap();
    assert!(!database_exists(&config, &name).await);
}

#[tokio::test]
async fn test_keep_leaves_database_in_place() {
    let config = test_config();
    let db = pgtestdb::new(&config, &NoopMigrator).await.unwrap();
    let name = db.name().to_string();

    let kept: Config = db.keep();
    assert_eq!(kept.database, name);
    assert!(database_exists(&config, &name).await);

    // Reconnect through the returned settings, then clean up by hand
    let pool = kept.connect().await.unwrap();
    let current: String = sqlx::query_scalar("SELECT current_database()")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(current, name);
    pool.close().await;

    let admin = config.connect().await.unwrap();
    pgtestdb::testdb::template::drop_database(&admin, &name, true)
        .await
        .unwrap();
    admin.close().await;
}

#[tokio::test]
async fn test_instances_connect_as_the_test_role() {
    let config = test_config();
    let role = config.test_role.clone().expect("test role enabled by default");

    with_test_db(&config, &NoopMigrator, async |db| {
        let user: String = sqlx::query_scalar("SELECT current_user")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(user, role.username);
        assert_eq!(db.config().user, role.username);

        let owner: String = sqlx::query_scalar(
            "SELECT pg_get_userbyid(datdba) FROM pg_database WHERE datname = current_database()",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(owner, role.username);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_without_test_role_uses_admin_user() {
    let config = Config {
        test_role: None,
        ..test_config()
    };

    with_test_db(&config, &NoopMigrator, async |db| {
        let user: String = sqlx::query_scalar("SELECT current_user")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(user, config.user);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_template_is_marked_and_listed() {
    let config = test_config();
    let migrator = GooseMigrator::new(migrations_dir());

    with_test_db(&config, &migrator, async |db| {
        let admin = config.connect().await.unwrap();
        let is_template: bool =
            sqlx::query_scalar("SELECT datistemplate FROM pg_database WHERE datname = $1")
                .bind(db.template())
                .fetch_one(&admin)
                .await
                .unwrap();
        admin.close().await;
        assert!(is_template);

        let databases = list_databases(&config).await.unwrap();
        let template = databases
            .iter()
            .find(|d| d.name == db.template())
            .expect("template listed");
        assert_eq!(template.kind, DatabaseKind::Template);

        let instance = databases
            .iter()
            .position(|d| d.name == db.name())
            .expect("instance listed");
        let first_template = databases
            .iter()
            .position(|d| d.kind == DatabaseKind::Template)
            .unwrap();
        assert!(instance < first_template);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_changed_migrations_get_a_new_template() {
    let dir = tempfile::tempdir().unwrap();
    write_migrations(
        dir.path(),
        &[("00001_things.sql", "-- +goose Up\nCREATE TABLE things (id int);\n")],
    );
    let config = test_config();

    let first = pgtestdb::new(&config, &GooseMigrator::new(dir.path()))
        .await
        .unwrap();

    write_migrations(
        dir.path(),
        &[(
            "00002_more_things.sql",
            "-- +goose Up\nCREATE TABLE more_things (id int);\n",
        )],
    );
    let second = pgtestdb::new(&config, &GooseMigrator::new(dir.path()))
        .await
        .unwrap();

    assert_ne!(first.template(), second.template());
    assert_eq!(count_rows(second.pool(), "more_things").await, 0);

    first.cleanup().await.unwrap();
    second.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_failed_migration_leaves_no_template() {
    let dir = tempfile::tempdir().unwrap();
    write_migrations(
        dir.path(),
        &[("00001_broken.sql", "-- +goose Up\nCREATE TABLE broken (id nosuchtype);\n")],
    );
    let config = test_config();
    let migrator = GooseMigrator::new(dir.path());

    let err = pgtestdb::new(&config, &migrator)
        .await
        .err()
        .expect("broken migration should fail");
    assert!(format!("{:#}", err).contains("nosuchtype"), "{:#}", err);

    let template = pgtestdb::testdb::template::template_name(
        &pgtestdb::Migrator::hash(&migrator).unwrap(),
    );
    assert!(!database_exists(&config, &template).await);
}
