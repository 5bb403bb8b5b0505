use anyhow::Result;
use pgtestdb::config::{ConfigBuilder, ConfigInput, DatabaseInput, load_config};
use std::fs;
use tempfile::TempDir;

/// File < environment < CLI, with the environment stubbed out
#[test]
fn test_config_file_layering() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("pgtestdb.yaml");
    fs::write(
        &config_path,
        r#"database:
  host: db.internal
  port: 5432
  user: admin
  password: from-file
  test_role:
    enabled: false
goose:
  migrations_dir: db/migrations
  allow_missing: true
"#,
    )?;

    let (file_config, root_dir) = load_config(config_path.to_str().unwrap())?;
    assert_eq!(root_dir, temp_dir.path());

    let cli_config = ConfigInput {
        database: Some(DatabaseInput {
            password: Some("from-cli".to_string()),
            ..Default::default()
        }),
        goose: None,
    };

    let settings = ConfigBuilder::new()
        .with_file(file_config)
        .with_env_lookup(|key| match key {
            "PGPORT" => Some("6432".to_string()),
            "PGPASSWORD" => Some("from-env".to_string()),
            _ => None,
        })
        .with_cli_args(cli_config)
        .resolve()?;

    assert_eq!(settings.database.host, "db.internal");
    assert_eq!(settings.database.port, 6432);
    assert_eq!(settings.database.user, "admin");
    assert_eq!(settings.database.password, "from-cli");
    assert_eq!(settings.database.test_role, None);
    assert_eq!(settings.goose.migrations_dir, "db/migrations");
    assert_eq!(settings.goose.table_name, "goose_db_version");
    assert!(settings.goose.allow_missing);

    Ok(())
}

#[test]
fn test_invalid_yaml_is_reported() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("pgtestdb.yaml");
    fs::write(&config_path, "database: [unbalanced")?;

    let err = load_config(config_path.to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));

    Ok(())
}
