// ABOUTME: Round-trip tests against real MySQL and PostgreSQL servers
// ABOUTME: Ignored by default; set TEST_MYSQL_URL or TEST_POSTGRES_URL and run with --ignored

use seren_snapshot::config::{ConnectionSettings, SyncConfig};
use seren_snapshot::dialect::{self, Dialect};
use seren_snapshot::engine::SyncEngine;
use seren_snapshot::storage::LocalStorage;
use seren_snapshot::table_name::TableName;
use std::env;
use tempfile::tempdir;

/// Helper to get test MySQL URL from environment
fn mysql_settings() -> Option<ConnectionSettings> {
    let url = env::var("TEST_MYSQL_URL").ok()?;
    let opts = mysql_async::Opts::from_url(&url).ok()?;
    Some(ConnectionSettings {
        driver: "mysql".into(),
        host: opts.ip_or_hostname().to_string(),
        port: Some(opts.tcp_port()),
        user: opts.user().unwrap_or("root").to_string(),
        password: opts.pass().map(str::to_string),
        database: opts.db_name()?.to_string(),
    })
}

/// Helper to get test PostgreSQL URL from environment
fn postgres_settings() -> Option<ConnectionSettings> {
    let url = env::var("TEST_POSTGRES_URL").ok()?;
    let config: tokio_postgres::Config = url.parse().ok()?;
    let host = match config.get_hosts().first() {
        Some(tokio_postgres::config::Host::Tcp(host)) => host.clone(),
        _ => "localhost".to_string(),
    };
    Some(ConnectionSettings {
        driver: "postgres".into(),
        host,
        port: config.get_ports().first().copied(),
        user: config.get_user().unwrap_or("postgres").to_string(),
        password: config
            .get_password()
            .map(|p| String::from_utf8_lossy(p).into_owned()),
        database: config.get_dbname()?.to_string(),
    })
}

async fn seed(dialect: &mut dyn Dialect, statements: &[&str]) -> anyhow::Result<()> {
    for sql in statements {
        dialect.execute(sql).await?;
    }
    Ok(())
}

async fn round_trip(settings: ConnectionSettings, setup: &[&str]) -> anyhow::Result<()> {
    let mut seeder = dialect::connect(&settings).await?;
    seed(seeder.as_mut(), setup).await?;

    let dir = tempdir()?;
    let storage = LocalStorage::new(dir.path());

    let mut config = SyncConfig::new(settings.clone());
    config.prefix = "it".into();
    config.chunk_size = 1;
    config.filter = seren_snapshot::filters::TableFilter::new(
        vec![TableName::new("snap_parent")?, TableName::new("snap_child")?],
        vec![],
        vec![],
        vec![],
    )?;

    let mut engine = SyncEngine::new(dialect::connect(&settings).await?, &storage, config.clone())
        .with_checkpoint_path(dir.path().join("export.json"));
    let exported = engine.export().await?;
    assert_eq!(
        exported.order,
        vec![TableName::new("snap_parent")?, TableName::new("snap_child")?]
    );
    assert_eq!(exported.total_rows(), 5);

    config.include_schema = false;
    config.truncate = true;
    let mut engine = SyncEngine::new(dialect::connect(&settings).await?, &storage, config)
        .with_checkpoint_path(dir.path().join("import.json"));
    let imported = engine.import().await?;
    for outcome in &imported.tables {
        assert_eq!(outcome.rows_after, Some(outcome.rows as u64));
    }

    let child = TableName::new("snap_child")?;
    assert_eq!(seeder.row_count(&child).await?, 3);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_mysql_export_import_round_trip() {
    let Some(settings) = mysql_settings() else {
        panic!("TEST_MYSQL_URL must be set to a URL with a database name");
    };
    round_trip(
        settings,
        &[
            "DROP TABLE IF EXISTS snap_child",
            "DROP TABLE IF EXISTS snap_parent",
            "CREATE TABLE snap_parent (id INT PRIMARY KEY, name VARCHAR(40), balance DECIMAL(10,2), avatar BLOB)",
            "CREATE TABLE snap_child (id INT PRIMARY KEY, parent_id INT, note TEXT, created_at DATETIME, \
             FOREIGN KEY (parent_id) REFERENCES snap_parent(id))",
            "INSERT INTO snap_parent VALUES (1, 'O''Hara', 10.50, X'00FF'), (2, 'plain', NULL, NULL)",
            "INSERT INTO snap_child VALUES (1, 1, 'a;b', '2024-01-02 03:04:05'), (2, 1, NULL, NULL), (3, 2, '{\"k\": 1}', NULL)",
        ],
    )
    .await
    .unwrap();
}

#[tokio::test]
#[ignore]
async fn test_postgres_export_import_round_trip() {
    let Some(settings) = postgres_settings() else {
        panic!("TEST_POSTGRES_URL must be set to a URL with a database name");
    };
    round_trip(
        settings,
        &[
            "DROP TABLE IF EXISTS snap_child",
            "DROP TABLE IF EXISTS snap_parent",
            "CREATE TABLE snap_parent (id serial PRIMARY KEY, name varchar(40), balance numeric(10,2), tags jsonb)",
            "CREATE TABLE snap_child (id int PRIMARY KEY, parent_id int REFERENCES snap_parent(id), note text, created_at timestamptz, flag boolean)",
            "INSERT INTO snap_parent (id, name, balance, tags) VALUES (1, 'O''Hara', 10.50, '{\"a\": [1, 2]}'), (2, 'plain', NULL, NULL)",
            "INSERT INTO snap_child VALUES (1, 1, 'a;b', '2024-01-02 03:04:05+00', true), (2, 1, NULL, NULL, false), (3, 2, 'x', NULL, NULL)",
        ],
    )
    .await
    .unwrap();
}
