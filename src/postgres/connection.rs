// ABOUTME: PostgreSQL connection setup with TLS, keepalives and retry
// ABOUTME: Turns driver errors into operator-facing messages

use crate::config::ConnectionSettings;
use crate::dialect::Driver;
use crate::error::SyncError;
use crate::utils;
use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio_postgres::{Client, Config};

/// Build a client configuration from discrete settings
///
/// TCP keepalives are always enabled so idle sessions survive load
/// balancers while a large table is being encoded.
///
/// The session runs in UTC. Exported `timestamptz` values are UTC instants
/// and are written back as zone-less literals, which the server reads in the
/// session time zone.
pub fn client_config(settings: &ConnectionSettings) -> Config {
    let mut config = Config::new();
    config
        .host(&settings.host)
        .port(settings.port_or_default(Driver::Postgres))
        .user(&settings.user)
        .dbname(&settings.database)
        .application_name("seren-snapshot")
        .options("-c TimeZone=UTC")
        .keepalives(true)
        .keepalives_idle(Duration::from_secs(60));
    if let Some(password) = &settings.password {
        config.password(password);
    }
    config
}

/// Map a connection failure to a message that tells the operator what to check
fn describe_connect_error(error_msg: &str) -> String {
    if error_msg.contains("password authentication failed") {
        "Authentication failed: Invalid username or password.\n\
         Please verify your database credentials."
            .to_string()
    } else if error_msg.contains("database") && error_msg.contains("does not exist") {
        format!(
            "Database does not exist: {}\n\
             Please create the database first or check the database name.",
            error_msg
        )
    } else if error_msg.contains("Connection refused") || error_msg.contains("could not connect")
    {
        format!(
            "Connection refused: Unable to reach database server.\n\
             Please check:\n\
             - The host and port are correct\n\
             - The database server is running\n\
             - Firewall rules allow connections\n\
             Error: {}",
            error_msg
        )
    } else if error_msg.contains("timeout") || error_msg.contains("timed out") {
        format!(
            "Connection timeout: Database server did not respond in time.\n\
             Error: {}",
            error_msg
        )
    } else if error_msg.contains("SSL") || error_msg.contains("TLS") {
        format!(
            "TLS/SSL error: Failed to establish secure connection.\n\
             Error: {}",
            error_msg
        )
    } else if error_msg.contains("no pg_hba.conf entry") {
        format!(
            "Access denied: No pg_hba.conf entry for host.\n\
             Contact your database administrator to update pg_hba.conf.\n\
             Error: {}",
            error_msg
        )
    } else {
        format!("Failed to connect to database: {}", error_msg)
    }
}

/// Connect to PostgreSQL with TLS support
///
/// The connection task is spawned onto the runtime; its errors are logged.
pub async fn connect(config: &Config) -> Result<Client> {
    let tls_connector = TlsConnector::builder()
        .danger_accept_invalid_certs(false)
        .build()
        .context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(tls_connector);

    let (client, connection) = config
        .connect(tls)
        .await
        .map_err(|e| anyhow::anyhow!(describe_connect_error(&e.to_string())))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    Ok(client)
}

/// Connect with automatic retry for transient failures
///
/// Retries up to 3 times with exponential backoff (1s, 2s, 4s).
/// Exhausted retries surface as [`SyncError::Connection`].
pub async fn connect_with_retry(settings: &ConnectionSettings) -> Result<Client> {
    let config = client_config(settings);
    utils::retry_with_backoff(|| connect(&config), 3, Duration::from_secs(1))
        .await
        .map_err(|e| {
            SyncError::Connection(format!(
                "PostgreSQL server {}:{} database '{}': {:#}",
                settings.host,
                settings.port_or_default(Driver::Postgres),
                settings.database,
                e
            ))
            .into()
        })
}
