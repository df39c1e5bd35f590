//! SQLite connection setup.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection, SqliteConnection};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const MEMORY_URL: &str = "sqlite::memory:";

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Failed to create directory: {0}")]
    DirectoryCreationFailed(#[source] std::io::Error),
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] sqlx::Error),
}

/// Open a single connection. The controller runs every statement of a run on one session,
/// so there is no pool.
pub async fn open_connection(
    database_url: &str,
    busy_timeout: Duration,
) -> Result<SqliteConnection, ConnectionError> {
    ensure_database_directory(database_url)?;

    let mut connect_options = SqliteConnectOptions::from_str(database_url)
        .map_err(|_| ConnectionError::InvalidDatabaseUrl(database_url.to_string()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(busy_timeout);

    if !is_memory_url(database_url) {
        connect_options = connect_options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    connect_options
        .disable_statement_logging()
        .connect()
        .await
        .map_err(ConnectionError::ConnectionFailed)
}

pub async fn verify_connection(conn: &mut SqliteConnection) -> Result<(), ConnectionError> {
    conn.ping().await.map_err(ConnectionError::ConnectionFailed)
}

fn is_memory_url(database_url: &str) -> bool {
    let shared_memory = database_url
        .split_once('?')
        .is_some_and(|(_, query)| query.split('&').any(|kv| kv == "mode=memory"));
    shared_memory || database_url_path(database_url).map_or(true, |p| p == ":memory:")
}

fn database_url_path(database_url: &str) -> Option<&str> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    let path = path.split('?').next().unwrap_or(path);
    (!path.is_empty()).then_some(path)
}

fn ensure_database_directory(database_url: &str) -> Result<(), ConnectionError> {
    if is_memory_url(database_url) {
        return Ok(());
    }
    let Some(path) = database_url_path(database_url) else {
        return Ok(());
    };

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(ConnectionError::DirectoryCreationFailed)?;
        }
    }
    Ok(())
}
