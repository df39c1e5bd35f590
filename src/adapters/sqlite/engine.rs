//! SQLite implementation of the engine ports.
//!
//! One connection behind an async mutex. Settings resolve in two places: names listed
//! among the session variables (for example `client_min_messages`) live in-process,
//! everything else is a `PRAGMA`. An unknown pragma returns no row, which reads as an
//! absent setting.
//!
//! SQLite does not roll back pragma changes with a transaction, so setting changes made
//! between [`SqliteEngine::begin`] and [`SqliteEngine::rollback`] are journaled here and
//! undone on rollback.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqliteConnection, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::domain::errors::EngineQueryError;
use crate::domain::models::{default_session_settings, Config, Severity, Value};
use crate::domain::ports::{EngineSettings, NoticeSink, QueryEngine, RowSet};

use super::connection::{open_connection, ConnectionError, MEMORY_URL};

const SEVERITY_SETTING: &str = "client_min_messages";

/// A notice that passed the session's severity filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Session {
    variables: BTreeMap<String, String>,
    /// First pre-transaction value of every setting changed in the open transaction.
    journal: Option<Vec<(String, Option<String>)>>,
    notices: Vec<Notice>,
}

impl Session {
    fn record(&mut self, name: &str, previous: Option<String>) {
        if let Some(journal) = self.journal.as_mut() {
            if !journal.iter().any(|(n, _)| n == name) {
                journal.push((name.to_string(), previous));
            }
        }
    }

    fn minimum_severity(&self) -> Severity {
        self.variables
            .get(SEVERITY_SETTING)
            .and_then(|v| v.parse().ok())
            .unwrap_or(Severity::Notice)
    }
}

pub struct SqliteEngine {
    conn: Mutex<SqliteConnection>,
    session: Mutex<Session>,
}

impl std::fmt::Debug for SqliteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEngine").finish_non_exhaustive()
    }
}

impl SqliteEngine {
    pub fn new(conn: SqliteConnection) -> Self {
        Self {
            conn: Mutex::new(conn),
            session: Mutex::new(Session {
                variables: default_session_settings(),
                ..Session::default()
            }),
        }
    }

    pub async fn open(database_url: &str, busy_timeout: Duration) -> Result<Self, ConnectionError> {
        let conn = open_connection(database_url, busy_timeout).await?;
        info!(url = %database_url, "sqlite engine opened");
        Ok(Self::new(conn))
    }

    pub async fn open_in_memory() -> Result<Self, ConnectionError> {
        Self::open(MEMORY_URL, Duration::from_secs(5)).await
    }

    pub async fn from_config(config: &Config) -> Result<Self, ConnectionError> {
        let engine = Self::open(
            &config.database.url,
            Duration::from_secs(config.database.busy_timeout_secs),
        )
        .await?;
        Ok(engine.with_session_settings(config.session.clone()))
    }

    /// Replace the in-process session variables.
    pub fn with_session_settings(mut self, variables: BTreeMap<String, String>) -> Self {
        self.session.get_mut().variables = variables;
        self
    }

    pub async fn begin(&self) -> Result<(), EngineQueryError> {
        self.execute("BEGIN").await?;
        self.session.lock().await.journal = Some(Vec::new());
        Ok(())
    }

    pub async fn commit(&self) -> Result<(), EngineQueryError> {
        self.execute("COMMIT").await?;
        self.session.lock().await.journal = None;
        Ok(())
    }

    /// Roll back the open transaction and every setting changed inside it.
    pub async fn rollback(&self) -> Result<(), EngineQueryError> {
        let journal = self.session.lock().await.journal.take().unwrap_or_default();
        self.execute("ROLLBACK").await?;

        for (name, previous) in journal.into_iter().rev() {
            match previous {
                Some(value) => self.write_setting(&name, &value).await?,
                None => {
                    self.session.lock().await.variables.remove(&name);
                }
            }
        }
        debug!("transaction rolled back with its setting changes");
        Ok(())
    }

    /// Notices surfaced so far.
    pub async fn notices(&self) -> Vec<Notice> {
        self.session.lock().await.notices.clone()
    }

    pub async fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut self.session.lock().await.notices)
    }

    async fn write_setting(&self, name: &str, value: &str) -> Result<(), EngineQueryError> {
        {
            let mut session = self.session.lock().await;
            if let Some(slot) = session.variables.get_mut(name) {
                *slot = value.to_string();
                return Ok(());
            }
        }
        let sql = format!("PRAGMA {} = {}", pragma_name(name)?, pragma_value(value));
        self.execute(&sql).await?;
        Ok(())
    }
}

#[async_trait]
impl QueryEngine for SqliteEngine {
    async fn query(&self, sql: &str) -> Result<RowSet, EngineQueryError> {
        let mut conn = self.conn.lock().await;
        let rows = sqlx::query(sql)
            .persistent(false)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| EngineQueryError::new(sql, e))?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let values = rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineQueryError::new(sql, e))?;

        Ok(RowSet::new(columns, values))
    }

    async fn execute(&self, sql: &str) -> Result<u64, EngineQueryError> {
        let mut conn = self.conn.lock().await;
        let result = sqlx::query(sql)
            .persistent(false)
            .execute(&mut *conn)
            .await
            .map_err(|e| EngineQueryError::new(sql, e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl EngineSettings for SqliteEngine {
    async fn get_setting(&self, name: &str) -> Result<Option<String>, EngineQueryError> {
        if let Some(value) = self.session.lock().await.variables.get(name) {
            return Ok(Some(value.clone()));
        }
        let rows = self.query(&format!("PRAGMA {}", pragma_name(name)?)).await?;
        Ok(rows.scalar().and_then(Value::to_setting_string))
    }

    async fn set_setting(&self, name: &str, value: &str) -> Result<(), EngineQueryError> {
        let previous = self.get_setting(name).await?;
        self.write_setting(name, value).await?;
        self.session.lock().await.record(name, previous);
        debug!(setting = name, value, "setting changed");
        Ok(())
    }
}

#[async_trait]
impl NoticeSink for SqliteEngine {
    async fn notice(&self, severity: Severity, message: &str) -> Result<(), EngineQueryError> {
        let mut session = self.session.lock().await;
        if severity < session.minimum_severity() {
            return Ok(());
        }

        match severity {
            Severity::Debug | Severity::Log => debug!(%severity, "{message}"),
            Severity::Info | Severity::Notice => info!(%severity, "{message}"),
            Severity::Warning => warn!(%severity, "{message}"),
            Severity::Error => error!(%severity, "{message}"),
        }
        session.notices.push(Notice {
            severity,
            message: message.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }
}

fn decode_row(row: &SqliteRow) -> Result<Vec<Value>, sqlx::Error> {
    (0..row.len())
        .map(|idx| {
            let raw = row.try_get_raw(idx)?;
            if raw.is_null() {
                return Ok(Value::Null);
            }
            let kind = raw.type_info().name().to_string();
            Ok(match kind.as_str() {
                "INTEGER" | "BOOLEAN" => Value::Integer(row.try_get_unchecked(idx)?),
                "REAL" | "NUMERIC" => Value::Real(row.try_get_unchecked(idx)?),
                "BLOB" => Value::Blob(row.try_get_unchecked(idx)?),
                _ => Value::Text(row.try_get_unchecked(idx)?),
            })
        })
        .collect()
}

/// Pragma names are bare words; anything else is rejected before reaching SQL.
fn pragma_name(name: &str) -> Result<&str, EngineQueryError> {
    let valid = name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(EngineQueryError::new(
            format!("PRAGMA {name}"),
            format!("invalid setting name `{name}`"),
        ))
    }
}

fn pragma_value(value: &str) -> String {
    let bare = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
    if bare {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "''"))
    }
}
