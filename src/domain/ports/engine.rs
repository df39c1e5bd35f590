//! Engine ports: the query, settings and notice capabilities the controller consumes.

use async_trait::async_trait;

use crate::domain::errors::EngineQueryError;
use crate::domain::models::{Severity, Value};

/// Rows returned by a query, with their column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row, if there is a first row.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    /// Value in `row` under the column named `column`.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

/// Request/response query capability.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Run a statement that returns rows.
    async fn query(&self, sql: &str) -> Result<RowSet, EngineQueryError>;

    /// Run a statement for its effect; returns the number of rows affected.
    async fn execute(&self, sql: &str) -> Result<u64, EngineQueryError>;
}

/// Engine-wide named configuration values.
#[async_trait]
pub trait EngineSettings: Send + Sync {
    /// Current value of `name`, or `None` when the engine has no such setting.
    async fn get_setting(&self, name: &str) -> Result<Option<String>, EngineQueryError>;

    async fn set_setting(&self, name: &str, value: &str) -> Result<(), EngineQueryError>;
}

/// Diagnostic messages surfaced to the caller.
#[async_trait]
pub trait NoticeSink: Send + Sync {
    async fn notice(&self, severity: Severity, message: &str) -> Result<(), EngineQueryError>;
}

/// Everything the controller needs from an engine.
pub trait Engine: QueryEngine + EngineSettings + NoticeSink {}

impl<T> Engine for T where T: QueryEngine + EngineSettings + NoticeSink + ?Sized {}
