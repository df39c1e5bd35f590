//! Common test utilities for integration tests
//!
//! Provides the in-memory engine fixture and argument-table helpers shared
//! across the integration test files.

use iterctl::{QueryEngine, SqliteEngine};

/// Open a fresh in-memory engine.
#[allow(dead_code)]
pub async fn memory_engine() -> SqliteEngine {
    SqliteEngine::open_in_memory()
        .await
        .expect("Failed to open in-memory engine")
}

/// Open an in-memory engine with a one-row `args` table holding `columns`.
///
/// `columns` is a select list such as `2.0 AS target, 10 AS max_iter`.
#[allow(dead_code)]
pub async fn engine_with_args(columns: &str) -> SqliteEngine {
    let engine = memory_engine().await;
    engine
        .execute(&format!("CREATE TABLE args AS SELECT {columns}"))
        .await
        .expect("Failed to create args table");
    engine
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
#[allow(dead_code)]
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Count rows of a relation.
#[allow(dead_code)]
pub async fn count_rows(engine: &SqliteEngine, relation: &str) -> i64 {
    engine
        .query(&format!("SELECT count(*) FROM {relation}"))
        .await
        .expect("count query failed")
        .scalar()
        .and_then(iterctl::Value::as_i64)
        .expect("count returned no integer")
}
