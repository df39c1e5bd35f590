//! iterctl - iteration controller for in-database iterative algorithms
//!
//! An iterative algorithm (a solver, an optimizer, a fixpoint computation) keeps its
//! state inside the database. iterctl owns the per-iteration state log, advances the
//! iteration counter, evaluates convergence expressions against the arguments and the
//! current state, and scopes engine settings for the duration of an operation.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and the engine ports
//! - **Service Layer** (`services`): statement builder, setting guards, iteration controller
//! - **Adapters** (`adapters`): SQLite implementation of the engine ports
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//!
//! # Example
//!
//! ```ignore
//! use iterctl::{ControllerOptions, IterationController, SqliteEngine, StateType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = SqliteEngine::open_in_memory().await?;
//!     engine.execute("CREATE TABLE args AS SELECT 2.0 AS target").await?;
//!
//!     let options = ControllerOptions::new("args", "state", StateType::scalar("REAL"))?;
//!     let mut ctl = IterationController::new(&engine, options).await?;
//!     ctl.enter().await?;
//!     let summary = ctl
//!         .run_to_convergence(
//!             "abs(_state * _state - _args.target) < 1e-9",
//!             "coalesce((_state + _args.target / _state) / 2, 1.0)",
//!             50,
//!         )
//!         .await?;
//!     ctl.exit()?;
//!     println!("{summary:?}");
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use adapters::sqlite::{Notice, SqliteEngine};
pub use domain::errors::{ControlError, ControlResult, EngineQueryError, StatementError, UsageError};
pub use domain::models::{
    Config, EngineProfile, IterationPolicy, Lifecycle, SeedPolicy, Severity, StateColumn,
    StateRow, StateType, Strategy, Value,
};
pub use domain::ports::{Engine, EngineSettings, NoticeSink, QueryEngine, RowSet};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::logging::LoggerImpl;
pub use services::{
    with_setting, Bindings, ControllerOptions, EngineCapabilities, HashAggregationGuard,
    IterationController, LogSeverityGuard, OptimizerGuard, RunSummary, SettingGuard,
    SettingScope,
};
