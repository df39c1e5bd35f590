//! Domain models for the iteration controller.

pub mod config;
pub mod state;
pub mod value;

pub use config::{
    default_session_settings, Config, ControllerDefaults, DatabaseConfig, EngineProfile,
    LoggingConfig,
};
pub use state::{
    IterationPolicy, Lifecycle, SeedPolicy, StateColumn, StateRow, StateType, Strategy,
    ITERATION_COLUMN, STATE_COLUMN,
};
pub use value::{Severity, Value};
