//! Domain layer for the iteration controller
//!
//! Core models, error taxonomy and the engine ports.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{ControlError, ControlResult, EngineQueryError, StatementError, UsageError};
