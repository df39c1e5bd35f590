//! Port trait definitions (Hexagonal Architecture)
//!
//! The iteration controller treats the query engine as an opaque service reached
//! through three capabilities:
//! - QueryEngine: statements returning rows or affected-row counts
//! - EngineSettings: named engine-wide configuration values
//! - NoticeSink: diagnostic notices at a severity
//!
//! Adapters implement these; the controller and guards only see the traits.

pub mod engine;

pub use engine::{Engine, EngineSettings, NoticeSink, QueryEngine, RowSet};
