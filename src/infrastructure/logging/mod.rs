//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - JSON or pretty stdout output
//! - Rolling JSON log files through tracing-appender

pub mod logger;

pub use logger::LoggerImpl;
