//! Infrastructure layer module
//!
//! Configuration loading and logging setup for programs embedding the controller.

pub mod config;
pub mod logging;
