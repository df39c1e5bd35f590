//! Adapters binding the engine ports to concrete databases.

pub mod sqlite;
