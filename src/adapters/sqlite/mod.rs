//! SQLite adapter for the engine ports.

pub mod connection;
pub mod engine;

pub use connection::{open_connection, verify_connection, ConnectionError, MEMORY_URL};
pub use engine::{Notice, SqliteEngine};
