//! SQLite backend for the annotation key-value transport.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime.

mod kv;
mod schema;

pub mod error;

pub use error::{Error, Result};
pub use kv::SqliteKv;

#[cfg(test)]
mod tests;
