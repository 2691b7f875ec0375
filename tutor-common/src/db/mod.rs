//! Database access layer
//!
//! SQLite schema initialization and queries for students, learning
//! history, and problem bank rows.

pub mod history;
pub mod init;
pub mod models;
pub mod students;

pub use init::{init_database, init_memory_database};
