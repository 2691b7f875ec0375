//! Shared error type for the storage layer
//!
//! Covers the failure surface tutor-common actually owns: SQLite
//! access, database file creation, and row-level validation. Service
//! crates wrap this in their own error enums.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Creating the database file or its parent directory failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A row lookup by id came up empty
    #[error("Not found: {0}")]
    NotFound(String),

    /// A write rejected before touching storage (bad name, grade out
    /// of range)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
