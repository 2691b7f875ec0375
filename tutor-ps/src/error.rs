//! Error types for tutor-ps
//!
//! Module-specific error type using thiserror. Pipeline-terminal
//! failure reasons are the separate `ErrorKind` enum in tutor-common;
//! this type covers operational errors inside the service.

use thiserror::Error;
use tutor_common::events::ErrorKind;

/// Main error type for the problem service
#[derive(Error, Debug)]
pub enum Error {
    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Shared storage-layer errors
    #[error(transparent)]
    Common(#[from] tutor_common::Error),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A pipeline run is already in flight for the session
    #[error("Pipeline busy: session {0} already has an active run")]
    PipelineBusy(String),

    /// Generator backend call failed
    #[error("Generator error: {0}")]
    Generator(String),

    /// Missing prerequisite state (e.g. scaffold without a wrong answer)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Terminal pipeline reason for this error, where one applies
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Database(_) => Some(ErrorKind::StorageUnavailable),
            Error::Common(tutor_common::Error::Database(_)) => {
                Some(ErrorKind::StorageUnavailable)
            }
            Error::Generator(_) => Some(ErrorKind::GenerationFailure),
            Error::PipelineBusy(_) => Some(ErrorKind::PipelineBusy),
            _ => None,
        }
    }
}

/// Result type for tutor-ps operations
pub type Result<T> = std::result::Result<T, Error>;
