// src/error.rs

//! Error types for the Depot registry
//!
//! The variants mirror the status taxonomy exposed by the HTTP layer:
//! not-found, conflict, validation, rate limiting and backend failures.

use crate::storage::StorageError;
use thiserror::Error;

/// Errors produced by the catalog, ingestion and update services
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown package, version, file or update
    #[error("{0} not found")]
    NotFound(String),

    /// Identity already exists (unique constraint)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed input (bad platform, missing field, unsafe filename)
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Request lacks a valid credential
    #[error("Unauthorized")]
    Unauthorized,

    /// Client exceeded its download allowance
    #[error("Too many requests")]
    RateLimited,

    /// Upload exceeded the configured payload size
    #[error("Payload exceeds limit of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    /// Object store failure
    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),

    /// Catalog database failure
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else that should surface as a server error
    #[error("{0}")]
    Internal(String),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            // Keys are built from client-supplied names
            StorageError::InvalidKey(key) => Error::Validation(format!("invalid object key: {}", key)),
            other => Error::Storage(other),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        if is_unique_violation(&err) {
            return Error::Conflict(err.to_string());
        }
        Error::Database(err)
    }
}

/// Check whether a SQLite error is a UNIQUE / PRIMARY KEY violation
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

impl Error {
    /// Whether this error represents a server-side fault (5xx)
    pub fn is_server_error(&self) -> bool {
        match self {
            Error::Storage(e) => !e.is_not_found(),
            Error::Database(_) | Error::Io(_) | Error::Internal(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for Depot operations
pub type Result<T> = std::result::Result<T, Error>;
