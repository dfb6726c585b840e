//! Error types for faceattend
//!
//! Defines service-wide error types using thiserror for clear error
//! propagation. Domain outcomes of the recognition pipeline (re-entry,
//! unknown face, no active session, ...) are NOT errors; they are values of
//! [`crate::attendance::RecognizeOutcome`]. This enum covers input errors,
//! infrastructure errors, and fatal conditions.

use thiserror::Error;

/// Main error type for the faceattend service
#[derive(Error, Debug)]
pub enum Error {
    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading/parsing errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or undecodable image payload
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// External id does not match the configured pattern
    #[error("Invalid id format: {0}")]
    InvalidIdFormat(String),

    /// External id is already registered to a live student
    #[error("Duplicate student id: {0}")]
    DuplicateStudentId(String),

    /// Enrollment produced fewer usable embeddings than the configured minimum
    #[error("Insufficient quality: {kept} usable embeddings (minimum {min})")]
    InsufficientQuality { kept: usize, min: usize },

    /// Student is already enrolled in the course
    #[error("Enrollment conflict: {0}")]
    EnrollmentConflict(String),

    /// Embedding provider failure (inference backend down or broken)
    #[error("Embedding provider error: {0}")]
    Provider(String),

    /// Invalid request input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state for operation (e.g. transition on a terminal session)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for transient infrastructure errors that callers may retry once.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Provider(_))
    }
}

/// Convenience Result type using the faceattend Error
pub type Result<T> = std::result::Result<T, Error>;
