//! Error types for arbordb
//!
//! Semantic command outcomes (failed preconditions, timeouts, no-ops) are
//! not errors: they are recorded as a [`ChangeStatus`](crate::ChangeStatus).
//! This enum covers everything else: malformed input, datastore trouble and
//! programming errors.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use thiserror::Error;

/// Result type alias for arbordb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for arbordb
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Malformed command or transaction
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// A concurrent writer raced for the same datastore entity
    ///
    /// Retryable: slot allocation retries the same revision.
    #[error("Datastore contention on {0}")]
    Contention(String),

    /// The datastore did not answer in time
    ///
    /// Retryable: the outcome of the write is unknown, so re-read and retry.
    #[error("Datastore timeout: {0}")]
    DatastoreTimeout(String),

    /// Unexpected datastore failure
    #[error("Datastore error: {0}")]
    Datastore(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Synthesized events broke the minimal or implied invariant
    ///
    /// Always a bug in event synthesis; never recovered.
    #[error("Event invariant violated: {0}")]
    EventInvariant(String),

    /// Configuration file could not be read or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid operation or state
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for contention and timeouts that slot allocation recovers from
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Contention(_) | Error::DatastoreTimeout(_))
    }

    /// Convenience constructor for internal errors
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
