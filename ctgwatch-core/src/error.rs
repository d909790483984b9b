//! Error types for the engine.

use ctgwatch_adapters::AdapterError;
use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed row does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The backend itself failed.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Broad classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller supplied data that can never be accepted.
    MalformedInput,
    /// A reference points at a record of another measurement or nowhere.
    Referential,
    NotFound,
    /// The request clashes with current state.
    Conflict,
    Storage,
    ExternalProcess,
}

impl ErrorKind {
    /// Whether the caller, rather than the system, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::MalformedInput
                | ErrorKind::Referential
                | ErrorKind::NotFound
                | ErrorKind::Conflict
        )
    }
}

/// Errors produced by the engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// More than one parameter of one event category.
    #[error("Multiple {0} in one event")]
    MultipleEvents(&'static str),

    /// Parameters of two mutually exclusive categories.
    #[error("{0} cannot coexist with {1}")]
    ConflictingEvents(&'static str, &'static str),

    #[error("Diagnosis contents overlap at {0}")]
    ContentsOverlap(chrono::DateTime<chrono::Utc>),

    #[error("Diagnosis contains no contents")]
    EmptyDiagnosis,

    #[error("Range ends before it starts: {from} - {until}")]
    InvalidRange {
        from: chrono::DateTime<chrono::Utc>,
        until: chrono::DateTime<chrono::Utc>,
    },

    /// Rejected device file.
    #[error("Invalid device file: {0}")]
    Decode(#[source] AdapterError),

    #[error("{0}")]
    Referential(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("External process error: {0}")]
    ExternalProcess(#[source] AdapterError),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::MultipleEvents(_)
            | CoreError::ConflictingEvents(..)
            | CoreError::ContentsOverlap(_)
            | CoreError::EmptyDiagnosis
            | CoreError::InvalidRange { .. }
            | CoreError::Decode(_) => ErrorKind::MalformedInput,
            CoreError::Referential(_) => ErrorKind::Referential,
            CoreError::NotFound(_) | CoreError::Storage(StoreError::NotFound(_)) => {
                ErrorKind::NotFound
            }
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::Storage(StoreError::Backend(_)) => ErrorKind::Storage,
            CoreError::ExternalProcess(_) => ErrorKind::ExternalProcess,
        }
    }
}

impl From<AdapterError> for CoreError {
    fn from(err: AdapterError) -> Self {
        if err.is_malformed_input() {
            CoreError::Decode(err)
        } else {
            CoreError::ExternalProcess(err)
        }
    }
}

/// Result alias for engine operations.
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
