//! Error types for adapters.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when decoding device files or running the
/// external assessment executable.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The data-index field holds neither known format marker.
    #[error("Unrecognized TRC format marker: {0:#06x}")]
    UnrecognizedFormat(u32),

    /// No run of twelve 0xFF bytes after the patient block.
    #[error("TRC time marker not found")]
    MissingTimeMarker,

    /// A fixed-offset read ran past the end of the buffer.
    #[error("Truncated buffer: need {needed} bytes at offset {offset}, have {len}")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },

    /// The encoded start time does not name a valid instant.
    #[error("Invalid timestamp in TRC header")]
    InvalidTimestamp,

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding failed.
    #[cfg(feature = "assessment")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The executable exited unsuccessfully.
    #[error("Assessment process failed ({status}): {stderr}")]
    ProcessFailed { status: String, stderr: String },

    /// The executable did not finish in time.
    #[error("Assessment process timed out after {0:?}")]
    Timeout(Duration),

    /// The worker pool was shut down.
    #[error("Worker pool closed")]
    PoolClosed,
}

impl AdapterError {
    /// True for errors caused by the input bytes rather than the environment.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            AdapterError::UnrecognizedFormat(_)
                | AdapterError::MissingTimeMarker
                | AdapterError::Truncated { .. }
                | AdapterError::InvalidTimestamp
        )
    }
}
