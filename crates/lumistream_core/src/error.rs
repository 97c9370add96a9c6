//! Error types for lumistream core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while tracking and reading streamer files.
///
/// All variants are fatal for the run. A data file that is referenced by an
/// index but absent on disk is not an error; it is reported through
/// [`crate::reader::OpenOutcome::EntryMissing`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The reader configuration or the run directory is unusable.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// A data file exists but could not be opened for reading.
    #[error("cannot open streamer file {}: {source}", path.display())]
    FileOpen {
        /// Path of the data file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The streamer file violates the record protocol.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// Checksum mismatch detected in a streamer record.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record.
        actual: u32,
    },

    /// A header cannot be merged into the schema registry.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the incompatibility.
        message: String,
    },

    /// An index file of the run could not be parsed.
    #[error("invalid index file {}: {message}", path.display())]
    IndexFormat {
        /// Path of the index file.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// The file tracker entered its error state.
    #[error("file tracker failed: {message}")]
    TrackerFailed {
        /// Reason recorded by the tracker.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a file open error.
    pub fn file_open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileOpen {
            path: path.into(),
            source,
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates an index format error.
    pub fn index_format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::IndexFormat {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a tracker failure error.
    pub fn tracker_failed(message: impl Into<String>) -> Self {
        Self::TrackerFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this error was raised while reading a streamer file's
    /// contents (as opposed to configuration or tracking problems).
    #[must_use]
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::ChecksumMismatch { .. } | Self::Schema { .. }
        )
    }
}
