//! Error types for the session logging engine

use std::path::PathBuf;

use thiserror::Error;

use crate::notify::FailureKind;

/// Failure of a single log group operation.
///
/// None of these ever reach the code that submitted a report. They are
/// routed to the session's failure notifier instead.
#[derive(Error, Debug)]
pub enum LogError {
    /// The group folder (or one of its parents) could not be created
    #[error("Could not create log directory {}: {source}", .path.display())]
    DirectoryCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The group's log file could not be opened or inspected
    #[error("Could not open log file {}: {source}", .path.display())]
    FileOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Appending a batch failed; the partial write was rolled back
    #[error("Write to {} failed: {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The batch would push the file past its configured maximum
    #[error(
        "Batch of {batch} bytes rejected for {}: {current} of {limit} bytes already used",
        .path.display()
    )]
    SizeLimitExceeded {
        path: PathBuf,
        current: u64,
        batch: u64,
        limit: u64,
    },

    /// A report could not be rendered as XML
    #[error("Report #{number} could not be serialized: {detail}")]
    SerializationFailed { number: u64, detail: String },

    /// An operation hit a writer in the wrong state (e.g. after close)
    #[error("Internal state error: {0}")]
    InternalStateError(String),
}

impl LogError {
    /// The notifier-facing classification of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            LogError::DirectoryCreateFailed { .. } => FailureKind::DirectoryCreateFailed,
            LogError::FileOpenFailed { .. } => FailureKind::FileOpenFailed,
            LogError::WriteFailed { .. } => FailureKind::WriteFailed,
            LogError::SizeLimitExceeded { .. } => FailureKind::SizeLimitExceeded,
            LogError::SerializationFailed { .. } => FailureKind::SerializationFailed,
            LogError::InternalStateError(_) => FailureKind::InternalStateError,
        }
    }

    pub(crate) fn serialization(number: u64, detail: impl std::fmt::Display) -> Self {
        LogError::SerializationFailed {
            number,
            detail: detail.to_string(),
        }
    }
}

/// Errors raised while starting a session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session directory could not be created under the logs root
    #[error("Could not create session directory {}: {source}", .path.display())]
    SessionDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Burst timers need a tokio runtime to run on
    #[error("Sessions must be opened from within a tokio runtime")]
    NoRuntime,
}

/// Returned by [`Session::submit`](crate::Session::submit).
///
/// Write failures are never reported here; this only covers submitting
/// into a session that can no longer accept reports.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The session has been shut down
    #[error("The logging session has been shut down")]
    Closed,
}

/// Errors loading or saving a [`SessionConfig`](crate::SessionConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or writing the config file failed
    #[error("Config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for a session config
    #[error("Config format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Errors reading a log file back.
#[derive(Error, Debug)]
pub enum ReadError {
    /// The file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The content is not a readable log document
    #[error("Malformed log file: {0}")]
    Malformed(#[from] quick_xml::DeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_projection() {
        let err = LogError::SizeLimitExceeded {
            path: PathBuf::from("Log.xml"),
            current: 950,
            batch: 80,
            limit: 1000,
        };
        assert_eq!(err.kind(), FailureKind::SizeLimitExceeded);
        assert!(err.to_string().contains("80 bytes"));

        let err = LogError::InternalStateError("closed".into());
        assert_eq!(err.kind(), FailureKind::InternalStateError);
    }

    #[test]
    fn test_io_errors_keep_source() {
        use std::error::Error as _;

        let err = LogError::WriteFailed {
            path: PathBuf::from("Log.xml"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("disk full"));
    }
}
