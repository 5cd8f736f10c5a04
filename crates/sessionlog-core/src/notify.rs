//! Failure notification and session events.
//!
//! Write failures never reach the code that submitted a report. Each group
//! tracks a failure episode: the first failure after a successful write is
//! handed to the session's [`FailureNotifier`], further failures stay quiet
//! until a write succeeds again. Every failure (notified or not) is also
//! logged under the `sessionlog::fallback` tracing target and broadcast as a
//! [`SessionEvent`].

use std::fmt;
use std::path::PathBuf;

use tracing::warn;

/// Tracing target for diagnostics about the logging engine itself.
pub const FALLBACK_TARGET: &str = "sessionlog::fallback";

/// What went wrong, as seen by a notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    DirectoryCreateFailed,
    FileOpenFailed,
    WriteFailed,
    SizeLimitExceeded,
    SerializationFailed,
    InternalStateError,
    /// Queued reports were discarded because the group's backlog is full
    ReportsDropped,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::DirectoryCreateFailed => "directory_create_failed",
            FailureKind::FileOpenFailed => "file_open_failed",
            FailureKind::WriteFailed => "write_failed",
            FailureKind::SizeLimitExceeded => "size_limit_exceeded",
            FailureKind::SerializationFailed => "serialization_failed",
            FailureKind::InternalStateError => "internal_state_error",
            FailureKind::ReportsDropped => "reports_dropped",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives the first failure of each failure episode.
///
/// Called outside of any group lock, so implementations may submit reports
/// back into the session.
pub trait FailureNotifier: Send + Sync {
    fn notify(&self, group: &str, kind: FailureKind, detail: &str);
}

impl<F> FailureNotifier for F
where
    F: Fn(&str, FailureKind, &str) + Send + Sync,
{
    fn notify(&self, group: &str, kind: FailureKind, detail: &str) {
        self(group, kind, detail)
    }
}

/// Default notifier: a warning on the fallback target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl FailureNotifier for TracingNotifier {
    fn notify(&self, group: &str, kind: FailureKind, detail: &str) {
        warn!(target: FALLBACK_TARGET, group, %kind, detail, "Log group stopped writing");
    }
}

/// Events broadcast by a session. Subscribe with
/// [`Session::subscribe`](crate::Session::subscribe).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A group was created and its folder resolved
    GroupCreated { group: String, path: PathBuf },
    /// A batch was appended to the group's file
    Flushed {
        group: String,
        reports: usize,
        bytes: u64,
    },
    /// A group operation failed
    Failure {
        group: String,
        kind: FailureKind,
        detail: String,
        notified: bool,
    },
    /// A write succeeded after a failure episode
    Recovered { group: String },
    /// The group moved on to a new file
    Rotated {
        group: String,
        from: PathBuf,
        to: PathBuf,
    },
    /// Queued reports were discarded
    ReportsDropped { group: String, count: u64 },
}
