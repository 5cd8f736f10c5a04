//! Diagnostic reports submitted to a logging session.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Group used when a report names no group.
pub const DEFAULT_GROUP: &str = "Default";

/// Severity of a report, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Exception,
}

impl Level {
    /// All levels, least severe first.
    pub const ALL: [Level; 5] = [
        Level::Debug,
        Level::Info,
        Level::Warning,
        Level::Error,
        Level::Exception,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "Debug",
            Level::Info => "Info",
            Level::Warning => "Warning",
            Level::Error => "Error",
            Level::Exception => "Exception",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown log level: {0}")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warning" | "warn" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            "exception" => Ok(Level::Exception),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Captured exception: a type name, a message and the frames that led to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub type_name: String,
    pub message: String,
    pub frames: Vec<String>,
}

impl ExceptionInfo {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            frames: Vec::new(),
        }
    }

    /// Placeholder for exception-level reports that carried no details.
    pub fn unspecified() -> Self {
        Self::new("Unspecified", "no exception information was attached")
    }

    pub fn with_frames(mut self, frames: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.frames = frames.into_iter().map(Into::into).collect();
        self
    }

    /// Build from an error value; its `source()` chain becomes the frames.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut frames = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            frames.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            frames,
        }
    }
}

/// One diagnostic message.
///
/// Immutable once submitted; the session assigns it a sequence number and
/// write time when it is queued and flushed.
#[derive(Debug, Clone)]
pub struct Report {
    level: Level,
    group: String,
    message: String,
    owner: Option<String>,
    exception: Option<ExceptionInfo>,
    implicit: bool,
    stacktrace: Option<String>,
    logged_at: DateTime<Local>,
    created: Instant,
}

impl Report {
    /// Create a report, stamping it with the current time.
    ///
    /// A blank group name is routed to [`DEFAULT_GROUP`]. An exception-level
    /// report created this way gets [`ExceptionInfo::unspecified`].
    pub fn new(level: Level, group: impl Into<String>, message: impl Into<String>) -> Self {
        let group = group.into();
        let group = match group.trim() {
            "" => DEFAULT_GROUP.to_string(),
            trimmed if trimmed.len() == group.len() => group,
            trimmed => trimmed.to_string(),
        };
        Self {
            level,
            group,
            message: message.into(),
            owner: None,
            exception: (level == Level::Exception).then(ExceptionInfo::unspecified),
            implicit: false,
            stacktrace: None,
            logged_at: Local::now(),
            created: Instant::now(),
        }
    }

    pub fn debug(group: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Debug, group, message)
    }

    pub fn info(group: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Info, group, message)
    }

    pub fn warning(group: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Warning, group, message)
    }

    pub fn error(group: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Error, group, message)
    }

    /// An explicitly reported exception.
    pub fn exception(
        group: impl Into<String>,
        message: impl Into<String>,
        info: ExceptionInfo,
    ) -> Self {
        Self::new(Level::Exception, group, message).with_exception(info)
    }

    /// An exception caught by an [`ExceptionCapture`](crate::ExceptionCapture)
    /// rather than reported by the host.
    pub fn implicit_exception(
        group: impl Into<String>,
        message: impl Into<String>,
        info: ExceptionInfo,
    ) -> Self {
        let mut report = Self::exception(group, message, info);
        report.implicit = true;
        report
    }

    /// Attach exception details. This makes the report exception-level.
    pub fn with_exception(mut self, info: ExceptionInfo) -> Self {
        self.level = Level::Exception;
        self.exception = Some(info);
        self
    }

    /// Name the component that produced the report.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Capture the calling thread's stack into the report.
    pub fn with_stack(mut self) -> Self {
        self.stacktrace = Some(std::backtrace::Backtrace::force_capture().to_string());
        self
    }

    pub fn with_stacktrace(mut self, stacktrace: impl Into<String>) -> Self {
        self.stacktrace = Some(stacktrace.into());
        self
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn exception_info(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }

    pub fn stacktrace(&self) -> Option<&str> {
        self.stacktrace.as_deref()
    }

    /// Whether the exception was captured implicitly.
    pub fn is_implicit(&self) -> bool {
        self.implicit
    }

    /// Exception reports are never filtered by a group's minimum level.
    pub fn is_exception(&self) -> bool {
        self.level == Level::Exception
    }

    /// Wall-clock time the report was created.
    pub fn logged_at(&self) -> DateTime<Local> {
        self.logged_at
    }

    /// Monotonic creation time, used for session uptime.
    pub fn created(&self) -> Instant {
        self.created
    }
}

/// A report with the sequence number the session assigned to it.
#[derive(Debug, Clone)]
pub(crate) struct QueuedReport {
    pub number: u64,
    pub report: Report,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Exception);
        assert_eq!(Level::ALL.iter().max(), Some(&Level::Exception));
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("warn".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("Warning".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!(" ERROR ".parse::<Level>().unwrap(), Level::Error);
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn test_blank_group_uses_default() {
        assert_eq!(Report::info("", "hi").group(), DEFAULT_GROUP);
        assert_eq!(Report::info("  Net ", "hi").group(), "Net");
    }

    #[test]
    fn test_exception_level_always_has_info() {
        let report = Report::new(Level::Exception, "Core", "boom");
        let info = report.exception_info().unwrap();
        assert_eq!(info.type_name, "Unspecified");
        assert!(!report.is_implicit());
    }

    #[test]
    fn test_with_exception_promotes_level() {
        let report = Report::info("Core", "failed")
            .with_exception(ExceptionInfo::new("IoError", "denied"));
        assert_eq!(report.level(), Level::Exception);
        assert!(report.is_exception());
    }

    #[test]
    fn test_exception_from_error_chain() {
        #[derive(Debug, Error)]
        #[error("outer")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "inner"));
        let info = ExceptionInfo::from_error(&err);
        assert_eq!(info.message, "outer");
        assert!(info.type_name.ends_with("Outer"));
        assert_eq!(info.frames, vec!["caused by: inner".to_string()]);
    }

    #[test]
    fn test_implicit_exception() {
        let report = Report::implicit_exception("Core", "panic", ExceptionInfo::new("panic", "x"));
        assert!(report.is_implicit());
        assert_eq!(report.level(), Level::Exception);
    }
}
