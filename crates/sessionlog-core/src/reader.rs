//! Reading group log files back.
//!
//! Works on closed files and on files of a running (or crashed) session
//! that have no footer yet.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::ReadError;
use crate::format::LOG_FOOTER;
use crate::report::Level;

/// One `<Log>` element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "@Number")]
    pub number: u64,
    #[serde(rename = "@Level")]
    pub level: String,
    #[serde(rename = "@Group")]
    pub group: String,
    #[serde(rename = "@Owner", default)]
    pub owner: Option<String>,
    #[serde(rename = "@LogTime")]
    pub log_time: String,
    #[serde(rename = "@WriteTime")]
    pub write_time: String,
    /// Milliseconds since the session started
    #[serde(rename = "@Uptime")]
    pub uptime_ms: u64,
    #[serde(rename = "Message", default)]
    pub message: Option<String>,
    #[serde(rename = "Exception", default)]
    pub exception: Option<ExceptionRecord>,
    #[serde(rename = "Stacktrace", default)]
    pub stacktrace: Option<String>,
}

impl LogRecord {
    /// The record's level, if it names a known one.
    pub fn level(&self) -> Option<Level> {
        self.level.parse().ok()
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

/// The `<Exception>` child of a record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExceptionRecord {
    #[serde(rename = "@Type")]
    pub type_name: String,
    /// Captured by an exception hook rather than reported explicitly
    #[serde(rename = "@Implicit", default)]
    pub implicit: bool,
    #[serde(rename = "Message", default)]
    pub message: Option<String>,
    #[serde(rename = "Frame", default)]
    pub frames: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LogDocument {
    #[serde(rename = "Log", default)]
    records: Vec<LogRecord>,
}

/// Read every record of a group log file, in file order.
pub fn read_log_file(path: impl AsRef<Path>) -> Result<Vec<LogRecord>, ReadError> {
    let content = fs::read_to_string(path.as_ref())?;
    parse_log(&content)
}

/// Parse log file content, closing an unterminated document first.
///
/// If the last element was cut off mid-write, everything after the last
/// complete `</Log>` is ignored.
pub fn parse_log(content: &str) -> Result<Vec<LogRecord>, ReadError> {
    let footer = String::from_utf8_lossy(LOG_FOOTER);
    let trimmed = content.trim_end();
    if trimmed.ends_with(footer.as_ref()) {
        return Ok(quick_xml::de::from_str::<LogDocument>(trimmed)?.records);
    }

    let terminated = format!("{trimmed}{footer}");
    match quick_xml::de::from_str::<LogDocument>(&terminated) {
        Ok(doc) => Ok(doc.records),
        Err(err) => {
            let Some(end) = trimmed.rfind("</Log>") else {
                // Nothing but a header (or a partial first element).
                let header_only = trimmed.find("<LogFile>").map(|at| &trimmed[..at + "<LogFile>".len()]);
                return match header_only {
                    Some(header) => Ok(quick_xml::de::from_str::<LogDocument>(&format!("{header}{footer}"))?.records),
                    None => Err(err.into()),
                };
            };
            debug!(error = %err, "Log file ends mid-element, reading up to the last complete record");
            let complete = &trimmed[..end + "</Log>".len()];
            Ok(quick_xml::de::from_str::<LogDocument>(&format!("{complete}{footer}"))?.records)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{encode_report, BatchContext, LOG_HEADER};
    use crate::report::{ExceptionInfo, Report};
    use std::time::Instant;

    fn document(reports: &[Report], closed: bool) -> String {
        let ctx = BatchContext::new(Instant::now());
        let mut bytes = LOG_HEADER.to_vec();
        for (i, report) in reports.iter().enumerate() {
            bytes.extend(encode_report(i as u64 + 1, report, &ctx).unwrap());
        }
        if closed {
            bytes.extend_from_slice(LOG_FOOTER);
        }
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_reads_closed_file() {
        let xml = document(
            &[
                Report::warning("Net", "a < b && c").with_owner("pool"),
                Report::error("Net", "second"),
            ],
            true,
        );
        let records = parse_log(&xml).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].number, 1);
        assert_eq!(records[0].level(), Some(Level::Warning));
        assert_eq!(records[0].group, "Net");
        assert_eq!(records[0].owner.as_deref(), Some("pool"));
        assert_eq!(records[0].message(), "a < b && c");
        assert_eq!(records[1].level(), Some(Level::Error));
        assert!(records[1].owner.is_none());
    }

    #[test]
    fn test_reads_unterminated_file() {
        let xml = document(&[Report::warning("Net", "live")], false);
        let records = parse_log(&xml).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message(), "live");
    }

    #[test]
    fn test_ignores_truncated_tail() {
        let mut xml = document(&[Report::warning("Net", "whole")], false);
        xml.push_str("<Log Number=\"2\" Level=\"Warn");
        let records = parse_log(&xml).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_header_only() {
        let xml = String::from_utf8(LOG_HEADER.to_vec()).unwrap();
        assert!(parse_log(&xml).unwrap().is_empty());
    }

    #[test]
    fn test_exception_record() {
        let report = Report::implicit_exception(
            "Core",
            "unhandled",
            ExceptionInfo::new("panic", "oops").with_frames(["one", "two"]),
        );
        let records = parse_log(&document(&[report], true)).unwrap();

        let exception = records[0].exception.as_ref().unwrap();
        assert_eq!(exception.type_name, "panic");
        assert!(exception.implicit);
        assert_eq!(exception.message.as_deref(), Some("oops"));
        assert_eq!(exception.frames, vec!["one", "two"]);
    }

    #[test]
    fn test_dropped_marker_is_skipped() {
        let mut xml = document(&[], false);
        xml.push_str("<!--3 reports dropped-->");
        xml.push_str(&document(&[Report::warning("Net", "after")], false)[LOG_HEADER.len()..]);
        let records = parse_log(&xml).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message(), "after");
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(parse_log("definitely not xml").is_err());
    }
}
