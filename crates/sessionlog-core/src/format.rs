//! XML rendering of reports.
//!
//! A log file is a single XML document:
//!
//! ```text
//! <?xml version="1.0" encoding="utf-8"?><LogFile>
//! <Log Number="1" Level="Warning" Group="Net" LogTime=".." WriteTime=".." Uptime="12">
//!   <Message>connection slow</Message>
//! </Log>
//! ...
//! </LogFile>
//! ```
//!
//! (indented here for reading; files are written compact). The footer is
//! only present once the file has been closed. Elements are appended one
//! batch at a time; a batch is a concatenation of `<Log>` elements,
//! optionally preceded by a comment recording reports that were dropped
//! since the previous successful write.

use std::time::Instant;

use chrono::{DateTime, Local, SecondsFormat};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::LogError;
use crate::report::{QueuedReport, Report};

/// Written once when a log file is created.
pub const LOG_HEADER: &[u8] = br#"<?xml version="1.0" encoding="utf-8"?><LogFile>"#;

/// Written when a log file is closed.
pub const LOG_FOOTER: &[u8] = b"</LogFile>";

/// Timing shared by every report in a batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchContext {
    pub session_start: Instant,
    pub write_time: DateTime<Local>,
}

impl BatchContext {
    /// Context for a batch written now.
    pub fn new(session_start: Instant) -> Self {
        Self {
            session_start,
            write_time: Local::now(),
        }
    }
}

/// Size of one report inside an encoded batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EncodedEntry {
    pub number: u64,
    pub len: u64,
}

#[derive(Debug, Default)]
pub(crate) struct EncodedBatch {
    pub bytes: Vec<u8>,
    pub entries: Vec<EncodedEntry>,
    pub rejected: Vec<(u64, LogError)>,
}

impl EncodedBatch {
    /// Bytes taken by the dropped-reports marker at the start of the batch.
    pub fn marker_len(&self) -> u64 {
        let entries: u64 = self.entries.iter().map(|entry| entry.len).sum();
        self.bytes.len() as u64 - entries
    }
}

/// Encode queued reports into one appendable batch.
///
/// Reports that cannot be rendered end up in `rejected` and are left out of
/// `bytes`; the rest keep their order.
pub(crate) fn encode_batch(
    queue: impl IntoIterator<Item = impl std::borrow::Borrow<QueuedReport>>,
    dropped: u64,
    ctx: &BatchContext,
) -> EncodedBatch {
    let mut batch = EncodedBatch::default();
    if dropped > 0 {
        batch.bytes.extend_from_slice(dropped_marker(dropped).as_bytes());
    }
    for queued in queue {
        let queued = queued.borrow();
        match encode_report(queued.number, &queued.report, ctx) {
            Ok(bytes) => {
                batch.entries.push(EncodedEntry {
                    number: queued.number,
                    len: bytes.len() as u64,
                });
                batch.bytes.extend_from_slice(&bytes);
            }
            Err(err) => batch.rejected.push((queued.number, err)),
        }
    }
    batch
}

/// Comment recording reports discarded before this batch.
pub fn dropped_marker(count: u64) -> String {
    format!("<!--{count} reports dropped-->")
}

/// Render one report as a `<Log>` element.
pub fn encode_report(number: u64, report: &Report, ctx: &BatchContext) -> Result<Vec<u8>, LogError> {
    validate(number, report)?;

    let uptime_ms = report
        .created()
        .saturating_duration_since(ctx.session_start)
        .as_millis();
    let number_attr = number.to_string();
    let log_time = report
        .logged_at()
        .to_rfc3339_opts(SecondsFormat::Millis, false);
    let write_time = ctx.write_time.to_rfc3339_opts(SecondsFormat::Millis, false);
    let uptime = uptime_ms.to_string();

    let mut log = BytesStart::new("Log");
    log.push_attribute(("Number", number_attr.as_str()));
    log.push_attribute(("Level", report.level().as_str()));
    log.push_attribute(("Group", report.group()));
    if let Some(owner) = report.owner() {
        log.push_attribute(("Owner", owner));
    }
    log.push_attribute(("LogTime", log_time.as_str()));
    log.push_attribute(("WriteTime", write_time.as_str()));
    log.push_attribute(("Uptime", uptime.as_str()));

    let mut writer = Writer::new(Vec::new());

    writer.write_event(Event::Start(log)).map_err(xml_error(number))?;
    write_text_element(&mut writer, number, "Message", report.message())?;

    if let Some(info) = report.exception_info() {
        let mut exception = BytesStart::new("Exception");
        exception.push_attribute(("Type", info.type_name.as_str()));
        if report.is_implicit() {
            exception.push_attribute(("Implicit", "true"));
        }
        writer.write_event(Event::Start(exception)).map_err(xml_error(number))?;
        write_text_element(&mut writer, number, "Message", &info.message)?;
        for frame in &info.frames {
            write_text_element(&mut writer, number, "Frame", frame)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("Exception")))
            .map_err(xml_error(number))?;
    }

    if let Some(stack) = report.stacktrace() {
        write_text_element(&mut writer, number, "Stacktrace", stack)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("Log")))
        .map_err(xml_error(number))?;

    Ok(writer.into_inner())
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    number: u64,
    name: &str,
    text: &str,
) -> Result<(), LogError> {
    let text = normalize_newlines(text);
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_error(number))?;
    writer
        .write_event(Event::Text(BytesText::new(&text)))
        .map_err(xml_error(number))?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_error(number))?;
    Ok(())
}

fn xml_error<E: std::fmt::Display>(number: u64) -> impl FnOnce(E) -> LogError {
    move |e| LogError::serialization(number, e)
}

fn normalize_newlines(text: &str) -> std::borrow::Cow<'_, str> {
    if text.contains('\r') {
        text.replace("\r\n", "\n").into()
    } else {
        text.into()
    }
}

/// Characters allowed in an XML 1.0 document.
pub(crate) fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

fn validate(number: u64, report: &Report) -> Result<(), LogError> {
    let check = |field: &str, text: &str| match text.chars().position(|c| !is_xml_char(c)) {
        Some(at) => Err(LogError::serialization(
            number,
            format!("{field} contains a character XML cannot represent at offset {at}"),
        )),
        None => Ok(()),
    };

    check("group", report.group())?;
    check("message", report.message())?;
    if let Some(owner) = report.owner() {
        check("owner", owner)?;
    }
    if let Some(info) = report.exception_info() {
        check("exception type", &info.type_name)?;
        check("exception message", &info.message)?;
        for frame in &info.frames {
            check("exception frame", frame)?;
        }
    }
    if let Some(stack) = report.stacktrace() {
        check("stacktrace", stack)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ExceptionInfo;

    fn ctx() -> BatchContext {
        BatchContext::new(Instant::now())
    }

    fn encode(report: &Report) -> String {
        String::from_utf8(encode_report(7, report, &ctx()).unwrap()).unwrap()
    }

    #[test]
    fn test_report_element_attributes() {
        let xml = encode(&Report::warning("Net", "connection slow").with_owner("net::pool"));

        assert!(xml.starts_with("<Log Number=\"7\" Level=\"Warning\" Group=\"Net\" Owner=\"net::pool\""));
        assert!(xml.contains("LogTime=\""));
        assert!(xml.contains("WriteTime=\""));
        assert!(xml.contains("Uptime=\""));
        assert!(xml.contains("<Message>connection slow</Message>"));
        assert!(xml.ends_with("</Log>"));
    }

    #[test]
    fn test_output_is_compact() {
        let xml = encode(&Report::exception(
            "Core",
            "boom",
            ExceptionInfo::new("IoError", "denied").with_frames(["a", "b"]),
        ));
        assert!(!xml.contains('\n'));
        assert!(!xml.contains("> <"));
    }

    #[test]
    fn test_markup_is_escaped() {
        let xml = encode(&Report::warning("A&B", "if a < b && c > d"));
        assert!(xml.contains("Group=\"A&amp;B\""));
        assert!(xml.contains("a &lt; b &amp;&amp; c &gt; d"));
        assert!(!xml.contains("a < b"));
    }

    #[test]
    fn test_quotes_in_attributes_are_escaped() {
        let xml = encode(&Report::warning("Net", "x").with_owner("say \"hi\""));
        assert!(!xml.contains("say \"hi\""));
    }

    #[test]
    fn test_exception_and_stack_elements() {
        let report = Report::implicit_exception(
            "Core",
            "unhandled",
            ExceptionInfo::new("panic", "index out of bounds").with_frames(["main.rs:3"]),
        )
        .with_stacktrace("frame 0");
        let xml = encode(&report);

        assert!(xml.contains("Level=\"Exception\""));
        assert!(xml.contains("<Exception Type=\"panic\" Implicit=\"true\">"));
        assert!(xml.contains("<Message>index out of bounds</Message>"));
        assert!(xml.contains("<Frame>main.rs:3</Frame>"));
        assert!(xml.contains("<Stacktrace>frame 0</Stacktrace>"));
    }

    #[test]
    fn test_crlf_normalized() {
        let xml = encode(&Report::warning("Net", "line one\r\nline two"));
        assert!(xml.contains("<Message>line one\nline two</Message>"));
    }

    #[test]
    fn test_control_characters_rejected() {
        let report = Report::warning("Net", "bell \u{7} here");
        let err = encode_report(3, &report, &ctx()).unwrap_err();
        match err {
            LogError::SerializationFailed { number, detail } => {
                assert_eq!(number, 3);
                assert!(detail.contains("message"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_batch_skips_rejected_reports() {
        let queue = vec![
            QueuedReport { number: 1, report: Report::warning("Net", "one") },
            QueuedReport { number: 2, report: Report::warning("Net", "bad \u{0}") },
            QueuedReport { number: 3, report: Report::warning("Net", "three") },
        ];
        let batch = encode_batch(&queue, 0, &ctx());

        assert_eq!(batch.entries.iter().map(|e| e.number).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].0, 2);
        let total: u64 = batch.entries.iter().map(|e| e.len).sum();
        assert_eq!(total, batch.bytes.len() as u64);
    }

    #[test]
    fn test_dropped_marker_prefix() {
        let queue = vec![QueuedReport { number: 9, report: Report::warning("Net", "late") }];
        let batch = encode_batch(&queue, 4, &ctx());
        let xml = String::from_utf8(batch.bytes).unwrap();
        assert!(xml.starts_with("<!--4 reports dropped--><Log Number=\"9\""));
    }
}
