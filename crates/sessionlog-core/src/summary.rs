//! Markdown summary of a session directory.
//!
//! The summary is a view of the XML group files; it can be regenerated at
//! any time, also for a session that is still running.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use tracing::warn;

use crate::collect::group_log_files;
use crate::metadata::read_session_metadata;
use crate::reader::{read_log_file, LogRecord};
use crate::report::Level;

/// Counts per level.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LogStats {
    pub total: usize,
    pub debug: usize,
    pub info: usize,
    pub warning: usize,
    pub error: usize,
    pub exception: usize,
}

impl LogStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a LogRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total += 1;
            match record.level() {
                Some(Level::Debug) => stats.debug += 1,
                Some(Level::Info) => stats.info += 1,
                Some(Level::Warning) => stats.warning += 1,
                Some(Level::Error) => stats.error += 1,
                Some(Level::Exception) => stats.exception += 1,
                None => {}
            }
        }
        stats
    }
}

/// Options for summary generation.
#[derive(Debug, Clone)]
pub struct SummaryOptions {
    /// Include debug-level records
    pub include_debug: bool,

    /// Maximum records per group section (0 = unlimited)
    pub max_per_group: usize,

    /// Show full timestamps (vs time of day)
    pub full_timestamps: bool,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            include_debug: true,
            max_per_group: 0,
            full_timestamps: false,
        }
    }
}

/// Generate a Markdown summary of one session directory.
pub fn generate_summary(
    session_dir: impl AsRef<Path>,
    options: &SummaryOptions,
) -> std::io::Result<String> {
    let session_dir = session_dir.as_ref();

    let mut by_group: BTreeMap<String, Vec<LogRecord>> = BTreeMap::new();
    let mut unreadable = Vec::new();
    for file in group_log_files(session_dir)? {
        match read_log_file(&file) {
            Ok(records) => {
                for record in records {
                    if record.level() == Some(Level::Debug) && !options.include_debug {
                        continue;
                    }
                    by_group.entry(record.group.clone()).or_default().push(record);
                }
            }
            Err(e) => {
                warn!(?file, error = %e, "Could not read log file");
                unreadable.push(file);
            }
        }
    }

    let mut out = String::new();
    render(&mut out, session_dir, &by_group, &unreadable, options)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    Ok(out)
}

/// Generate the summary and write it to `output_path`.
pub fn write_summary(
    session_dir: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    options: &SummaryOptions,
) -> std::io::Result<()> {
    let summary = generate_summary(session_dir, options)?;
    std::fs::write(output_path, summary)
}

fn render(
    out: &mut String,
    session_dir: &Path,
    by_group: &BTreeMap<String, Vec<LogRecord>>,
    unreadable: &[std::path::PathBuf],
    options: &SummaryOptions,
) -> std::fmt::Result {
    writeln!(out, "# Session Log Summary")?;
    writeln!(out)?;

    if let Ok(meta) = read_session_metadata(session_dir) {
        writeln!(out, "**Session:** {} ({})", meta.session_id, meta.started_at)?;
        if let Some(ended) = &meta.ended_at {
            writeln!(out, "**Ended:** {ended}")?;
        }
        writeln!(out, "**Platform:** {}/{}, engine {}", meta.os, meta.arch, meta.version)?;
        if meta.rotations > 0 {
            writeln!(out, "**Rotations:** {}", meta.rotations)?;
        }
        writeln!(out)?;
    }

    if by_group.is_empty() {
        writeln!(out, "No log records found.")?;
        return Ok(());
    }

    let all: Vec<&LogRecord> = by_group.values().flatten().collect();
    let stats = LogStats::from_records(all.iter().copied());
    writeln!(
        out,
        "**Groups:** {}",
        by_group.keys().cloned().collect::<Vec<_>>().join(", ")
    )?;
    writeln!(out)?;

    writeln!(out, "## Statistics")?;
    writeln!(out)?;
    writeln!(out, "| Level | Count |")?;
    writeln!(out, "|-------|-------|")?;
    writeln!(out, "| Total | {} |", stats.total)?;
    writeln!(out, "| Exception | {} |", stats.exception)?;
    writeln!(out, "| Error | {} |", stats.error)?;
    writeln!(out, "| Warning | {} |", stats.warning)?;
    writeln!(out, "| Info | {} |", stats.info)?;
    if options.include_debug {
        writeln!(out, "| Debug | {} |", stats.debug)?;
    }
    writeln!(out)?;

    let severe: Vec<_> = all
        .iter()
        .filter(|r| matches!(r.level(), Some(Level::Error | Level::Exception)))
        .collect();
    if !severe.is_empty() {
        writeln!(out, "## Errors")?;
        writeln!(out)?;
        for record in severe {
            writeln!(out, "- **[{}]** #{} {}", record.group, record.number, record.message())?;
            if let Some(exception) = &record.exception {
                let implicit = if exception.implicit { " (implicit)" } else { "" };
                writeln!(
                    out,
                    "  - `{}`{}: {}",
                    exception.type_name,
                    implicit,
                    exception.message.as_deref().unwrap_or_default()
                )?;
            }
        }
        writeln!(out)?;
    }

    let warnings: Vec<_> = all
        .iter()
        .filter(|r| r.level() == Some(Level::Warning))
        .collect();
    if !warnings.is_empty() {
        writeln!(out, "## Warnings")?;
        writeln!(out)?;
        for record in warnings {
            writeln!(out, "- **[{}]** #{} {}", record.group, record.number, record.message())?;
        }
        writeln!(out)?;
    }

    writeln!(out, "---")?;
    writeln!(out)?;

    for (group, records) in by_group {
        let group_stats = LogStats::from_records(records);
        writeln!(out, "## Group: `{group}`")?;
        writeln!(out)?;
        writeln!(
            out,
            "Total: {} records ({} warning, {} error, {} exception)",
            group_stats.total, group_stats.warning, group_stats.error, group_stats.exception
        )?;
        writeln!(out)?;
        writeln!(out, "```log")?;

        let shown = match options.max_per_group {
            0 => records.len(),
            max => max.min(records.len()),
        };
        for record in &records[..shown] {
            let time = if options.full_timestamps {
                record.log_time.as_str()
            } else {
                record
                    .log_time
                    .split('T')
                    .nth(1)
                    .unwrap_or(&record.log_time)
            };
            writeln!(
                out,
                "{} {:9} #{} {}",
                time,
                record.level,
                record.number,
                record.message()
            )?;
        }
        if shown < records.len() {
            writeln!(out, "... ({} more records truncated)", records.len() - shown)?;
        }

        writeln!(out, "```")?;
        writeln!(out)?;
    }

    if !unreadable.is_empty() {
        writeln!(out, "## Unreadable files")?;
        writeln!(out)?;
        for file in unreadable {
            writeln!(out, "- `{}`", file.display())?;
        }
        writeln!(out)?;
    }

    Ok(())
}
