//! Locating session directories and the files worth attaching to a bug
//! report.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::warn;

use crate::metadata::{parse_session_dir_name, SESSION_METADATA_FILE};
use crate::router::GROUPS_DIR_NAME;
use crate::writer::LOG_FILE_NAME;

/// Default number of recent sessions [`collect_report_files`] looks at.
pub const DEFAULT_REPORT_SESSIONS: usize = 10;

/// Session directories under `root`, newest first.
///
/// Entries whose names do not follow the session naming convention are
/// skipped with a warning.
pub fn session_dirs(root: impl AsRef<Path>) -> std::io::Result<Vec<(NaiveDateTime, PathBuf)>> {
    let root = root.as_ref();
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut sessions = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        match name.to_str().and_then(parse_session_dir_name) {
            Some(started) => sessions.push((started, path)),
            None => warn!(?path, "Skipping directory that is not a logging session"),
        }
    }

    sessions.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(sessions)
}

/// The most recent session directory, if any.
pub fn latest_session_dir(root: impl AsRef<Path>) -> std::io::Result<Option<PathBuf>> {
    Ok(session_dirs(root)?.into_iter().next().map(|(_, path)| path))
}

/// Group log files of one session, grouped by folder and in rotation order.
pub fn group_log_files(session_dir: impl AsRef<Path>) -> std::io::Result<Vec<PathBuf>> {
    let groups_dir = session_dir.as_ref().join(GROUPS_DIR_NAME);
    if !groups_dir.exists() {
        return Ok(Vec::new());
    }

    let mut folders: Vec<PathBuf> = fs::read_dir(&groups_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    folders.sort();

    let mut files = Vec::new();
    for folder in folders {
        let mut logs: Vec<(u32, PathBuf)> = fs::read_dir(&folder)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?;
                rotation_index(name).map(|index| (index, path.clone()))
            })
            .collect();
        logs.sort();
        files.extend(logs.into_iter().map(|(_, path)| path));
    }
    Ok(files)
}

/// `Log.xml` is 0, `Log.<n>.xml` is n.
fn rotation_index(file_name: &str) -> Option<u32> {
    if file_name == LOG_FILE_NAME {
        return Some(0);
    }
    file_name
        .strip_prefix("Log.")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

/// Files to attach to a bug report: for each of the `max_sessions` most
/// recent sessions, its `session.json` (if present) and all group log files.
pub fn collect_report_files(
    root: impl AsRef<Path>,
    max_sessions: usize,
) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for (_, dir) in session_dirs(root)?.into_iter().take(max_sessions) {
        let metadata = dir.join(SESSION_METADATA_FILE);
        if metadata.is_file() {
            files.push(metadata);
        }
        files.extend(group_log_files(&dir)?);
    }
    Ok(files)
}
