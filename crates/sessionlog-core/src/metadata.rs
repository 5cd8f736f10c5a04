//! `session.json`: metadata describing one logging session.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// File name of the metadata file inside a session directory.
pub const SESSION_METADATA_FILE: &str = "session.json";

/// Name format of session directories, e.g. `2026-10-18 14.03.27.123456`.
pub const SESSION_DIR_FORMAT: &str = "%Y-%m-%d %H.%M.%S%.6f";

/// Directory name for a session started at `started_at`.
pub fn session_dir_name(started_at: &DateTime<Local>) -> String {
    started_at.format(SESSION_DIR_FORMAT).to_string()
}

/// Start time encoded in a session directory name, if it follows the
/// naming convention.
pub fn parse_session_dir_name(name: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(name, SESSION_DIR_FORMAT).ok()
}

/// Metadata written when a session opens and rewritten when it shuts down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Unique session ID
    pub session_id: String,

    /// When the session started (RFC 3339, local time)
    pub started_at: String,

    /// When the session was shut down
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,

    pub os: String,
    pub arch: String,

    /// Version of the logging engine
    pub version: String,

    /// Groups that received reports during the session
    #[serde(default)]
    pub groups: Vec<String>,

    /// Number of log file rotations performed
    #[serde(default)]
    pub rotations: u64,
}

impl SessionMetadata {
    pub fn new(session_id: Ulid, started_at: DateTime<Local>) -> Self {
        Self {
            session_id: session_id.to_string(),
            started_at: started_at.to_rfc3339_opts(SecondsFormat::Millis, false),
            ended_at: None,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            groups: Vec::new(),
            rotations: 0,
        }
    }

    /// Mark the session as ended now.
    pub fn finish(&mut self, groups: Vec<String>, rotations: u64) {
        self.ended_at = Some(Local::now().to_rfc3339_opts(SecondsFormat::Millis, false));
        self.groups = groups;
        self.rotations = rotations;
    }
}

/// Write `session.json` into a session directory.
pub fn write_session_metadata(
    session_dir: impl AsRef<Path>,
    metadata: &SessionMetadata,
) -> std::io::Result<PathBuf> {
    let session_dir = session_dir.as_ref();
    fs::create_dir_all(session_dir)?;

    let path = session_dir.join(SESSION_METADATA_FILE);
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    fs::write(&path, json)?;

    Ok(path)
}

/// Read `session.json` from a session directory.
pub fn read_session_metadata(session_dir: impl AsRef<Path>) -> std::io::Result<SessionMetadata> {
    let content = fs::read_to_string(session_dir.as_ref().join(SESSION_METADATA_FILE))?;
    serde_json::from_str(&content)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
