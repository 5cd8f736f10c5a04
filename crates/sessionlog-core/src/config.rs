//! Session and per-group configuration.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::report::Level;

/// Default burst flush interval (20 seconds).
pub const DEFAULT_BURST_INTERVAL_MS: u64 = 20_000;

/// Default bound on reports queued per group while writes keep failing.
pub const DEFAULT_MAX_PENDING_REPORTS: usize = 10_000;

/// Default time budget for the final flush at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// How a single log group persists its reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSettings {
    /// Write every accepted report as soon as it is submitted
    pub continuous_enabled: bool,
    /// Write queued reports in one batch per interval
    pub burst_enabled: bool,
    pub burst_interval_ms: u64,
    /// Maximum log file size in bytes; 0 means unlimited
    pub max_file_size_bytes: u64,
    /// Reports below this level are dropped (exceptions always pass)
    pub min_level: Level,
    /// In burst mode, error-level reports trigger an immediate flush
    pub flush_on_error: bool,
    /// Start a new file instead of rejecting batches at the size limit
    pub rotate_on_limit: bool,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            continuous_enabled: false,
            burst_enabled: true,
            burst_interval_ms: DEFAULT_BURST_INTERVAL_MS,
            max_file_size_bytes: 0,
            min_level: Level::Warning,
            flush_on_error: true,
            rotate_on_limit: false,
        }
    }
}

impl GroupSettings {
    /// Write-through settings with burst disabled.
    pub fn continuous() -> Self {
        Self {
            continuous_enabled: true,
            burst_enabled: false,
            ..Self::default()
        }
    }

    /// Burst-only settings with the given interval.
    pub fn burst(interval: Duration) -> Self {
        Self {
            continuous_enabled: false,
            burst_enabled: true,
            burst_interval_ms: interval.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = bytes;
        self
    }

    pub fn with_rotate_on_limit(mut self, rotate: bool) -> Self {
        self.rotate_on_limit = rotate;
        self
    }

    pub fn with_flush_on_error(mut self, flush: bool) -> Self {
        self.flush_on_error = flush;
        self
    }

    pub fn burst_interval(&self) -> Duration {
        Duration::from_millis(self.burst_interval_ms)
    }

    /// Whether a burst timer should be running for the group.
    ///
    /// A zero interval disables the timer even when burst is enabled.
    pub fn burst_active(&self) -> bool {
        self.burst_enabled && self.burst_interval_ms > 0
    }

    /// Whether a report at `level` should be written without waiting for the timer.
    pub fn flushes_immediately(&self, level: Level) -> bool {
        self.continuous_enabled
            || (self.burst_active() && self.flush_on_error && level >= Level::Error)
    }
}

/// Configuration for a logging session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory that holds one sub-directory per session
    pub root_dir: PathBuf,
    /// Settings for groups without an explicit override
    pub default_group: GroupSettings,
    /// Per-group overrides, keyed by group name
    pub groups: HashMap<String, GroupSettings>,
    /// Per-group queue bound; 0 means unbounded
    pub max_pending_reports: usize,
    pub shutdown_timeout_ms: u64,
    /// Write `session.json` into the session directory
    pub write_session_metadata: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("Logs"),
            default_group: GroupSettings::default(),
            groups: HashMap::new(),
            max_pending_reports: DEFAULT_MAX_PENDING_REPORTS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            write_session_metadata: true,
        }
    }
}

impl SessionConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_default_group(mut self, settings: GroupSettings) -> Self {
        self.default_group = settings;
        self
    }

    pub fn with_group(mut self, name: impl Into<String>, settings: GroupSettings) -> Self {
        self.groups.insert(name.into(), settings);
        self
    }

    pub fn with_max_pending_reports(mut self, max: usize) -> Self {
        self.max_pending_reports = max;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Effective settings for a group: its override, or the default.
    pub fn settings_for(&self, group: &str) -> GroupSettings {
        self.groups
            .get(group)
            .cloned()
            .unwrap_or_else(|| self.default_group.clone())
    }

    /// Load a config file.
    ///
    /// A missing file yields the defaults. A file that cannot be parsed is
    /// copied to `<path>.bak` and the defaults are returned.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(?path, "No session config found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                let backup = backup_path(path);
                warn!(?path, ?backup, error = %e, "Session config is corrupt, resetting to defaults");
                fs::copy(path, &backup).map_err(|source| ConfigError::Io {
                    path: backup.clone(),
                    source,
                })?;
                Ok(Self::default())
            }
        }
    }

    /// Write the config as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_burst_engine() {
        let settings = GroupSettings::default();
        assert!(settings.burst_active());
        assert!(!settings.continuous_enabled);
        assert_eq!(settings.burst_interval(), Duration::from_secs(20));
        assert_eq!(settings.min_level, Level::Warning);
        assert_eq!(settings.max_file_size_bytes, 0);
    }

    #[test]
    fn test_zero_interval_disables_timer() {
        let settings = GroupSettings::burst(Duration::ZERO);
        assert!(settings.burst_enabled);
        assert!(!settings.burst_active());
    }

    #[test]
    fn test_flushes_immediately() {
        let continuous = GroupSettings::continuous();
        assert!(continuous.flushes_immediately(Level::Debug));

        let burst = GroupSettings::burst(Duration::from_secs(5));
        assert!(!burst.flushes_immediately(Level::Warning));
        assert!(burst.flushes_immediately(Level::Error));
        assert!(burst.flushes_immediately(Level::Exception));

        let quiet = burst.with_flush_on_error(false);
        assert!(!quiet.flushes_immediately(Level::Exception));
    }

    #[test]
    fn test_settings_for_override() {
        let config = SessionConfig::new("logs")
            .with_group("Net", GroupSettings::continuous().with_min_level(Level::Debug));
        assert!(config.settings_for("Net").continuous_enabled);
        assert_eq!(config.settings_for("Ui"), GroupSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config").join("session.json");

        let config = SessionConfig::new(temp.path().join("Logs"))
            .with_group("Net", GroupSettings::continuous())
            .with_max_pending_reports(50);
        config.save(&path).unwrap();

        let loaded = SessionConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("session.json");
        fs::write(&path, r#"{ "max_pending_reports": 3, "default_group": { "continuous_enabled": true } }"#)
            .unwrap();

        let loaded = SessionConfig::load(&path).unwrap();
        assert_eq!(loaded.max_pending_reports, 3);
        assert!(loaded.default_group.continuous_enabled);
        assert!(loaded.default_group.burst_enabled);
        assert_eq!(loaded.shutdown_timeout_ms, DEFAULT_SHUTDOWN_TIMEOUT_MS);
    }

    #[test]
    fn test_corrupt_file_resets_with_backup() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("session.json");
        fs::write(&path, "{ not json").unwrap();

        let loaded = SessionConfig::load(&path).unwrap();
        assert_eq!(loaded, SessionConfig::default());
        let backup = temp.path().join("session.json.bak");
        assert_eq!(fs::read_to_string(backup).unwrap(), "{ not json");
    }

    #[test]
    fn test_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let loaded = SessionConfig::load(temp.path().join("absent.json")).unwrap();
        assert_eq!(loaded, SessionConfig::default());
    }
}
