//! Session logging engine with per-group XML log files.
//!
//! A host opens one [`Session`] per run and submits [`Report`]s to named
//! groups. Each group writes its own XML file inside the session directory,
//! either on every report (continuous mode) or in periodic batches (burst
//! mode). Write problems never reach the submitting code: they are reported
//! through a [`FailureNotifier`], once per failure episode.
//!
//! ## Layout on disk
//!
//! ```text
//! Logs/
//! └── 2026-01-21 14.13.48.123456/          # one directory per session
//!     ├── session.json                     # id, start/end time, platform
//!     └── Groups/
//!         ├── Net/
//!         │   ├── Log.xml
//!         │   └── Log.1.xml                # after a rotation
//!         └── Default/
//!             └── Log.xml
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use sessionlog_core::{GroupSettings, Report, Session, SessionConfig};
//!
//! let config = SessionConfig::new("./Logs")
//!     .with_group("Net", GroupSettings::continuous());
//! let session = Session::open(config)?;
//!
//! session.submit(Report::warning("Net", "connection slow"))?;
//! session.shutdown();
//! ```
//!
//! ### Forwarding `tracing` events
//!
//! ```ignore
//! use sessionlog_core::ReportLayer;
//! use tracing_subscriber::prelude::*;
//!
//! let layer = ReportLayer::new(session.downgrade(), "App");
//! tracing_subscriber::registry()
//!     .with(layer)
//!     .with(tracing_subscriber::fmt::layer())
//!     .init();
//! ```
//!
//! ### Reading logs back
//!
//! ```ignore
//! use sessionlog_core::{generate_summary, latest_session_dir, SummaryOptions};
//!
//! if let Some(dir) = latest_session_dir("./Logs")? {
//!     println!("{}", generate_summary(&dir, &SummaryOptions::default())?);
//! }
//! ```

pub mod capture;
pub mod collect;
pub mod config;
pub mod error;
pub mod format;
pub mod group;
pub mod layer;
pub mod metadata;
pub mod notify;
pub mod reader;
pub mod report;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod size_guard;
pub mod summary;
pub mod writer;

// Re-exports for convenience
pub use capture::{install_panic_hook, panic_message, ExceptionCapture};
pub use collect::{
    collect_report_files, group_log_files, latest_session_dir, session_dirs,
    DEFAULT_REPORT_SESSIONS,
};
pub use config::{GroupSettings, SessionConfig};
pub use error::{ConfigError, LogError, ReadError, SessionError, SubmitError};
pub use format::{dropped_marker, encode_report, BatchContext, LOG_FOOTER, LOG_HEADER};
pub use group::GroupStatus;
pub use layer::ReportLayer;
pub use metadata::{read_session_metadata, write_session_metadata, SessionMetadata};
pub use notify::{FailureKind, FailureNotifier, SessionEvent, TracingNotifier, FALLBACK_TARGET};
pub use reader::{parse_log, read_log_file, ExceptionRecord, LogRecord};
pub use report::{ExceptionInfo, Level, ParseLevelError, Report, DEFAULT_GROUP};
pub use router::{sanitize_group_name, GroupRouter};
pub use scheduler::FlushScheduler;
pub use session::{Session, ShutdownSummary, WeakSession};
pub use size_guard::{SizeExceeded, SizeGuard};
pub use summary::{generate_summary, write_summary, LogStats, SummaryOptions};
pub use writer::{rotation_path, WriterState, XmlSessionWriter};
