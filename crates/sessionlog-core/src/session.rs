//! The logging session: entry point for submitting reports.
//!
//! A `Session` owns one timestamped directory under the logs root and every
//! log group created in it. Submitting never fails because of I/O: write
//! problems go to the [`FailureNotifier`] (at most once per failure episode)
//! and to the `sessionlog::fallback` tracing target.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Session (Arc<SessionInner>, cheap to clone)                    │
//! │  ├── router: GroupRouter                                        │
//! │  │   └── GroupHandle per group (Mutex<LogGroup>)                │
//! │  │       └── XmlSessionWriter → Groups/<name>/Log.xml           │
//! │  ├── scheduler: FlushScheduler                                  │
//! │  │   └── burst timer task per burst-mode group                  │
//! │  ├── notifier: Arc<dyn FailureNotifier>                         │
//! │  └── event_tx: broadcast::Sender<SessionEvent>                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let session = Session::open(SessionConfig::new("./Logs"))?;
//! session.configure("Net", GroupSettings::continuous());
//!
//! session.submit(Report::warning("Net", "connection slow"))?;
//! session.submit(Report::error("Ui", "texture missing"))?;
//!
//! let summary = session.shutdown();
//! ```

use std::fmt;
use std::fs;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use chrono::{DateTime, Local, TimeDelta};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};
use ulid::Ulid;

use crate::capture::ExceptionCapture;
use crate::config::{GroupSettings, SessionConfig};
use crate::error::{SessionError, SubmitError};
use crate::format::BatchContext;
use crate::group::{GroupHandle, GroupSignal, GroupStatus};
use crate::metadata::{session_dir_name, write_session_metadata, SessionMetadata};
use crate::notify::{FailureKind, FailureNotifier, SessionEvent, TracingNotifier, FALLBACK_TARGET};
use crate::report::Report;
use crate::router::GroupRouter;
use crate::scheduler::FlushScheduler;

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What the final flush at shutdown achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    pub groups: usize,
    /// Reports written over the whole session
    pub reports_written: u64,
    /// Reports still queued that could not be written before closing
    pub reports_discarded: usize,
    /// The shutdown time budget ran out before every group was flushed
    pub timed_out: bool,
}

/// Handle to a running logging session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

/// Non-owning handle, for hooks that must not keep the session alive.
#[derive(Clone, Default)]
pub struct WeakSession {
    inner: Weak<SessionInner>,
}

impl WeakSession {
    pub fn upgrade(&self) -> Option<Session> {
        self.inner.upgrade().map(|inner| Session { inner })
    }
}

struct SessionInner {
    id: Ulid,
    started_at: DateTime<Local>,
    start: Instant,
    dir: PathBuf,
    config: RwLock<SessionConfig>,
    router: GroupRouter,
    scheduler: FlushScheduler,
    notifier: Arc<dyn FailureNotifier>,
    event_tx: broadcast::Sender<SessionEvent>,
    next_number: AtomicU64,
    written: AtomicU64,
    rotations: AtomicU64,
    closed: AtomicBool,
    metadata: Mutex<Option<SessionMetadata>>,
}

impl Session {
    /// Start a session that reports failures through [`TracingNotifier`].
    ///
    /// Must be called from within a tokio runtime; burst timers run on it.
    pub fn open(config: SessionConfig) -> Result<Self, SessionError> {
        Self::open_with_notifier(config, TracingNotifier)
    }

    /// Start a session with a custom failure notifier.
    pub fn open_with_notifier(
        config: SessionConfig,
        notifier: impl FailureNotifier + 'static,
    ) -> Result<Self, SessionError> {
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        let started_at = Local::now();
        let dir = create_session_dir(&config.root_dir, started_at)?;
        let id = Ulid::new();

        let metadata = config
            .write_session_metadata
            .then(|| SessionMetadata::new(id, started_at));
        if let Some(meta) = &metadata {
            if let Err(e) = write_session_metadata(&dir, meta) {
                warn!(target: FALLBACK_TARGET, ?dir, error = %e, "Could not write session metadata");
            }
        }

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        info!(session_id = %id, ?dir, "Logging session started");

        Ok(Self {
            inner: Arc::new(SessionInner {
                id,
                started_at,
                start: Instant::now(),
                router: GroupRouter::new(&dir),
                dir,
                config: RwLock::new(config),
                scheduler: FlushScheduler::new(runtime),
                notifier: Arc::new(notifier),
                event_tx,
                next_number: AtomicU64::new(0),
                written: AtomicU64::new(0),
                rotations: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                metadata: Mutex::new(metadata),
            }),
        })
    }

    pub fn id(&self) -> Ulid {
        self.inner.id
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.inner.started_at
    }

    /// The session directory, `<root>/<YYYY-MM-DD HH.MM.SS.ffffff>`.
    pub fn directory(&self) -> &Path {
        &self.inner.dir
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe to session events.
    ///
    /// Multiple subscribers can exist; events are broadcast to all.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Submit a report to its group.
    ///
    /// Returns once the report is queued, or, for a continuous group or an
    /// error in a burst group with `flush_on_error`, once it has been
    /// written. Write failures are not returned here.
    pub fn submit(&self, report: Report) -> Result<(), SubmitError> {
        self.inner.submit(report)
    }

    /// Change a group's settings. Creates no group; the settings are kept
    /// for when the group first receives a report.
    pub fn configure(&self, group: &str, settings: GroupSettings) {
        self.inner.configure(group, settings)
    }

    /// Settings the group has (or will have when created).
    pub fn settings_for(&self, group: &str) -> GroupSettings {
        match self.inner.router.get(group) {
            Some(handle) => handle.lock().settings().clone(),
            None => self.inner.config.read().settings_for(group),
        }
    }

    /// Write the group's queued reports now. `false` for an unknown group.
    pub fn flush(&self, group: &str) -> bool {
        self.inner.flush_group(group)
    }

    pub fn flush_all(&self) {
        for group in self.inner.router.groups() {
            self.inner.flush_group(group.name());
        }
    }

    /// Close the group's current file and continue in a new one.
    ///
    /// Returns the path of the new file, `None` for an unknown group or a
    /// closed session.
    pub fn rotate(&self, group: &str) -> Option<PathBuf> {
        if self.is_closed() {
            return None;
        }
        let handle = self.inner.router.get(group)?;
        let (signals, path) = {
            let mut state = handle.lock();
            let signals = state.rotate();
            (signals, state.file_path().to_path_buf())
        };
        self.inner.dispatch(group, signals);
        Some(path)
    }

    pub fn group_status(&self, group: &str) -> Option<GroupStatus> {
        self.inner
            .router
            .get(group)
            .map(|handle| handle.lock().status())
    }

    /// Names of all groups created so far, sorted.
    pub fn groups(&self) -> Vec<String> {
        self.inner
            .router
            .groups()
            .iter()
            .map(|g| g.name().to_string())
            .collect()
    }

    /// A capture that turns caught errors and panics into implicit
    /// exception reports in `group`.
    pub fn exception_capture(&self, group: impl Into<String>) -> ExceptionCapture {
        ExceptionCapture::new(self.downgrade(), group)
    }

    /// Flush every group, close every file and stop accepting reports.
    ///
    /// Bounded by the configured shutdown timeout; reports that could not be
    /// written in time are discarded. Calling it again is a no-op.
    pub fn shutdown(&self) -> ShutdownSummary {
        self.inner.shutdown()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("dir", &self.inner.dir)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionInner {
    fn submit(self: &Arc<Self>, report: Report) -> Result<(), SubmitError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SubmitError::Closed);
        }
        let number = self.next_number.fetch_add(1, Ordering::Relaxed) + 1;
        let group = self.resolve(report.group());

        let signals = {
            let mut state = group.lock();
            if !state.accepts(&report) {
                trace!(group = group.name(), level = %report.level(), "Report below group minimum level");
                return Ok(());
            }
            let immediate = state.settings().flushes_immediately(report.level());
            let mut signals = state.enqueue(number, report);
            if immediate {
                signals.extend(state.flush(&self.batch_context()));
            }
            signals
        };

        self.dispatch(group.name(), signals);
        Ok(())
    }

    fn resolve(self: &Arc<Self>, name: &str) -> Arc<GroupHandle> {
        let resolved = self.router.resolve(name, || {
            let config = self.config.read();
            (config.settings_for(name), config.max_pending_reports)
        });

        if resolved.created {
            let settings = resolved.group.lock().settings().clone();
            self.sync_timer(name, &settings);
            self.emit(SessionEvent::GroupCreated {
                group: name.to_string(),
                path: resolved.group.folder().to_path_buf(),
            });
            if let Some(error) = resolved.folder_error {
                let signals = resolved.group.lock().record_failure(error);
                self.dispatch(name, signals);
            }
        }
        resolved.group
    }

    fn configure(self: &Arc<Self>, group: &str, settings: GroupSettings) {
        self.config
            .write()
            .groups
            .insert(group.to_string(), settings.clone());

        if let Some(handle) = self.router.get(group) {
            handle.lock().set_settings(settings.clone());
            if !self.closed.load(Ordering::Acquire) {
                self.sync_timer(group, &settings);
            }
        }
        debug!(group, ?settings, "Group settings changed");
    }

    fn sync_timer(self: &Arc<Self>, group: &str, settings: &GroupSettings) {
        let session = Arc::downgrade(self);
        let name = group.to_string();
        self.scheduler.schedule(group, settings, move || {
            if let Some(inner) = session.upgrade() {
                inner.flush_group(&name);
            }
        });
    }

    fn flush_group(&self, name: &str) -> bool {
        let Some(group) = self.router.get(name) else {
            return false;
        };
        let signals = group.lock().flush(&self.batch_context());
        self.dispatch(name, signals);
        true
    }

    fn batch_context(&self) -> BatchContext {
        BatchContext::new(self.start)
    }

    fn shutdown(&self) -> ShutdownSummary {
        if self.closed.swap(true, Ordering::AcqRel) {
            return ShutdownSummary::default();
        }
        self.scheduler.shutdown();

        let timeout = self.config.read().shutdown_timeout();
        let deadline = Instant::now() + timeout;
        let groups = self.router.groups();
        let mut summary = ShutdownSummary {
            groups: groups.len(),
            ..ShutdownSummary::default()
        };

        for group in &groups {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(mut state) = group.try_lock_for(remaining) else {
                warn!(target: FALLBACK_TARGET, group = group.name(), "Group busy at shutdown, leaving it unclosed");
                summary.timed_out = true;
                continue;
            };

            let mut signals = Vec::new();
            if Instant::now() < deadline {
                signals = state.flush(&self.batch_context());
            } else {
                summary.timed_out = true;
            }
            summary.reports_discarded += state.discard_pending();
            signals.extend(state.close());
            drop(state);

            self.dispatch(group.name(), signals);
        }

        summary.reports_written = self.written.load(Ordering::Relaxed);
        if let Some(meta) = self.metadata.lock().as_mut() {
            let names = groups.iter().map(|g| g.name().to_string()).collect();
            meta.finish(names, self.rotations.load(Ordering::Relaxed));
            if let Err(e) = write_session_metadata(&self.dir, meta) {
                warn!(target: FALLBACK_TARGET, dir = ?self.dir, error = %e, "Could not update session metadata");
            }
        }

        info!(
            session_id = %self.id,
            groups = summary.groups,
            written = summary.reports_written,
            discarded = summary.reports_discarded,
            timed_out = summary.timed_out,
            "Logging session shut down"
        );
        summary
    }

    /// Deliver group signals: tracing, notifier, event subscribers.
    fn dispatch(&self, group: &str, signals: Vec<GroupSignal>) {
        for signal in signals {
            match signal {
                GroupSignal::Flushed { reports, bytes } => {
                    self.written.fetch_add(reports as u64, Ordering::Relaxed);
                    trace!(group, reports, bytes, "Flushed log batch");
                    self.emit(SessionEvent::Flushed {
                        group: group.to_string(),
                        reports,
                        bytes,
                    });
                }
                GroupSignal::Failed { error, notify } => {
                    let kind = error.kind();
                    let detail = error.to_string();
                    warn!(target: FALLBACK_TARGET, group, %kind, error = %detail, "Log group write failed");
                    if notify {
                        self.notify(group, kind, &detail);
                    }
                    self.emit(SessionEvent::Failure {
                        group: group.to_string(),
                        kind,
                        detail,
                        notified: notify,
                    });
                }
                GroupSignal::Internal(error) => {
                    error!(target: FALLBACK_TARGET, group, %error, "Log group used after close");
                }
                GroupSignal::Recovered => {
                    info!(group, "Log group writing again");
                    self.emit(SessionEvent::Recovered {
                        group: group.to_string(),
                    });
                }
                GroupSignal::Rotated { from, to } => {
                    self.rotations.fetch_add(1, Ordering::Relaxed);
                    info!(group, ?from, ?to, "Rotated log file");
                    self.emit(SessionEvent::Rotated {
                        group: group.to_string(),
                        from,
                        to,
                    });
                }
                GroupSignal::Dropped { count, notify } => {
                    warn!(target: FALLBACK_TARGET, group, count, "Dropped queued reports");
                    if notify {
                        let detail = format!("{count} queued reports dropped");
                        self.notify(group, FailureKind::ReportsDropped, &detail);
                    }
                    self.emit(SessionEvent::ReportsDropped {
                        group: group.to_string(),
                        count,
                    });
                }
            }
        }
    }

    fn notify(&self, group: &str, kind: FailureKind, detail: &str) {
        let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.notifier.notify(group, kind, detail)
        }));
        if delivered.is_err() {
            error!(target: FALLBACK_TARGET, group, %kind, "Failure notifier panicked");
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.shutdown();
        }
    }
}

/// Create `<root>/<timestamp>`, stepping the timestamp forward if another
/// session already took the name.
fn create_session_dir(root: &Path, started_at: DateTime<Local>) -> Result<PathBuf, SessionError> {
    fs::create_dir_all(root).map_err(|source| SessionError::SessionDirectory {
        path: root.to_path_buf(),
        source,
    })?;

    let mut stamp = started_at;
    loop {
        let dir = root.join(session_dir_name(&stamp));
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                stamp = stamp + TimeDelta::microseconds(1);
            }
            Err(source) => return Err(SessionError::SessionDirectory { path: dir, source }),
        }
    }
}
