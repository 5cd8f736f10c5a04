//! Per-group report queue and write path.
//!
//! A [`LogGroup`] owns the pending reports and the current writer for one
//! group. It never talks to the notifier directly: every operation returns
//! [`GroupSignal`]s which the session delivers once the group lock has been
//! released.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::config::GroupSettings;
use crate::error::LogError;
use crate::format::{encode_batch, BatchContext, EncodedBatch};
use crate::notify::FailureKind;
use crate::report::{QueuedReport, Report};
use crate::writer::{WriterState, XmlSessionWriter};

/// Outcome of a group operation, delivered after the group lock is released.
#[derive(Debug)]
pub(crate) enum GroupSignal {
    Flushed { reports: usize, bytes: u64 },
    /// `notify` is set for the first failure of an episode
    Failed { error: LogError, notify: bool },
    /// Misuse of a closed writer; logged, never notified
    Internal(LogError),
    Recovered,
    Rotated { from: PathBuf, to: PathBuf },
    Dropped { count: u64, notify: bool },
}

/// Snapshot of a group for hosts and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStatus {
    pub name: String,
    pub file: PathBuf,
    pub size_bytes: u64,
    pub pending: usize,
    pub writer_state: WriterState,
    /// Failure episode in progress, if any
    pub failing: Option<FailureKind>,
    pub settings: GroupSettings,
}

/// State of one log group.
#[derive(Debug)]
pub struct LogGroup {
    name: String,
    settings: GroupSettings,
    writer: XmlSessionWriter,
    pending: VecDeque<QueuedReport>,
    max_pending: usize,
    failure: Option<FailureKind>,
    drop_notified: bool,
    dropped: u64,
    closed: bool,
}

impl LogGroup {
    pub fn new(
        name: impl Into<String>,
        folder: impl Into<PathBuf>,
        settings: GroupSettings,
        max_pending: usize,
    ) -> Self {
        let writer = XmlSessionWriter::new(folder, settings.max_file_size_bytes);
        Self {
            name: name.into(),
            settings,
            writer,
            pending: VecDeque::new(),
            max_pending,
            failure: None,
            drop_notified: false,
            dropped: 0,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &GroupSettings {
        &self.settings
    }

    pub fn file_path(&self) -> &Path {
        self.writer.path()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn status(&self) -> GroupStatus {
        GroupStatus {
            name: self.name.clone(),
            file: self.writer.path().to_path_buf(),
            size_bytes: self.writer.size_bytes(),
            pending: self.pending.len(),
            writer_state: self.writer.state(),
            failing: self.failure,
            settings: self.settings.clone(),
        }
    }

    /// Replace the settings; applies from the next flush decision on.
    pub fn set_settings(&mut self, settings: GroupSettings) {
        self.writer.set_max_file_size(settings.max_file_size_bytes);
        self.settings = settings;
    }

    /// Whether the group keeps a report. Exceptions always pass.
    pub fn accepts(&self, report: &Report) -> bool {
        report.is_exception() || report.level() >= self.settings.min_level
    }

    /// Queue a report, dropping the oldest non-exception report when the
    /// backlog is full.
    ///
    /// When the backlog holds only exceptions, an incoming non-exception
    /// report is dropped instead. An incoming exception then replaces the
    /// oldest queued exception, the only case in which an exception is lost.
    pub(crate) fn enqueue(&mut self, number: u64, report: Report) -> Vec<GroupSignal> {
        let mut signals = Vec::new();
        if self.max_pending > 0 && self.pending.len() >= self.max_pending {
            let victim = self
                .pending
                .iter()
                .position(|queued| !queued.report.is_exception());
            match victim {
                Some(index) => {
                    self.pending.remove(index);
                }
                None if !report.is_exception() => {
                    self.note_dropped(1, &mut signals);
                    return signals;
                }
                None => {
                    self.pending.pop_front();
                }
            }
            self.note_dropped(1, &mut signals);
        }
        self.pending.push_back(QueuedReport { number, report });
        signals
    }

    /// Write every pending report as one batch.
    ///
    /// On success the queue is cleared. On failure the reports stay queued
    /// for the next attempt, except reports that can never be written
    /// (unserializable, or larger than an empty file allows). A queue too
    /// large for the current file is then written in pieces.
    pub(crate) fn flush(&mut self, ctx: &BatchContext) -> Vec<GroupSignal> {
        let mut signals = Vec::new();
        let Some(error) = self.write_pending(ctx, &mut signals) else {
            return signals;
        };

        let size_limited = matches!(error, LogError::SizeLimitExceeded { .. });
        self.fail(error, &mut signals);

        if size_limited && !self.closed {
            self.write_in_pieces(ctx, &mut signals);
        }
        signals
    }

    /// Close the current file and continue in the next rotation file.
    pub(crate) fn rotate(&mut self) -> Vec<GroupSignal> {
        let mut signals = Vec::new();
        if self.closed {
            signals.push(GroupSignal::Internal(LogError::InternalStateError(format!(
                "cannot rotate closed group {}",
                self.name
            ))));
            return signals;
        }
        self.rotate_writer(&mut signals);
        signals
    }

    /// Write the footer and refuse further writes.
    pub(crate) fn close(&mut self) -> Vec<GroupSignal> {
        let mut signals = Vec::new();
        self.closed = true;
        if let Err(error) = self.writer.close() {
            self.fail(error, &mut signals);
        }
        signals
    }

    /// Throw away everything still queued, returning how many reports that was.
    pub(crate) fn discard_pending(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    /// Record a failure that happened outside the write path.
    pub(crate) fn record_failure(&mut self, error: LogError) -> Vec<GroupSignal> {
        let mut signals = Vec::new();
        self.fail(error, &mut signals);
        signals
    }

    fn write_pending(
        &mut self,
        ctx: &BatchContext,
        signals: &mut Vec<GroupSignal>,
    ) -> Option<LogError> {
        let batch = self.encode_pending(ctx, signals)?;
        match self.commit(&batch.bytes, batch.entries.len(), signals) {
            Ok(()) => None,
            Err(error) => {
                if matches!(error, LogError::SizeLimitExceeded { .. }) {
                    self.drop_unwritable(&batch, signals);
                }
                Some(error)
            }
        }
    }

    /// Write the queue as several batches after it was rejected whole.
    ///
    /// Each batch is the longest run of leading reports that fits the
    /// current file and is accepted or rejected whole. With rotation on,
    /// a full file is rotated and writing continues in the next one; a
    /// file holding only the header is never rotated. Without rotation
    /// only a file holding nothing but the header is filled this way.
    fn write_in_pieces(&mut self, ctx: &BatchContext, signals: &mut Vec<GroupSignal>) {
        while !self.pending.is_empty() {
            if !self.writer.is_fresh() {
                if !self.settings.rotate_on_limit {
                    return;
                }
                self.rotate_writer(signals);
            }
            match self.write_fitting(ctx, signals) {
                Ok(0) => return,
                Ok(_) => {}
                Err(error) => {
                    self.fail(error, signals);
                    return;
                }
            }
        }
    }

    /// Write as many leading reports as the current file has room for.
    ///
    /// Returns how many reports were written.
    fn write_fitting(
        &mut self,
        ctx: &BatchContext,
        signals: &mut Vec<GroupSignal>,
    ) -> Result<usize, LogError> {
        let Some(batch) = self.encode_pending(ctx, signals) else {
            return Ok(0);
        };
        self.writer.open()?;
        let (count, len) = match self.writer.remaining() {
            Some(room) => fitting_prefix(&batch, room),
            None => (batch.entries.len(), batch.bytes.len()),
        };
        if count == 0 {
            return Ok(0);
        }
        self.commit(&batch.bytes[..len], count, signals)?;
        Ok(count)
    }

    /// Append `bytes`, which encode the first `reports` queued reports.
    fn commit(
        &mut self,
        bytes: &[u8],
        reports: usize,
        signals: &mut Vec<GroupSignal>,
    ) -> Result<(), LogError> {
        let written = self.writer.append(bytes)?;
        self.pending.drain(..reports);
        self.dropped = 0;
        signals.push(GroupSignal::Flushed {
            reports,
            bytes: written,
        });
        if self.pending.is_empty() {
            let was_failing = self.failure.take().is_some();
            let was_dropping = std::mem::take(&mut self.drop_notified);
            if was_failing || was_dropping {
                signals.push(GroupSignal::Recovered);
            }
        }
        Ok(())
    }

    /// Encode the queue, removing reports that cannot be serialized.
    ///
    /// `None` when there is nothing left to write.
    fn encode_pending(
        &mut self,
        ctx: &BatchContext,
        signals: &mut Vec<GroupSignal>,
    ) -> Option<EncodedBatch> {
        if self.pending.is_empty() {
            return None;
        }
        let batch = encode_batch(self.pending.iter(), self.dropped, ctx);
        if batch.rejected.is_empty() {
            return Some(batch);
        }

        let rejected: HashSet<u64> = batch.rejected.iter().map(|(number, _)| *number).collect();
        self.pending.retain(|queued| !rejected.contains(&queued.number));
        for (_, error) in batch.rejected {
            self.fail(error, signals);
        }
        if self.pending.is_empty() {
            return None;
        }
        Some(encode_batch(self.pending.iter(), self.dropped, ctx))
    }

    /// Drop reports too large to fit even in an empty file.
    fn drop_unwritable(&mut self, batch: &EncodedBatch, signals: &mut Vec<GroupSignal>) {
        let Some(capacity) = self.writer.fresh_capacity() else {
            return;
        };
        let marker = batch.marker_len();
        let oversized: HashSet<u64> = batch
            .entries
            .iter()
            .filter(|entry| marker + entry.len > capacity)
            .map(|entry| entry.number)
            .collect();
        if oversized.is_empty() {
            return;
        }
        self.pending.retain(|queued| !oversized.contains(&queued.number));
        self.note_dropped(oversized.len() as u64, signals);
    }

    fn rotate_writer(&mut self, signals: &mut Vec<GroupSignal>) {
        let next = self.writer.next_rotation();
        if let Err(error) = self.writer.close() {
            self.fail(error, signals);
        }
        let previous = std::mem::replace(&mut self.writer, next);
        signals.push(GroupSignal::Rotated {
            from: previous.path().to_path_buf(),
            to: self.writer.path().to_path_buf(),
        });
    }

    fn fail(&mut self, error: LogError, signals: &mut Vec<GroupSignal>) {
        let kind = error.kind();
        if kind == FailureKind::InternalStateError {
            signals.push(GroupSignal::Internal(error));
            return;
        }
        let notify = self.failure.is_none();
        if notify {
            self.failure = Some(kind);
        }
        signals.push(GroupSignal::Failed { error, notify });
    }

    fn note_dropped(&mut self, count: u64, signals: &mut Vec<GroupSignal>) {
        self.dropped += count;
        let notify = !self.drop_notified;
        self.drop_notified = true;
        signals.push(GroupSignal::Dropped { count, notify });
    }
}

/// How many leading reports of `batch` fit in `room` bytes, and the length
/// of the bytes encoding them (including any dropped-reports marker).
fn fitting_prefix(batch: &EncodedBatch, room: u64) -> (usize, usize) {
    let mut used = batch.marker_len();
    let mut count = 0;
    for entry in &batch.entries {
        if used + entry.len > room {
            break;
        }
        used += entry.len;
        count += 1;
    }
    (count, used as usize)
}

/// A group and its lock, shared between the router, the session and the
/// group's burst timer.
#[derive(Debug)]
pub struct GroupHandle {
    name: String,
    folder: PathBuf,
    state: Mutex<LogGroup>,
}

impl GroupHandle {
    pub fn new(group: LogGroup, folder: PathBuf) -> Self {
        Self {
            name: group.name().to_string(),
            folder,
            state: Mutex::new(group),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn lock(&self) -> MutexGuard<'_, LogGroup> {
        self.state.lock()
    }

    /// Lock, giving up after `timeout`.
    pub fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, LogGroup>> {
        self.state.try_lock_for(timeout)
    }
}
