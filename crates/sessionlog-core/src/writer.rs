//! Append-only XML writer for a single group log file.
//!
//! The writer owns one file at a time. A new file gets [`LOG_HEADER`]; an
//! existing file that is recognized as a log file is resumed (its footer,
//! if any, is stripped so appends land inside the root element); anything
//! else is left alone and the writer moves on to the next rotation suffix.
//!
//! ```text
//! Unopened ──open/append──▶ Open ──close──▶ Closed
//!     │                        │
//!     └──────── close ─────────┴──▶ Closed   (footer only if Open)
//! ```
//!
//! Writes after `close` are an [`LogError::InternalStateError`]. Rotation
//! hands out a fresh writer for the next file name; a closed writer is
//! never reopened.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::LogError;
use crate::format::{LOG_FOOTER, LOG_HEADER};
use crate::notify::FALLBACK_TARGET;
use crate::size_guard::SizeGuard;

/// File name of the first log file in a group folder.
pub const LOG_FILE_NAME: &str = "Log.xml";

/// Lifecycle of a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Unopened,
    Open,
    Closed,
}

/// Path of the `index`th rotation of `Log.xml` in `folder`.
///
/// Index 0 is `Log.xml` itself, later files are `Log.1.xml`, `Log.2.xml`...
pub fn rotation_path(folder: &Path, index: u32) -> PathBuf {
    if index == 0 {
        folder.join(LOG_FILE_NAME)
    } else {
        folder.join(format!("Log.{index}.xml"))
    }
}

/// Writer for one group log file.
#[derive(Debug)]
pub struct XmlSessionWriter {
    folder: PathBuf,
    index: u32,
    path: PathBuf,
    state: WriterState,
    file: Option<File>,
    guard: SizeGuard,
}

impl XmlSessionWriter {
    /// Writer for `Log.xml` in `folder`. Nothing touches the disk until
    /// the first append.
    pub fn new(folder: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self::at_index(folder.into(), 0, max_file_size)
    }

    fn at_index(folder: PathBuf, index: u32, max_file_size: u64) -> Self {
        let path = rotation_path(&folder, index);
        let current = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Self {
            folder,
            index,
            path,
            state: WriterState::Unopened,
            file: None,
            guard: SizeGuard::new(max_file_size, current).with_reserved(LOG_FOOTER.len() as u64),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Bytes currently in the file, as far as the writer knows.
    pub fn size_bytes(&self) -> u64 {
        self.guard.current()
    }

    pub fn set_max_file_size(&mut self, max_file_size: u64) {
        self.guard.set_limit(max_file_size);
    }

    /// Room for report bytes in a brand-new file, `None` when unlimited.
    pub fn fresh_capacity(&self) -> Option<u64> {
        SizeGuard::new(self.guard.limit(), LOG_HEADER.len() as u64)
            .with_reserved(LOG_FOOTER.len() as u64)
            .remaining()
    }

    /// Room left for report bytes in the current file, `None` when unlimited.
    pub fn remaining(&self) -> Option<u64> {
        self.guard.remaining()
    }

    /// Whether the file holds no reports yet (missing, empty or header only).
    pub fn is_fresh(&self) -> bool {
        self.guard.current() <= LOG_HEADER.len() as u64
    }

    /// Open (or resume) the file and position at the end of its content.
    pub fn open(&mut self) -> Result<(), LogError> {
        match self.state {
            WriterState::Open => return Ok(()),
            WriterState::Closed => {
                return Err(LogError::InternalStateError(format!(
                    "cannot reopen closed log file {}",
                    self.path.display()
                )))
            }
            WriterState::Unopened => {}
        }

        fs::create_dir_all(&self.folder).map_err(|source| LogError::DirectoryCreateFailed {
            path: self.folder.clone(),
            source,
        })?;

        loop {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)
                .map_err(|source| self.open_error(source))?;

            match resume_point(&mut file, &self.path).map_err(|source| self.open_error(source))? {
                Some(0) => {
                    if let Err(source) = file.write_all(LOG_HEADER) {
                        if let Err(error) = file.set_len(0) {
                            warn!(
                                target: FALLBACK_TARGET,
                                path = ?self.path,
                                %error,
                                "Could not remove partial header"
                            );
                        }
                        return Err(LogError::WriteFailed {
                            path: self.path.clone(),
                            source,
                        });
                    }
                    self.guard.reset(LOG_HEADER.len() as u64);
                }
                Some(len) => {
                    file.set_len(len).map_err(|source| self.open_error(source))?;
                    file.seek(SeekFrom::End(0))
                        .map_err(|source| self.open_error(source))?;
                    self.guard.reset(len);
                    debug!(path = ?self.path, bytes = len, "Resumed existing log file");
                }
                None => {
                    warn!(
                        target: FALLBACK_TARGET,
                        path = ?self.path,
                        "Existing file is not a log file, leaving it in place"
                    );
                    self.index += 1;
                    self.path = rotation_path(&self.folder, self.index);
                    continue;
                }
            }

            self.file = Some(file);
            self.state = WriterState::Open;
            return Ok(());
        }
    }

    /// Append one batch. The batch is written whole or not at all.
    ///
    /// Returns the number of bytes written.
    pub fn append(&mut self, batch: &[u8]) -> Result<u64, LogError> {
        if self.state == WriterState::Unopened {
            self.open()?;
        }
        let Some(file) = self.file.as_mut().filter(|_| self.state == WriterState::Open) else {
            return Err(LogError::InternalStateError(format!(
                "append to closed log file {}",
                self.path.display()
            )));
        };

        let len = batch.len() as u64;
        if let Err(exceeded) = self.guard.check(len) {
            return Err(LogError::SizeLimitExceeded {
                path: self.path.clone(),
                current: exceeded.current,
                batch: exceeded.batch,
                limit: exceeded.limit,
            });
        }

        let before = self.guard.current();
        if let Err(source) = file.write_all(batch).and_then(|_| file.flush()) {
            // Drop back to the last complete batch; the handle is reopened next time.
            if let Err(error) = file.set_len(before) {
                warn!(
                    target: FALLBACK_TARGET,
                    path = ?self.path,
                    %error,
                    "Could not roll back partial batch, it is cut off on reopen"
                );
            }
            self.file = None;
            self.state = WriterState::Unopened;
            return Err(LogError::WriteFailed {
                path: self.path.clone(),
                source,
            });
        }

        self.guard.record(len);
        Ok(len)
    }

    /// Write the footer (if the file was opened) and release the file.
    ///
    /// The writer is closed afterwards even if the footer write fails.
    pub fn close(&mut self) -> Result<(), LogError> {
        let previous = std::mem::replace(&mut self.state, WriterState::Closed);
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        if previous != WriterState::Open {
            return Ok(());
        }

        file.write_all(LOG_FOOTER)
            .and_then(|_| file.sync_all())
            .map_err(|source| LogError::WriteFailed {
                path: self.path.clone(),
                source,
            })?;
        self.guard.record(LOG_FOOTER.len() as u64);
        Ok(())
    }

    /// A writer for the next unused rotation file in the same folder.
    pub fn next_rotation(&self) -> XmlSessionWriter {
        let mut index = self.index + 1;
        while rotation_path(&self.folder, index).exists() {
            index += 1;
        }
        XmlSessionWriter::at_index(self.folder.clone(), index, self.guard.limit())
    }

    fn open_error(&self, source: std::io::Error) -> LogError {
        LogError::FileOpenFailed {
            path: self.path.clone(),
            source,
        }
    }
}

/// Where appends should continue in an existing file.
///
/// `Some(0)` for an empty file, `Some(len)` for a log file, `None` for a
/// file that does not start with the log header. A footer is excluded from
/// `len`; any other unfinished tail (a batch cut short by a failed write) is
/// excluded too, so appends continue after the last complete element.
fn resume_point(file: &mut File, path: &Path) -> std::io::Result<Option<u64>> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(Some(0));
    }

    let header_len = LOG_HEADER.len() as u64;
    if len < header_len {
        return Ok(None);
    }
    let mut head = vec![0u8; LOG_HEADER.len()];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut head)?;
    if head != LOG_HEADER {
        return Ok(None);
    }

    let mut body = Vec::new();
    file.read_to_end(&mut body)?;
    if body.ends_with(LOG_FOOTER) {
        return Ok(Some(len - LOG_FOOTER.len() as u64));
    }

    let complete = header_len + complete_prefix(&body) as u64;
    if complete < len {
        warn!(
            target: FALLBACK_TARGET,
            ?path,
            discarded = len - complete,
            "Cutting off unfinished tail of log file"
        );
    }
    Ok(Some(complete))
}

/// Length of `body` up to the end of its last complete element or comment.
///
/// Markup inside text and attributes is always escaped, so `</Log>` and
/// `-->` only ever close an element or a dropped-reports comment.
fn complete_prefix(body: &[u8]) -> usize {
    [&b"</Log>"[..], &b"-->"[..]]
        .iter()
        .filter_map(|end| {
            body.windows(end.len())
                .rposition(|window| window == *end)
                .map(|at| at + end.len())
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn contents(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_nothing_created_until_first_append() {
        let temp = TempDir::new().unwrap();
        let folder = temp.path().join("Groups").join("Net");

        let mut writer = XmlSessionWriter::new(&folder, 0);
        assert_eq!(writer.state(), WriterState::Unopened);
        assert!(!folder.exists());

        writer.append(b"<Log/>").unwrap();
        assert_eq!(writer.state(), WriterState::Open);
        assert_eq!(writer.path(), folder.join("Log.xml"));
        assert!(contents(writer.path()).starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?><LogFile>"));
    }

    #[test]
    fn test_close_writes_footer() {
        let temp = TempDir::new().unwrap();
        let mut writer = XmlSessionWriter::new(temp.path(), 0);

        writer.append(b"<Log>a</Log>").unwrap();
        writer.append(b"<Log>b</Log>").unwrap();
        writer.close().unwrap();

        assert_eq!(writer.state(), WriterState::Closed);
        let text = contents(writer.path());
        assert!(text.ends_with("<Log>a</Log><Log>b</Log></LogFile>"));
        assert_eq!(writer.size_bytes(), text.len() as u64);
    }

    #[test]
    fn test_close_unopened_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let mut writer = XmlSessionWriter::new(temp.path(), 0);
        writer.close().unwrap();
        assert_eq!(writer.state(), WriterState::Closed);
        assert!(!temp.path().join(LOG_FILE_NAME).exists());
    }

    #[test]
    fn test_append_after_close_is_state_error() {
        let temp = TempDir::new().unwrap();
        let mut writer = XmlSessionWriter::new(temp.path(), 0);
        writer.append(b"<Log/>").unwrap();
        writer.close().unwrap();

        let err = writer.append(b"<Log/>").unwrap_err();
        assert!(matches!(err, LogError::InternalStateError(_)));
        assert!(matches!(writer.open(), Err(LogError::InternalStateError(_))));
    }

    #[test]
    fn test_resume_strips_footer() {
        let temp = TempDir::new().unwrap();
        let mut first = XmlSessionWriter::new(temp.path(), 0);
        first.append(b"<Log>a</Log>").unwrap();
        first.close().unwrap();

        let mut second = XmlSessionWriter::new(temp.path(), 0);
        second.append(b"<Log>b</Log>").unwrap();
        second.close().unwrap();

        let text = contents(second.path());
        assert!(text.ends_with("<LogFile><Log>a</Log><Log>b</Log></LogFile>"));
        assert_eq!(text.matches("</LogFile>").count(), 1);
    }

    #[test]
    fn test_resume_cuts_off_unfinished_batch() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LOG_FILE_NAME);
        let mut partial = LOG_HEADER.to_vec();
        partial.extend_from_slice(b"<Log>a</Log><!--1 reports dropped--><Log>b</Log><Log>hal");
        fs::write(&path, &partial).unwrap();

        let mut writer = XmlSessionWriter::new(temp.path(), 0);
        writer.append(b"<Log>c</Log>").unwrap();
        writer.close().unwrap();

        let text = contents(&path);
        assert!(text.ends_with(
            "<LogFile><Log>a</Log><!--1 reports dropped--><Log>b</Log><Log>c</Log></LogFile>"
        ));
        assert_eq!(writer.size_bytes(), text.len() as u64);
    }

    #[test]
    fn test_resume_of_header_with_garbage_keeps_header_only() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LOG_FILE_NAME);
        let mut partial = LOG_HEADER.to_vec();
        partial.extend_from_slice(b"<Log Number=\"1\"");
        fs::write(&path, &partial).unwrap();

        let mut writer = XmlSessionWriter::new(temp.path(), 0);
        assert!(!writer.is_fresh());
        writer.open().unwrap();
        assert!(writer.is_fresh());
        writer.close().unwrap();

        let mut expected = LOG_HEADER.to_vec();
        expected.extend_from_slice(LOG_FOOTER);
        assert_eq!(fs::read(&path).unwrap(), expected);
    }

    #[test]
    fn test_unrecognized_file_is_left_alone() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(LOG_FILE_NAME), "not a log").unwrap();

        let mut writer = XmlSessionWriter::new(temp.path(), 0);
        writer.append(b"<Log/>").unwrap();

        assert_eq!(writer.path(), temp.path().join("Log.1.xml"));
        assert_eq!(contents(&temp.path().join(LOG_FILE_NAME)), "not a log");
    }

    #[test]
    fn test_size_limit_rejects_whole_batch() {
        let temp = TempDir::new().unwrap();
        let limit = LOG_HEADER.len() as u64 + LOG_FOOTER.len() as u64 + 20;
        let mut writer = XmlSessionWriter::new(temp.path(), limit);

        writer.append(&[b'x'; 15]).unwrap();
        let before = contents(writer.path());

        let err = writer.append(&[b'y'; 10]).unwrap_err();
        match err {
            LogError::SizeLimitExceeded { batch, limit: l, .. } => {
                assert_eq!(batch, 10);
                assert_eq!(l, limit);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(contents(writer.path()), before);

        writer.append(&[b'z'; 5]).unwrap();
        writer.close().unwrap();
        assert_eq!(fs::metadata(writer.path()).unwrap().len(), limit);
    }

    #[test]
    fn test_next_rotation_skips_existing_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("Log.1.xml"), "").unwrap();

        let mut writer = XmlSessionWriter::new(temp.path(), 500);
        writer.append(b"<Log/>").unwrap();
        writer.close().unwrap();

        let next = writer.next_rotation();
        assert_eq!(next.path(), temp.path().join("Log.2.xml"));
        assert_eq!(next.state(), WriterState::Unopened);
        assert_eq!(next.size_bytes(), 0);
    }

    #[test]
    fn test_directory_failure() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "file, not a folder").unwrap();

        let mut writer = XmlSessionWriter::new(blocker.join("Net"), 0);
        let err = writer.append(b"<Log/>").unwrap_err();
        assert!(matches!(err, LogError::DirectoryCreateFailed { .. }));
        assert_eq!(writer.state(), WriterState::Unopened);

        fs::remove_file(&blocker).unwrap();
        writer.append(b"<Log/>").unwrap();
        assert_eq!(writer.state(), WriterState::Open);
    }

    #[test]
    fn test_fresh_capacity() {
        let temp = TempDir::new().unwrap();
        let unlimited = XmlSessionWriter::new(temp.path(), 0);
        assert_eq!(unlimited.fresh_capacity(), None);

        let limited = XmlSessionWriter::new(temp.path(), 100);
        assert_eq!(
            limited.fresh_capacity(),
            Some(100 - LOG_HEADER.len() as u64 - LOG_FOOTER.len() as u64)
        );
    }
}
