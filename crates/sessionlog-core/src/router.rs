//! Maps group names to their folders and [`GroupHandle`]s.
//!
//! ```text
//! <session dir>/
//! ├── session.json
//! └── Groups/
//!     ├── Default/Log.xml
//!     ├── Net/Log.xml
//!     └── Net/Log.1.xml      # after a rotation
//! ```
//!
//! Group names are sanitized into folder names. Two names that sanitize to
//! the same folder get distinct folders (`A_B`, `A_B~2`) for the rest of the
//! session, so every group keeps exactly one writer.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::GroupSettings;
use crate::error::LogError;
use crate::group::{GroupHandle, LogGroup};
use crate::report::DEFAULT_GROUP;

/// Sub-directory of a session directory that holds the group folders.
pub const GROUPS_DIR_NAME: &str = "Groups";

/// Turn a group name into a single safe path component.
///
/// Separators, characters reserved on common filesystems and control
/// characters become `_`; leading and trailing dots and whitespace are
/// trimmed. An empty result maps to [`DEFAULT_GROUP`].
pub fn sanitize_group_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();
    if cleaned.is_empty() {
        DEFAULT_GROUP.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Result of [`GroupRouter::resolve`].
pub struct Resolved {
    pub group: Arc<GroupHandle>,
    /// Set when this call created the group
    pub created: bool,
    /// Folder creation failure for a newly created group
    pub folder_error: Option<LogError>,
}

#[derive(Default)]
struct RouterTable {
    groups: HashMap<String, Arc<GroupHandle>>,
    folders: HashSet<String>,
}

/// Lazily creates groups and their folders.
pub struct GroupRouter {
    groups_dir: PathBuf,
    table: RwLock<RouterTable>,
}

impl GroupRouter {
    pub fn new(session_dir: &Path) -> Self {
        Self {
            groups_dir: session_dir.join(GROUPS_DIR_NAME),
            table: RwLock::new(RouterTable::default()),
        }
    }

    pub fn groups_dir(&self) -> &Path {
        &self.groups_dir
    }

    pub fn get(&self, name: &str) -> Option<Arc<GroupHandle>> {
        self.table.read().groups.get(name).cloned()
    }

    /// All groups, sorted by name.
    pub fn groups(&self) -> Vec<Arc<GroupHandle>> {
        let mut groups: Vec<_> = self.table.read().groups.values().cloned().collect();
        groups.sort_by(|a, b| a.name().cmp(b.name()));
        groups
    }

    pub fn len(&self) -> usize {
        self.table.read().groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the group for `name`, creating it and its folder on first use.
    ///
    /// `settings` is only called when the group is created. A folder that
    /// cannot be created does not prevent the group from existing; the
    /// writer retries on every flush.
    pub fn resolve(
        &self,
        name: &str,
        settings: impl FnOnce() -> (GroupSettings, usize),
    ) -> Resolved {
        if let Some(group) = self.get(name) {
            return Resolved {
                group,
                created: false,
                folder_error: None,
            };
        }

        let mut table = self.table.write();
        if let Some(group) = table.groups.get(name) {
            return Resolved {
                group: group.clone(),
                created: false,
                folder_error: None,
            };
        }

        let folder = self.groups_dir.join(allocate_folder(&mut table.folders, name));
        let folder_error = fs::create_dir_all(&folder)
            .err()
            .map(|source| LogError::DirectoryCreateFailed {
                path: folder.clone(),
                source,
            });

        let (settings, max_pending) = settings();
        let group = Arc::new(GroupHandle::new(
            LogGroup::new(name, folder.clone(), settings, max_pending),
            folder,
        ));
        table.groups.insert(name.to_string(), group.clone());
        debug!(group = name, folder = ?group.folder(), "Created log group");

        Resolved {
            group,
            created: true,
            folder_error,
        }
    }
}

fn allocate_folder(taken: &mut HashSet<String>, name: &str) -> String {
    let base = sanitize_group_name(name);
    let mut candidate = base.clone();
    let mut n = 2;
    while taken.contains(&candidate.to_lowercase()) {
        candidate = format!("{base}~{n}");
        n += 1;
    }
    taken.insert(candidate.to_lowercase());
    candidate
}
