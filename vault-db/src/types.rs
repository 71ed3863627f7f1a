// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Row types for retention metadata.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Observed facts about a file, keyed by (device, inode).
///
/// Inode numbers are recycled by the kernel, so an inode alone never
/// identifies a file; the device must always come along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFacts {
    pub device: u64,
    pub inode: u64,
    /// Source path at the time of observation.
    pub path: PathBuf,
    /// Vault key path, if the file is tracked.
    pub key: Option<PathBuf>,
    /// Modification time, Unix seconds.
    pub mtime: i64,
    pub owner: u32,
    pub group: u32,
    pub size: u64,
}

/// A files-table row.
#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: i64,
    pub facts: FileFacts,
}

impl FileRow {
    /// Whether the stored facts still match an observation.
    ///
    /// The vault key is deliberately ignored: it may be corrected in
    /// place without invalidating the file's history.
    pub fn same_facts(&self, facts: &FileFacts) -> bool {
        let stored = &self.facts;
        stored.device == facts.device
            && stored.inode == facts.inode
            && stored.path == facts.path
            && stored.mtime == facts.mtime
            && stored.owner == facts.owner
            && stored.group == facts.group
            && stored.size == facts.size
    }
}

/// The kind of a status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Deleted,
    Staged,
    Warned,
}

impl StateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StateKind::Deleted => "deleted",
            StateKind::Staged => "staged",
            StateKind::Warned => "warned",
        }
    }
}

/// A state transition to record against a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Deleted,
    Staged,
    /// Warned at the given checkpoint, in hours before deletion.
    Warned { tminus: u64 },
}

impl Transition {
    pub fn kind(self) -> StateKind {
        match self {
            Transition::Deleted => StateKind::Deleted,
            Transition::Staged => StateKind::Staged,
            Transition::Warned { .. } => StateKind::Warned,
        }
    }
}

/// A status-table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub id: i64,
    pub file: i64,
    pub state: String,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Search criteria for notification queries.
#[derive(Debug, Clone, Copy)]
pub struct Criteria {
    pub state: StateKind,
    /// Filter on the per-stakeholder notified flag; `None` matches both.
    pub notified: Option<bool>,
    /// Warning checkpoint filter, `Warned` only.
    pub tminus: Option<u64>,
    /// Restrict to one stakeholder; `None` matches all.
    pub stakeholder: Option<u32>,
}

impl Criteria {
    /// Un-notified events of the given kind for one stakeholder.
    pub fn unnotified(state: StateKind, stakeholder: u32) -> Self {
        Self {
            state,
            notified: Some(false),
            tminus: None,
            stakeholder: Some(stakeholder),
        }
    }
}

/// Per-group aggregation of a file listing: the common path prefix, the
/// file count and the byte total.
///
/// Aggregation happens in code rather than SQL because the full listing
/// is needed alongside the summary anyway, and a common-path aggregate is
/// not expressible in the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSummary {
    pub path: PathBuf,
    pub count: u64,
    pub size: u64,
}

impl GroupSummary {
    fn of(facts: &FileFacts) -> Self {
        Self {
            path: facts.path.clone(),
            count: 1,
            size: facts.size,
        }
    }

    fn merge(self, other: &FileFacts) -> Self {
        Self {
            path: common_path(&self.path, &other.path),
            count: self.count + 1,
            size: self.size + other.size,
        }
    }
}

/// The longest shared component prefix of two paths.
fn common_path(a: &Path, b: &Path) -> PathBuf {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect()
}

/// Partition rows by group and aggregate each partition.
pub fn summarise_by_group(rows: &[FileRow]) -> BTreeMap<u32, GroupSummary> {
    let mut summaries: BTreeMap<u32, GroupSummary> = BTreeMap::new();
    for row in rows {
        summaries
            .entry(row.facts.group)
            .and_modify(|s| *s = s.clone().merge(&row.facts))
            .or_insert_with(|| GroupSummary::of(&row.facts));
    }
    summaries
}

/// Convert Unix seconds to SystemTime.
pub fn unix_to_system_time(timestamp: i64) -> SystemTime {
    if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs((-timestamp) as u64)
    }
}

/// Convert SystemTime to Unix seconds.
pub fn system_time_to_unix(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

pub(crate) fn path_to_blob(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt as _;
    path.as_os_str().as_bytes().to_vec()
}

pub(crate) fn blob_to_path(blob: Vec<u8>) -> PathBuf {
    PathBuf::from(OsString::from_vec(blob))
}
