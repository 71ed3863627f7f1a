// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! File walkers.
//!
//! A walker produces, for every regular file under the requested roots,
//! the vault that commands it, its observed attributes, and its vault
//! status. Two sources are supported: a direct (expensive, accurate)
//! filesystem traversal, and a pre-computed gzipped stat listing
//! (cheaper, possibly stale). Stale listing records are re-stat'ed from
//! the live filesystem before any decision is taken on them.

use std::fs;
use std::io::{self, BufRead as _, BufReader};
use std::os::unix::ffi::OsStringExt as _;
use std::os::unix::fs::MetadataExt as _;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use data_encoding::BASE64;
use flate2::read::GzDecoder;
use tracing::{debug, warn};

use vault_core::error::IoContext as _;
use vault_core::fs as vfs;
use vault_core::idm::IdentityManager;
use vault_core::{Branch, Error};
use vault_db::FileFacts;
use vault_store::Vault;

use crate::error::SweepError;

/// Hours a stat record may be trusted before a forcible re-stat.
const DEFAULT_RESTAT_AFTER_HOURS: i64 = 36;

fn restat_after_secs() -> i64 {
    static HORIZON: OnceLock<i64> = OnceLock::new();
    *HORIZON.get_or_init(|| {
        std::env::var("RESTAT_AFTER")
            .ok()
            .and_then(|hours| hours.parse::<i64>().ok())
            .unwrap_or(DEFAULT_RESTAT_AFTER_HOURS)
            * 3600
    })
}

/// A walked file: its observed attributes and when they were observed.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    facts: FileFacts,
    observed: i64,
}

impl WalkedFile {
    /// Observe a file from the live filesystem.
    pub fn from_fs(path: &Path, now: i64) -> io::Result<Self> {
        let meta = fs::symlink_metadata(path)?;
        Ok(Self {
            facts: FileFacts {
                device: meta.dev(),
                inode: meta.ino(),
                path: path.to_path_buf(),
                key: None,
                mtime: meta.mtime(),
                owner: meta.uid(),
                group: meta.gid(),
                size: meta.len(),
            },
            observed: now,
        })
    }

    /// Construct from an externally supplied stat record.
    pub fn from_stat(facts: FileFacts, observed: i64) -> Self {
        Self { facts, observed }
    }

    pub fn facts(&self) -> &FileFacts {
        &self.facts
    }

    pub fn path(&self) -> &Path {
        &self.facts.path
    }

    /// Seconds since last modification.
    pub fn age(&self, now: i64) -> u64 {
        (now - self.facts.mtime).max(0) as u64
    }

    /// Refresh the attributes from the filesystem if the observation has
    /// passed the re-stat horizon. The vault key survives the refresh.
    pub fn restat_if_stale(&mut self, now: i64) -> io::Result<()> {
        if now - self.observed <= restat_after_secs() {
            return Ok(());
        }

        debug!("Re-stat'ing {}", self.facts.path.display());
        let key = self.facts.key.take();
        let path = self.facts.path.clone();
        let fresh = Self::from_fs(&path, now)?;
        self.facts = fresh.facts;
        self.facts.key = key;
        self.observed = now;
        Ok(())
    }
}

/// A file's standing with respect to its vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkStatus {
    /// Untracked regular file, subject to ageing.
    Outside,
    /// Source file tracked in the given branch.
    Tracked(Branch),
    /// Hardlink physically inside `.vault`, in the given branch.
    Physical(Branch),
    /// Classification found an inconsistency it cannot express.
    Corrupt(String),
}

/// Visitor-style walker over vault-covered trees.
pub trait Walker {
    fn walk(
        &self,
        visit: &mut dyn FnMut(&Vault, WalkedFile, WalkStatus) -> Result<(), SweepError>,
    ) -> Result<(), SweepError>;
}

/// Classify a regular file against its vault.
///
/// `None` means the file is not subject to the sweep at all: vault
/// infrastructure such as the audit log and the lock file.
pub fn classify(vault: &Vault, file: &WalkedFile) -> Option<WalkStatus> {
    let path = file.path();

    if path.starts_with(vault.location()) {
        // Physically inside the vault: the branch directory decides
        return vault.branch_of_physical(path).map(WalkStatus::Physical);
    }

    Some(match vault.lookup(file.facts().inode) {
        Ok(Some(entry)) => WalkStatus::Tracked(entry.branch),
        Ok(None) => WalkStatus::Outside,
        Err(Error::VaultCorruption(message)) => WalkStatus::Corrupt(message),
        Err(e) => WalkStatus::Corrupt(e.to_string()),
    })
}

/// Open the distinct vaults covering the requested roots.
///
/// Each root must be covered by a vault and must not itself be one; roots
/// sharing a vault collapse to a single entry.
pub fn vaults_for<'a>(
    roots: &[PathBuf],
    idm: &'a dyn IdentityManager,
) -> Result<Vec<Vault<'a>>, SweepError> {
    let mut vaults: Vec<Vault<'a>> = Vec::new();
    for root in roots {
        let vault = Vault::open(root, idm)?;
        if !vaults.iter().any(|v| v.root() == vault.root()) {
            vaults.push(vault);
        }
    }
    Ok(vaults)
}

/// Walk the filesystem directly: expensive, but accurate.
pub struct FilesystemWalker<'a> {
    vaults: Vec<Vault<'a>>,
    now: i64,
}

impl<'a> FilesystemWalker<'a> {
    pub fn new(
        roots: &[PathBuf],
        idm: &'a dyn IdentityManager,
        now: i64,
    ) -> Result<Self, SweepError> {
        Ok(Self {
            vaults: vaults_for(roots, idm)?,
            now,
        })
    }

    fn walk_tree(
        &self,
        dir: &Path,
        vault: &Vault,
        visit: &mut dyn FnMut(&Vault, WalkedFile, WalkStatus) -> Result<(), SweepError>,
    ) -> Result<(), SweepError> {
        let entries = fs::read_dir(dir)
            .io_context(|| format!("Failed to read {}", dir.display()))?;

        for entry in entries {
            let entry = entry.io_context(|| format!("Failed to read {}", dir.display()))?;
            let path = entry.path();

            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    // Walks race against live trees; a vanished entry is
                    // not an error
                    warn!("Skipping {}: {e}", path.display());
                    continue;
                }
            };

            if meta.is_dir() {
                self.walk_tree(&path, vault, visit)?;
            } else if meta.is_file() {
                let file = WalkedFile::from_fs(&path, self.now)
                    .io_context(|| format!("Failed to stat {}", path.display()))?;
                if let Some(status) = classify(vault, &file) {
                    visit(vault, file, status)?;
                }
            }
        }

        Ok(())
    }
}

impl Walker for FilesystemWalker<'_> {
    fn walk(
        &self,
        visit: &mut dyn FnMut(&Vault, WalkedFile, WalkStatus) -> Result<(), SweepError>,
    ) -> Result<(), SweepError> {
        for vault in &self.vaults {
            self.walk_tree(vault.root(), vault, visit)?;
        }
        Ok(())
    }
}

// Stat listing field indices, after the base64-encoded path
const SIZE: usize = 0;
const OWNER: usize = 1;
const GROUP: usize = 2;
const MTIME: usize = 4;
const MODE: usize = 6;
const INODE: usize = 7;
const DEVICE: usize = 9;
const FIELDS: usize = 10;

/// Walk a pre-computed stat listing: cheaper, but imprecise.
///
/// Records are gzipped, tab-delimited lines of
/// `base64(path) size owner group atime mtime ctime mode inode nlinks
/// device`, filtered to regular files under the requested roots. The
/// listing's own modification time dates every record.
pub struct StatListingWalker<'a> {
    vaults: Vec<Vault<'a>>,
    listing: PathBuf,
    timestamp: i64,
}

impl<'a> StatListingWalker<'a> {
    pub fn new(
        listing: &Path,
        roots: &[PathBuf],
        idm: &'a dyn IdentityManager,
        now: i64,
    ) -> Result<Self, SweepError> {
        let meta = fs::metadata(listing)
            .io_context(|| format!("Failed to stat {}", listing.display()))?;
        if !meta.is_file() {
            return Err(SweepError::io(
                format!("{} is not a file", listing.display()),
                io::Error::new(io::ErrorKind::InvalidInput, "stat listing"),
            ));
        }

        let timestamp = meta.mtime();
        if now - timestamp > restat_after_secs() {
            warn!("Stat listing is out of date; files will be forcibly re-stat'ed");
        }

        Ok(Self {
            vaults: vaults_for(roots, idm)?,
            listing: listing.to_path_buf(),
            timestamp,
        })
    }

    /// Parse one listing record into (path, facts); `None` for records
    /// that are not regular files or do not parse.
    fn parse_record(line: &str) -> Option<(PathBuf, FileFacts)> {
        let mut fields = line.split('\t');
        let encoded = fields.next()?;
        let stats: Vec<&str> = fields.collect();
        if stats.len() < FIELDS || stats[MODE] != "f" {
            return None;
        }

        let bytes = BASE64.decode(encoded.as_bytes()).ok()?;
        let path = PathBuf::from(std::ffi::OsString::from_vec(bytes));

        Some((
            path.clone(),
            FileFacts {
                device: stats[DEVICE].parse().ok()?,
                inode: stats[INODE].parse().ok()?,
                path,
                key: None,
                mtime: stats[MTIME].parse().ok()?,
                owner: stats[OWNER].parse().ok()?,
                group: stats[GROUP].parse().ok()?,
                size: stats[SIZE].parse().ok()?,
            },
        ))
    }
}

impl Walker for StatListingWalker<'_> {
    fn walk(
        &self,
        visit: &mut dyn FnMut(&Vault, WalkedFile, WalkStatus) -> Result<(), SweepError>,
    ) -> Result<(), SweepError> {
        let raw = fs::File::open(&self.listing)
            .io_context(|| format!("Failed to open {}", self.listing.display()))?;
        let reader = BufReader::new(GzDecoder::new(raw));

        for line in reader.lines() {
            let line =
                line.io_context(|| format!("Failed to read {}", self.listing.display()))?;
            if line.trim().is_empty() {
                continue;
            }

            let Some((path, facts)) = Self::parse_record(&line) else {
                debug!("Skipping stat record: {line}");
                continue;
            };

            // Only files under one of our vaults are of interest
            let Some(vault) = self.vaults.iter().find(|v| path.starts_with(v.root())) else {
                continue;
            };

            let file = WalkedFile::from_stat(facts, self.timestamp);
            if let Some(status) = classify(vault, &file) {
                visit(vault, file, status)?;
            }
        }

        Ok(())
    }
}
