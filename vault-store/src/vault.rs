// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! The on-disk vault object.
//!
//! A vault is a `.vault` directory at the root of a homogroupic subtree
//! (the highest ancestor sharing the reference path's group). It tracks
//! files by hardlinking them into branch subdirectories under keys that
//! encode their inode and relative path; the filesystem itself is the
//! source of truth for branch membership.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt as _, PermissionsExt as _};
use std::path::{Path, PathBuf};

use nix::unistd::Gid;
use tracing::{debug, info};

use vault_core::error::{Error, IoContext, Result};
use vault_core::fs as vfs;
use vault_core::idm::IdentityManager;
use vault_core::{Branch, VaultKey, VAULT_DIR};

use crate::audit::AuditLog;
use crate::entry::{check_addable, TrackedFile};

/// Vault infrastructure permissions: ug+rwx with setgid.
const VAULT_PERMS: u32 = 0o2770;

pub struct Vault<'a> {
    root: PathBuf,
    location: PathBuf,
    group: u32,
    idm: &'a dyn IdentityManager,
    audit: AuditLog,
}

impl<'a> Vault<'a> {
    /// Open the vault covering `reference`; fail with `NoVault` if its
    /// homogroupic root has no `.vault` directory.
    pub fn open(reference: &Path, idm: &'a dyn IdentityManager) -> Result<Self> {
        Self::with_reference(reference, idm, false)
    }

    /// Open the vault covering `reference`, creating its infrastructure
    /// if it does not yet exist.
    pub fn open_or_create(reference: &Path, idm: &'a dyn IdentityManager) -> Result<Self> {
        Self::with_reference(reference, idm, true)
    }

    fn with_reference(reference: &Path, idm: &'a dyn IdentityManager, autocreate: bool) -> Result<Self> {
        let resolved = reference
            .canonicalize()
            .io_context(|| format!("Failed to resolve {}", reference.display()))?;

        if resolved.file_name() == Some(OsStr::new(VAULT_DIR)) {
            return Err(Error::IsVault(resolved));
        }

        let root = Self::find_root(&resolved)?;
        let location = root.join(VAULT_DIR);
        let group = fs::metadata(&root)
            .io_context(|| format!("Failed to stat {}", root.display()))?
            .gid();

        let created = !location.is_dir();
        if created {
            if !autocreate {
                return Err(Error::NoVault(root));
            }
            Self::create_infrastructure(&location, group)?;
        }

        // Branch directories are (re)created on every open
        for branch in Branch::ALL {
            Self::create_infrastructure(&location.join(branch.dirname()), group)?;
        }

        let audit = AuditLog::open(&location)
            .io_context(|| format!("Failed to open audit log in {}", location.display()))?;

        let vault = Self {
            root,
            location,
            group,
            idm,
            audit,
        };

        if created {
            let message = format!("vault created in {}", vault.root.display());
            info!("{message}");
            vault.audit.record(&message);
        }

        Ok(vault)
    }

    /// The root of the homogroupic subtree containing `reference`: climb
    /// while the parent directory carries the same group.
    fn find_root(resolved: &Path) -> Result<PathBuf> {
        let mut root = if resolved.is_dir() {
            resolved.to_path_buf()
        } else {
            resolved
                .parent()
                .ok_or_else(|| Error::NoVault(resolved.to_path_buf()))?
                .to_path_buf()
        };

        loop {
            let Some(parent) = root.parent() else { break };
            let here = fs::metadata(&root)
                .io_context(|| format!("Failed to stat {}", root.display()))?
                .gid();
            let above = fs::metadata(parent)
                .io_context(|| format!("Failed to stat {}", parent.display()))?
                .gid();
            if here != above {
                break;
            }
            root = parent.to_path_buf();
        }

        Ok(root)
    }

    fn create_infrastructure(path: &Path, group: u32) -> Result<()> {
        match fs::create_dir(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if !path.is_dir() {
                    return Err(Error::VaultConflict(path.to_path_buf()));
                }
                return Ok(());
            }
            Err(e) => {
                return Err(Error::io(
                    format!("Failed to create {}", path.display()),
                    e,
                ));
            }
        }

        // Group first, or the subsequent chmod would strip the setgid
        // bit. Under a setgid parent the kernel has already assigned the
        // right group, in which case the chown (which non-members may
        // not perform) is unnecessary.
        let current = fs::metadata(path)
            .io_context(|| format!("Failed to stat {}", path.display()))?
            .gid();
        if current != group {
            nix::unistd::chown(path, None, Some(Gid::from_raw(group))).map_err(|e| {
                Error::io(format!("Failed to set group on {}", path.display()), e.into())
            })?;
        }
        fs::set_permissions(path, fs::Permissions::from_mode(VAULT_PERMS))
            .io_context(|| format!("Failed to set permissions on {}", path.display()))?;

        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `.vault` directory.
    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn group(&self) -> u32 {
        self.group
    }

    pub fn branch_path(&self, branch: Branch) -> PathBuf {
        self.location.join(branch.dirname())
    }

    /// User IDs of the owners of this vault's group.
    pub fn owners(&self) -> Result<Vec<u32>> {
        let group = self
            .idm
            .group(self.group)?
            .ok_or_else(|| Error::NoSuchIdentity(format!("group {}", self.group)))?;
        Ok(group.owner_uids())
    }

    /// Append to the vault's audit log.
    pub fn audit(&self, message: &str) {
        self.audit.record(message);
    }

    /// The branch a path physically inside `.vault` belongs to, if any.
    pub fn branch_of_physical(&self, path: &Path) -> Option<Branch> {
        let relative = path.strip_prefix(&self.location).ok()?;
        let first = relative.components().next()?;
        Branch::from_dirname(first.as_os_str().to_str()?)
    }

    /// A source path relative to the vault root.
    ///
    /// Paths physically inside `.vault` are vault infrastructure, not
    /// sources; paths outside the root belong to some other vault.
    fn relative_path(&self, resolved: &Path) -> Result<PathBuf> {
        if resolved.starts_with(&self.location) {
            return Err(Error::IsVault(resolved.to_path_buf()));
        }
        resolved
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .map_err(|_| Error::NoVault(resolved.to_path_buf()))
    }

    fn tracked(&self, branch: Branch, key: VaultKey) -> TrackedFile {
        TrackedFile {
            path: self.branch_path(branch).join(key.path()),
            source: self.root.join(key.source()),
            branch,
            key,
        }
    }

    /// Find the key for `inode` in the given branch, following a chunked
    /// long-name chain down to its leaf.
    fn find_in_branch(&self, branch: Branch, inode: u64) -> Result<Option<VaultKey>> {
        let bpath = self.branch_path(branch);
        let (prefix, leaf_prefix) = VaultKey::inode_prefix(inode);

        let mut search = bpath.clone();
        if let Some(prefix) = &prefix {
            search.push(prefix);
        }
        if !search.is_dir() {
            return Ok(None);
        }

        let mut matched: Option<PathBuf> = None;
        for entry in
            fs::read_dir(&search).io_context(|| format!("Failed to read {}", search.display()))?
        {
            let entry =
                entry.io_context(|| format!("Failed to read {}", search.display()))?;
            if entry.file_name().to_string_lossy().starts_with(&leaf_prefix) {
                if matched.is_some() {
                    return Err(Error::corruption(format!(
                        "the vault in {} contains duplicate entries for inode {inode} in the {branch} branch",
                        self.root.display()
                    )));
                }
                matched = Some(entry.path());
            }
        }

        let Some(mut path) = matched else {
            return Ok(None);
        };

        while path.is_dir() {
            let children: Vec<_> = fs::read_dir(&path)
                .io_context(|| format!("Failed to read {}", path.display()))?
                .collect::<io::Result<_>>()
                .io_context(|| format!("Failed to read {}", path.display()))?;
            if children.len() != 1 {
                return Err(Error::corruption(format!(
                    "broken long-name key chain under {}",
                    path.display()
                )));
            }
            path = children[0].path();
        }

        let relative = path.strip_prefix(&bpath).map_err(|_| {
            Error::corruption(format!("key {} escapes its branch", path.display()))
        })?;
        let key = VaultKey::decode(relative)?;

        Ok((key.inode() == inode).then_some(key))
    }

    /// O(1)-by-structure lookup of an inode across all branches.
    pub fn lookup(&self, inode: u64) -> Result<Option<TrackedFile>> {
        let mut found: Option<(Branch, VaultKey)> = None;

        for branch in Branch::ALL {
            if let Some(key) = self.find_in_branch(branch, inode)? {
                if let Some((first, _)) = &found {
                    return Err(Error::corruption(format!(
                        "the vault in {} contains {} in both the {first} and {branch} branches",
                        self.root.display(),
                        key.source().display()
                    )));
                }
                found = Some((branch, key));
            }
        }

        Ok(found.map(|(branch, key)| self.tracked(branch, key)))
    }

    /// Admit a regular file into `branch`, hardlinking it under its key.
    ///
    /// If the inode is already tracked with a stale key (renamed source)
    /// or in a branch the transition permits, the entry is corrected by
    /// rename. Transitions into `staged`/`limbo` are reserved to the
    /// machinery; an inode already in one of those branches cannot be
    /// re-annotated.
    pub fn add(&self, branch: Branch, source: &Path) -> Result<TrackedFile> {
        let resolved = source
            .canonicalize()
            .io_context(|| format!("Failed to resolve {}", source.display()))?;
        if !vfs::is_regular(&resolved) {
            return Err(Error::NotRegular(resolved));
        }

        let relative = self.relative_path(&resolved)?;
        let inode = vfs::inode(&resolved)
            .io_context(|| format!("Failed to stat {}", resolved.display()))?;
        let expected = VaultKey::new(inode, &relative, vfs::name_max(&self.location));

        if let Some(existing) = self.lookup(inode)? {
            if existing.branch == branch && existing.key == expected {
                debug!(
                    "{} is already in the {branch} branch of the vault in {}",
                    resolved.display(),
                    self.root.display()
                );
                return Ok(existing);
            }

            let allowed = existing.branch == branch
                || (existing.branch.is_user_facing() && branch.is_user_facing())
                || (matches!(existing.branch, Branch::Archive | Branch::Stash)
                    && branch == Branch::Staged);
            if !allowed {
                return Err(Error::AlreadyTracked {
                    path: resolved,
                    branch: existing.branch,
                });
            }

            return self.relocate(existing, branch, expected, &resolved);
        }

        check_addable(&resolved)?;

        let entry = self.tracked(branch, expected);
        self.make_key_parents(&entry.path)?;
        fs::hard_link(&resolved, &entry.path)
            .io_context(|| format!("Failed to link {} into the vault", resolved.display()))?;

        let message = format!("{} added to the {branch} branch", resolved.display());
        info!("{message} of the vault in {}", self.root.display());
        self.audit.record(&message);

        Ok(entry)
    }

    /// Rename an existing entry to a corrected key and/or branch.
    fn relocate(
        &self,
        existing: TrackedFile,
        to: Branch,
        key: VaultKey,
        resolved: &Path,
    ) -> Result<TrackedFile> {
        let entry = self.tracked(to, key);
        self.make_key_parents(&entry.path)?;
        fs::rename(&existing.path, &entry.path).io_context(|| {
            format!(
                "Failed to move vault entry {} to {}",
                existing.path.display(),
                entry.path.display()
            )
        })?;
        self.prune(existing.path.parent(), existing.branch);

        let message = if existing.branch == to {
            format!("vault entry for {} corrected", resolved.display())
        } else {
            format!(
                "{} moved from the {} branch to the {to} branch",
                resolved.display(),
                existing.branch
            )
        };
        info!("{message} in the vault in {}", self.root.display());
        self.audit.record(&message);

        Ok(entry)
    }

    /// Move an inode between branches by rename.
    pub fn move_entry(&self, inode: u64, from: Branch, to: Branch) -> Result<TrackedFile> {
        let key = self
            .find_in_branch(from, inode)?
            .ok_or_else(|| Error::NotTracked(self.branch_path(from).join(format!("{inode:x}"))))?;
        let existing = self.tracked(from, key.clone());
        let source = existing.source.clone();
        self.relocate(existing, to, key, &source)
    }

    /// Remove an entry from whichever user-facing branch tracks `source`.
    ///
    /// Only the file's owner or a group owner may untrack it.
    pub fn remove(&self, source: &Path, caller: u32) -> Result<TrackedFile> {
        let resolved = source
            .canonicalize()
            .io_context(|| format!("Failed to resolve {}", source.display()))?;

        let owner = fs::metadata(&resolved)
            .io_context(|| format!("Failed to stat {}", resolved.display()))?
            .uid();
        if caller != owner && !self.owners()?.contains(&caller) {
            return Err(Error::PermissionDenied(format!(
                "uid {caller} is neither the owner of {} nor a group owner",
                resolved.display()
            )));
        }

        let inode = vfs::inode(&resolved)
            .io_context(|| format!("Failed to stat {}", resolved.display()))?;
        let existing = self
            .lookup(inode)?
            .filter(|e| e.branch.is_user_facing())
            .ok_or_else(|| Error::NotTracked(resolved.clone()))?;

        fs::remove_file(&existing.path)
            .io_context(|| format!("Failed to unlink {}", existing.path.display()))?;
        self.prune(existing.path.parent(), existing.branch);

        let message = format!(
            "{} removed from the {} branch",
            resolved.display(),
            existing.branch
        );
        info!("{message} of the vault in {}", self.root.display());
        self.audit.record(&message);

        Ok(existing)
    }

    /// Unlink a physical vault entry (machinery path) and prune emptied
    /// ancestors.
    pub fn unlink_physical(&self, path: &Path) -> Result<()> {
        let branch = self
            .branch_of_physical(path)
            .ok_or_else(|| Error::NotTracked(path.to_path_buf()))?;

        fs::remove_file(path)
            .io_context(|| format!("Failed to unlink {}", path.display()))?;
        self.prune(path.parent(), branch);

        self.audit
            .record(&format!("{} unlinked from the {branch} branch", path.display()));
        Ok(())
    }

    /// Enumerate a branch as (source, entry) tracked files.
    pub fn list(&self, branch: Branch) -> Result<Vec<TrackedFile>> {
        let bpath = self.branch_path(branch);
        let mut entries = Vec::new();
        self.walk_branch(&bpath, &bpath, branch, &mut entries)?;
        Ok(entries)
    }

    fn walk_branch(
        &self,
        dir: &Path,
        bpath: &Path,
        branch: Branch,
        out: &mut Vec<TrackedFile>,
    ) -> Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }

        for entry in fs::read_dir(dir).io_context(|| format!("Failed to read {}", dir.display()))? {
            let entry = entry.io_context(|| format!("Failed to read {}", dir.display()))?;
            let path = entry.path();
            if path.is_dir() {
                self.walk_branch(&path, bpath, branch, out)?;
            } else if vfs::is_regular(&path) {
                let relative = path.strip_prefix(bpath).map_err(|_| {
                    Error::corruption(format!("key {} escapes its branch", path.display()))
                })?;
                let key = VaultKey::decode(relative)?;
                out.push(self.tracked(branch, key));
            }
        }

        Ok(())
    }

    /// Restore a limbo entry to its original source location, resetting
    /// its modification time; fails if something already lives there.
    pub fn recover(&self, entry: &TrackedFile) -> Result<()> {
        if entry.source.exists() {
            return Err(Error::VaultConflict(entry.source.clone()));
        }

        let parent = entry.source.parent().ok_or_else(|| {
            Error::NoVault(entry.source.clone())
        })?;
        if !parent.is_dir() {
            return Err(Error::io(
                format!(
                    "the parent directory of {} no longer exists",
                    entry.source.display()
                ),
                io::Error::new(io::ErrorKind::NotFound, "destination parent missing"),
            ));
        }

        fs::rename(&entry.path, &entry.source).io_context(|| {
            format!("Failed to restore {}", entry.source.display())
        })?;
        vfs::touch(&entry.source)
            .io_context(|| format!("Failed to touch {}", entry.source.display()))?;
        self.prune(entry.path.parent(), Branch::Limbo);

        let message = format!("{} recovered from limbo", entry.source.display());
        info!("{message} in the vault in {}", self.root.display());
        self.audit.record(&message);

        Ok(())
    }

    fn make_key_parents(&self, target: &Path) -> Result<()> {
        let Some(parent) = target.parent() else {
            return Ok(());
        };

        let mut missing = Vec::new();
        let mut current = parent.to_path_buf();
        while !current.exists() {
            missing.push(current.clone());
            match current.parent() {
                Some(p) => current = p.to_path_buf(),
                None => break,
            }
        }

        for dir in missing.into_iter().rev() {
            Self::create_infrastructure(&dir, self.group)?;
        }

        Ok(())
    }

    /// Remove now-empty key directories from `from` up to the branch
    /// root. Stops at the first non-empty level.
    fn prune(&self, from: Option<&Path>, branch: Branch) {
        let bpath = self.branch_path(branch);
        let Some(start) = from else { return };

        let mut current = start.to_path_buf();
        while current != bpath && current.starts_with(&bpath) {
            if fs::remove_dir(&current).is_err() {
                break;
            }
            match current.parent() {
                Some(p) => current = p.to_path_buf(),
                None => break,
            }
        }
    }
}
