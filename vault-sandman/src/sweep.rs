// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! The sweep phase.
//!
//! For each walked file the sweeper decides soft-delete, hard-delete,
//! stage, warn or no-op, and executes the decision with the filesystem
//! operation strictly before the database commit. A crash between the two
//! leaves an on-disk state the next sweep recognises and resumes, so
//! every destructive transition is idempotent.
//!
//! In dry-run mode decisions are logged as if executed (with their
//! would-be persistence effects) but neither the filesystem nor the
//! database is touched, and the drain phase does not run.

use std::collections::HashSet;
use std::fs;

use tracing::{debug, error, info, warn};

use vault_core::config::{Config, Deletion};
use vault_core::error::Error;
use vault_core::fs as vfs;
use vault_core::idm::IdentityManager;
use vault_core::quorum::Agreed;
use vault_core::{Branch, VaultKey};
use vault_db::{Db, FileFacts, Transition};
use vault_store::{check_addable, Vault, VaultLock, WriteLock};

use crate::error::SweepError;
use crate::interrupt;
use crate::policy::{deletion_gate, DeletionVote};
use crate::walk::{WalkStatus, WalkedFile, Walker};

pub struct Sweeper<'a> {
    config: &'a Config,
    db: &'a mut Db,
    idm: &'a dyn IdentityManager,
    gate: Agreed<DeletionVote>,
    dry_run: bool,
    now: i64,
    known_users: HashSet<u32>,
    known_groups: HashSet<u32>,
}

impl<'a> Sweeper<'a> {
    pub fn new(
        config: &'a Config,
        db: &'a mut Db,
        idm: &'a dyn IdentityManager,
        dry_run: bool,
        now: i64,
    ) -> Result<Self, SweepError> {
        Ok(Self {
            config,
            db,
            idm,
            gate: deletion_gate()?,
            dry_run,
            now,
            known_users: HashSet::new(),
            known_groups: HashSet::new(),
        })
    }

    /// Walk the files and pass them off to be handled.
    pub fn sweep(&mut self, walker: &dyn Walker) -> Result<(), SweepError> {
        walker.walk(&mut |vault, file, status| self.handle(vault, file, status))
    }

    fn handle(
        &mut self,
        vault: &Vault,
        file: WalkedFile,
        status: WalkStatus,
    ) -> Result<(), SweepError> {
        // Signals stop the sweep between decisions, never inside one
        if interrupt::pending() {
            return Err(SweepError::Interrupted);
        }

        let path = file.path().to_path_buf();
        match self.dispatch(vault, file, status) {
            Ok(()) => Ok(()),
            Err(e) if e.is_per_file() => {
                error!("Skipping {}: {e}", path.display());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn dispatch(
        &mut self,
        vault: &Vault,
        file: WalkedFile,
        status: WalkStatus,
    ) -> Result<(), SweepError> {
        self.ensure_identities(&file)?;

        match status {
            WalkStatus::Outside => self.outside(vault, file),
            // A soft delete interrupted between the limbo link and the
            // source unlink resumes as if the file were still untracked
            WalkStatus::Tracked(Branch::Limbo) => self.outside(vault, file),
            WalkStatus::Tracked(Branch::Keep) => self.keep(vault, file),
            WalkStatus::Tracked(Branch::Archive) => self.stage(vault, file, true),
            WalkStatus::Tracked(Branch::Stash) => self.stage(vault, file, false),
            WalkStatus::Tracked(Branch::Staged) => self.resume_staged(vault, file),
            WalkStatus::Physical(branch) => self.physical(vault, file, branch),
            WalkStatus::Corrupt(message) => Err(Error::VaultCorruption(message).into()),
        }
    }

    /// Fail fast when an owner or group cannot be resolved, so that
    /// silently-undeletable files surface instead of lingering.
    fn ensure_identities(&mut self, file: &WalkedFile) -> Result<(), SweepError> {
        let facts = file.facts();

        if !self.known_users.contains(&facts.owner) {
            self.idm
                .user(facts.owner)?
                .ok_or_else(|| Error::NoSuchIdentity(format!("user {}", facts.owner)))?;
            self.known_users.insert(facts.owner);
        }

        if !self.known_groups.contains(&facts.group) {
            let group = self
                .idm
                .group(facts.group)?
                .ok_or_else(|| Error::NoSuchIdentity(format!("group {}", facts.group)))?;
            if !self.dry_run {
                self.db.register_group(facts.group, &group.owner_uids())?;
            }
            self.known_groups.insert(facts.group);
        }

        Ok(())
    }

    /// Untracked files age towards soft deletion, with warnings at the
    /// configured checkpoints on the way.
    fn outside(&mut self, vault: &Vault, mut file: WalkedFile) -> Result<(), SweepError> {
        debug!("{} is untracked", file.path().display());

        // Check now that the file will be actionable when its time comes
        if let Err(e) = check_addable(file.path()) {
            warn!("{} cannot be actioned: {e}", file.path().display());
            return Ok(());
        }

        file.restat_if_stale(self.now)
            .map_err(|e| SweepError::io(format!("Failed to re-stat {}", file.path().display()), e))?;

        let threshold_secs = self.config.deletion.threshold_duration().as_secs();
        let vote = DeletionVote {
            age_secs: file.age(self.now),
            threshold_secs,
        };

        if self.gate.check(&vote)? {
            self.soft_delete(vault, &file)
        } else {
            self.warn_checkpoints(&file, threshold_secs)
        }
    }

    fn soft_delete(&mut self, vault: &Vault, file: &WalkedFile) -> Result<(), SweepError> {
        let path = file.path();

        let Some(_lock) = WriteLock::try_lock(path)
            .map_err(|e| SweepError::io(format!("Failed to probe lock on {}", path.display()), e))?
        else {
            info!(
                "Skipping: {} has passed the soft-deletion threshold, but is locked by another process",
                path.display()
            );
            return Ok(());
        };

        info!(
            "Deleting: {} has passed the soft-deletion threshold",
            path.display()
        );
        if self.dry_run {
            info!(
                "Dry run: would move {} to limbo and record a deleted status",
                path.display()
            );
            return Ok(());
        }

        // Capture the facts before the source disappears
        let facts = file.facts().clone();

        // Link into limbo, reset the limbo clock, unlink the source, then
        // commit; the limbo link must exist before the source goes
        let _vault_lock = lock_vault(vault)?;
        let limboed = vault.add(Branch::Limbo, path)?;
        vfs::touch(&limboed.path)
            .map_err(|e| SweepError::io(format!("Failed to touch {}", limboed.path.display()), e))?;

        let links = vfs::hardlinks(path)
            .map_err(|e| SweepError::io(format!("Failed to stat {}", path.display()), e))?;
        if links < 2 {
            return Err(Error::corruption(format!(
                "{} has no limbo link to fall back on",
                path.display()
            ))
            .into());
        }

        if let Err(e) = fs::remove_file(path) {
            error!("Could not soft-delete {}: {e}", path.display());
            return Ok(());
        }
        info!("{} has been soft-deleted", path.display());

        self.db.persist(&facts, Transition::Deleted, self.now)?;
        vault.audit(&format!("{} soft-deleted into limbo", path.display()));
        Ok(())
    }

    /// Record a warning for every checkpoint the file has passed,
    /// smallest first. Checkpoint rows persisted for an earlier mtime no
    /// longer count; touching a file re-arms its warnings.
    fn warn_checkpoints(&mut self, file: &WalkedFile, threshold_secs: u64) -> Result<(), SweepError> {
        let remaining = threshold_secs.saturating_sub(file.age(self.now));

        for &hours in &self.config.deletion.warnings {
            if remaining > Deletion::warning_duration(hours).as_secs() {
                continue;
            }

            if self.dry_run {
                info!(
                    "Dry run: would record a deletion warning (T-{hours}h) for {}",
                    file.path().display()
                );
                continue;
            }

            let appended = self
                .db
                .persist(file.facts(), Transition::Warned { tminus: hours }, self.now)?;
            if appended.is_some() {
                info!(
                    "Warning: {} will be deleted within {hours} hours",
                    file.path().display()
                );
            }
        }

        Ok(())
    }

    /// Kept files are never deleted; with a keep threshold configured
    /// they are silently untracked once it passes, after which normal
    /// ageing applies.
    fn keep(&mut self, vault: &Vault, file: WalkedFile) -> Result<(), SweepError> {
        debug!(
            "{} is in the keep branch of the vault in {}",
            file.path().display(),
            vault.root().display()
        );

        let Some(keep) = self.config.deletion.keep_duration() else {
            return Ok(());
        };
        if file.age(self.now) < keep.as_secs() {
            return Ok(());
        }

        info!(
            "Untracking: {} has passed the keep threshold",
            file.path().display()
        );
        if self.dry_run {
            info!("Dry run: would untrack {}", file.path().display());
            return Ok(());
        }

        let _vault_lock = lock_vault(vault)?;
        if let Some(entry) = vault.lookup(file.facts().inode)? {
            vault.unlink_physical(&entry.path)?;
        }
        Ok(())
    }

    /// Move an archive- or stash-marked source into the staged branch.
    fn stage(&mut self, vault: &Vault, file: WalkedFile, delete_source: bool) -> Result<(), SweepError> {
        let path = file.path();

        let Some(_lock) = WriteLock::try_lock(path)
            .map_err(|e| SweepError::io(format!("Failed to probe lock on {}", path.display()), e))?
        else {
            info!(
                "Skipping: {} is marked for archival, but is locked by another process",
                path.display()
            );
            return Ok(());
        };

        info!("Staging {} for archival", path.display());
        if self.dry_run {
            info!(
                "Dry run: would stage {} and record a staged status",
                path.display()
            );
            return Ok(());
        }

        // Move first: the staged link keeps the data alive before the
        // source may go
        let _vault_lock = lock_vault(vault)?;
        let staged = vault.add(Branch::Staged, path)?;

        if delete_source {
            let links = vfs::hardlinks(&staged.path)
                .map_err(|e| SweepError::io(format!("Failed to stat {}", staged.path.display()), e))?;
            if links < 2 {
                warn!("{} has no source left to remove", staged.path.display());
            } else if let Err(e) = fs::remove_file(path) {
                error!("Could not hard-delete {}: {e}", path.display());
            }
        }

        let mut facts = file.facts().clone();
        facts.key = Some(staged.path.clone());
        self.db.persist(&facts, Transition::Staged, self.now)?;

        vault.audit(&format!("{} staged for archival", path.display()));
        info!("{} has been staged for archival", path.display());
        Ok(())
    }

    /// A source whose inode already sits in the staged branch: a
    /// stash-staged file (sources survive staging) or a staging
    /// interrupted before its commit. Never destroy the source; make
    /// sure the queue row exists so the drain can proceed.
    fn resume_staged(&mut self, vault: &Vault, file: WalkedFile) -> Result<(), SweepError> {
        if self.dry_run {
            return Ok(());
        }

        let Some(entry) = vault.lookup(file.facts().inode)? else {
            return Ok(());
        };

        let mut facts = file.facts().clone();
        facts.key = Some(entry.path);
        self.db.persist(&facts, Transition::Staged, self.now)?;
        Ok(())
    }

    /// Files physically inside the vault: corruption checks, the staged
    /// queue reconciliation, and hard deletion out of limbo.
    fn physical(&mut self, vault: &Vault, file: WalkedFile, branch: Branch) -> Result<(), SweepError> {
        let path = file.path();
        debug!(
            "{} is physically contained within the vault in {}",
            path.display(),
            vault.root().display()
        );

        match branch {
            Branch::Keep | Branch::Archive | Branch::Stash => {
                let links = vfs::hardlinks(path)
                    .map_err(|e| SweepError::io(format!("Failed to stat {}", path.display()), e))?;
                if links == 1 {
                    // The source vanished underneath us; the user chose
                    // permanent loss
                    warn!(
                        "Corruption detected: {} does not link to any source",
                        path.display()
                    );
                    if !self.dry_run {
                        let _vault_lock = lock_vault(vault)?;
                        match vault.unlink_physical(path) {
                            Ok(()) => info!("Corruption corrected: {} deleted", path.display()),
                            Err(e) => error!("Could not delete {}: {e}", path.display()),
                        }
                    }
                }
                Ok(())
            }

            Branch::Staged => {
                // The filesystem says staged; make sure the database
                // agrees, so the entry is not stranded outside the queue
                if !self.dry_run {
                    let facts = self.staged_facts(vault, &file)?;
                    self.db.ensure_staged(&facts, self.now)?;
                }
                Ok(())
            }

            Branch::Limbo => self.limbo(vault, file),
        }
    }

    /// Reconstruct queue facts for a physical staged entry: the key path
    /// encodes the original source.
    fn staged_facts(&self, vault: &Vault, file: &WalkedFile) -> Result<FileFacts, SweepError> {
        let relative = file
            .path()
            .strip_prefix(vault.branch_path(Branch::Staged))
            .map_err(|_| Error::corruption(format!("{} escapes its branch", file.path().display())))?;
        let key = VaultKey::decode(relative)?;

        let mut facts = file.facts().clone();
        facts.path = vault.root().join(key.source());
        facts.key = Some(file.path().to_path_buf());
        Ok(facts)
    }

    fn limbo(&mut self, vault: &Vault, file: WalkedFile) -> Result<(), SweepError> {
        let path = file.path();

        let links = vfs::hardlinks(path)
            .map_err(|e| SweepError::io(format!("Failed to stat {}", path.display()), e))?;
        if links > 1 {
            warn!(
                "Corruption detected: limbo entry {} has more than one hardlink",
                path.display()
            );
        }

        // Limbo ageing runs from the mtime reset at soft-deletion
        let vote = DeletionVote {
            age_secs: file.age(self.now),
            threshold_secs: self.config.deletion.limbo_duration().as_secs(),
        };
        if !self.gate.check(&vote)? {
            return Ok(());
        }

        info!(
            "Permanently deleting: {} has passed the hard-deletion threshold",
            path.display()
        );
        if self.dry_run {
            info!("Dry run: would unlink {}", path.display());
            return Ok(());
        }

        // No status append: the deleted status has existed since the
        // soft delete
        let _vault_lock = lock_vault(vault)?;
        match vault.unlink_physical(path) {
            Ok(()) => vault.audit(&format!("{} hard-deleted from limbo", path.display())),
            Err(e) => error!("Could not delete {}: {e}", path.display()),
        }
        Ok(())
    }
}

/// Take the vault's cooperative lock, serialising against user CLI
/// invocations on the same vault.
fn lock_vault(vault: &Vault) -> Result<VaultLock, SweepError> {
    VaultLock::lock(vault.location()).map_err(|e| {
        SweepError::io(
            format!("Failed to lock the vault in {}", vault.root().display()),
            e,
        )
    })
}
