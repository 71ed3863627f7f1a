// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! The CLI verbs: annotate, view, untrack and recover.
//!
//! Every verb surfaces per-file failures as logs and a summary exit
//! status; a run only fails wholesale when its vault cannot be found.

use std::io::BufRead as _;
use std::os::unix::fs::MetadataExt as _;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use vault_core::config::Config;
use vault_core::error::{Error, Result};
use vault_core::idm::IdentityManager;
use vault_core::Branch;
use vault_store::{TrackedFile, Vault, VaultLock};

use crate::paths::{absolutise, relativise};

/// Exit statuses of the `vault` executable.
pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_INVALID: i32 = 2;
pub const EXIT_NO_VAULT: i32 = 3;

/// Listing scope for `--view`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ViewContext {
    /// Every file in the branch
    All,
    /// Only descendants of the working directory
    Here,
    /// Only files owned by the caller
    Mine,
}

pub struct Session<'a> {
    pub config: &'a Config,
    pub idm: &'a dyn IdentityManager,
    pub caller: u32,
}

impl Session<'_> {
    /// Groups with too few owners are ineligible for vault operations.
    fn check_eligible(&self, vault: &Vault) -> Result<()> {
        let owners = vault.owners()?;
        if owners.len() < self.config.min_group_owners {
            return Err(Error::PermissionDenied(format!(
                "group {} has fewer than {} owners and is ineligible for vault operations",
                vault.group(),
                self.config.min_group_owners
            )));
        }
        Ok(())
    }

    /// Annotate files into a user-facing branch.
    pub fn add(&self, branch: Branch, files: &[PathBuf]) -> i32 {
        let mut failures = 0;

        for file in files {
            let file = resolve_symlink(file);
            let outcome = Vault::open_or_create(&file, self.idm).and_then(|vault| {
                let _lock = lock(&vault)?;
                self.check_eligible(&vault)?;
                vault.add(branch, &file)
            });

            match outcome {
                Ok(entry) => info!(
                    "{} is annotated for {}",
                    entry.source.display(),
                    entry.branch
                ),
                Err(e) => {
                    error!("Cannot annotate {}: {e}", file.display());
                    failures += 1;
                }
            }
        }

        summary(failures)
    }

    /// Remove files from whichever user-facing branch tracks them.
    pub fn untrack(&self, files: &[PathBuf]) -> i32 {
        let mut failures = 0;

        for file in files {
            let file = resolve_symlink(file);
            let outcome = Vault::open(&file, self.idm).and_then(|vault| {
                let _lock = lock(&vault)?;
                vault.remove(&file, self.caller)
            });

            match outcome {
                Ok(entry) => info!(
                    "{} is no longer annotated for {}",
                    entry.source.display(),
                    entry.branch
                ),
                Err(e) => {
                    error!("Cannot untrack {}: {e}", file.display());
                    failures += 1;
                }
            }
        }

        summary(failures)
    }

    /// List a branch's contents relative to the working directory.
    pub fn view(&self, branch: Branch, context: ViewContext, absolute: bool) -> i32 {
        let cwd = match std::env::current_dir() {
            Ok(cwd) => cwd,
            Err(e) => {
                error!("Cannot determine the working directory: {e}");
                return EXIT_FAILURE;
            }
        };

        let vault = match Vault::open(&cwd, self.idm) {
            Ok(vault) => vault,
            Err(e @ Error::NoVault(_)) => {
                error!("{e}");
                return EXIT_NO_VAULT;
            }
            Err(e) => {
                error!("{e}");
                return EXIT_FAILURE;
            }
        };

        let entries = match vault.list(branch) {
            Ok(entries) => entries,
            Err(e) => {
                error!("Cannot list the {branch} branch: {e}");
                return EXIT_FAILURE;
            }
        };

        for entry in entries {
            if !self.in_context(&entry, context, &cwd) {
                continue;
            }
            if absolute {
                println!("{}", entry.source.display());
            } else {
                println!("{}", relativise(&entry.source, &cwd).display());
            }
        }

        EXIT_OK
    }

    fn in_context(&self, entry: &TrackedFile, context: ViewContext, cwd: &Path) -> bool {
        match context {
            ViewContext::All => true,
            ViewContext::Here => entry.source.starts_with(cwd),
            ViewContext::Mine => {
                // The source is gone for limbo entries; owners follow
                // the hardlink either way
                std::fs::metadata(&entry.path)
                    .map(|meta| meta.uid() == self.caller)
                    .unwrap_or(false)
            }
        }
    }

    /// Restore soft-deleted files from limbo.
    ///
    /// Targets are named by their original source location (which no
    /// longer exists), resolved lexically against the working directory.
    pub fn recover(&self, all: bool, files: &[PathBuf]) -> i32 {
        let cwd = match std::env::current_dir() {
            Ok(cwd) => cwd,
            Err(e) => {
                error!("Cannot determine the working directory: {e}");
                return EXIT_FAILURE;
            }
        };

        let vault = match Vault::open(&cwd, self.idm) {
            Ok(vault) => vault,
            Err(e @ Error::NoVault(_)) => {
                error!("{e}");
                return EXIT_NO_VAULT;
            }
            Err(e) => {
                error!("{e}");
                return EXIT_FAILURE;
            }
        };

        let _lock = match lock(&vault) {
            Ok(lock) => lock,
            Err(e) => {
                error!("{e}");
                return EXIT_FAILURE;
            }
        };

        let limboed = match vault.list(Branch::Limbo) {
            Ok(limboed) => limboed,
            Err(e) => {
                error!("Cannot list recoverable files: {e}");
                return EXIT_FAILURE;
            }
        };

        let mut failures = 0;
        if all {
            for entry in &limboed {
                failures += self.recover_one(&vault, entry);
            }
        } else {
            for file in files {
                let wanted = absolutise(file, &cwd);
                match limboed.iter().find(|entry| entry.source == wanted) {
                    Some(entry) => failures += self.recover_one(&vault, entry),
                    None => {
                        error!("{} is not recoverable", wanted.display());
                        failures += 1;
                    }
                }
            }
        }

        summary(failures)
    }

    fn recover_one(&self, vault: &Vault, entry: &TrackedFile) -> i32 {
        match vault.recover(entry) {
            Ok(()) => {
                info!("{} has been recovered", entry.source.display());
                0
            }
            Err(e) => {
                error!("Cannot recover {}: {e}", entry.source.display());
                1
            }
        }
    }
}

fn lock(vault: &Vault) -> Result<VaultLock> {
    VaultLock::lock(vault.location()).map_err(|e| {
        Error::io(
            format!("Failed to lock the vault in {}", vault.root().display()),
            e,
        )
    })
}

fn summary(failures: i32) -> i32 {
    if failures > 0 {
        error!("{failures} file(s) could not be processed");
        EXIT_FAILURE
    } else {
        EXIT_OK
    }
}

/// Resolve symlinked arguments, warning that the original is acted on.
fn resolve_symlink(path: &Path) -> PathBuf {
    if path.is_symlink() {
        if let Ok(resolved) = path.canonicalize() {
            warn!(
                "{} is a symlink; acting on the original file: {}",
                path.display(),
                resolved.display()
            );
            return resolved;
        }
    }
    path.to_path_buf()
}

/// Gather the target files from positional arguments or a
/// file-of-filenames; the positional cap does not apply to FOFN input.
pub fn gather(
    files: &[PathBuf],
    fofn: Option<&Path>,
    cap: Option<usize>,
) -> std::result::Result<Vec<PathBuf>, String> {
    match fofn {
        Some(fofn) => {
            if !files.is_empty() {
                return Err("FILE arguments and --fofn are mutually exclusive".into());
            }
            let file = std::fs::File::open(fofn)
                .map_err(|e| format!("cannot read {}: {e}", fofn.display()))?;
            let mut gathered = Vec::new();
            for line in std::io::BufReader::new(file).lines() {
                let line = line.map_err(|e| format!("cannot read {}: {e}", fofn.display()))?;
                let trimmed = line.trim_end();
                if !trimmed.is_empty() {
                    gathered.push(PathBuf::from(trimmed));
                }
            }
            Ok(gathered)
        }
        None => {
            if files.is_empty() {
                return Err("one of the arguments FILE or --fofn is required".into());
            }
            if let Some(cap) = cap {
                if files.len() > cap {
                    return Err(format!(
                        "too many FILEs; you may specify no more than {cap}"
                    ));
                }
            }
            Ok(files.to_vec())
        }
    }
}
