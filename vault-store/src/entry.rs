// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Vault entries and admission checks.

use std::fs;
use std::os::unix::fs::MetadataExt as _;
use std::path::PathBuf;

use vault_core::error::{Error, IoContext, Result};
use vault_core::fs as vfs;
use vault_core::{Branch, VaultKey};

/// Mode bits for "readable and writable by owner and group".
const UG_RW: u32 = 0o660;

/// Mode bits for "writable and executable by owner and group".
const UG_WX: u32 = 0o330;

/// A file tracked by a vault: the branch it lives in, its key, and the
/// absolute locations of the hardlink and the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    pub branch: Branch,
    pub key: VaultKey,
    /// Absolute path of the hardlink inside the vault.
    pub path: PathBuf,
    /// Absolute path of the source file.
    pub source: PathBuf,
}

impl TrackedFile {
    /// The hardlink count of the vault-side entry.
    pub fn hardlinks(&self) -> Result<u64> {
        vfs::hardlinks(&self.path)
            .io_context(|| format!("Failed to stat vault entry {}", self.path.display()))
    }
}

/// Check a source file is admissible to a vault.
///
/// The file must be regular, readable and writable by both its owner and
/// group, carry equal owner and group permission bits, and live in a
/// directory the owner and group can write and search. Each failure is a
/// distinct error so callers can report precisely.
pub fn check_addable(source: &std::path::Path) -> Result<()> {
    if !vfs::is_regular(source) {
        return Err(Error::NotRegular(source.to_path_buf()));
    }

    let mode = fs::metadata(source)
        .io_context(|| format!("Failed to stat {}", source.display()))?
        .mode();

    if mode & UG_RW != UG_RW {
        return Err(Error::PermissionDenied(format!(
            "{} is not read-writable by both its owner and group",
            source.display()
        )));
    }

    if (mode & 0o700) >> 3 != mode & 0o070 {
        return Err(Error::PermissionDenied(format!(
            "the owner and group permissions do not match for {}",
            source.display()
        )));
    }

    let parent = source.parent().ok_or_else(|| {
        Error::PermissionDenied(format!("{} has no parent directory", source.display()))
    })?;
    let parent_mode = fs::metadata(parent)
        .io_context(|| format!("Failed to stat {}", parent.display()))?
        .mode();

    if parent_mode & UG_WX != UG_WX {
        return Err(Error::PermissionDenied(format!(
            "the parent directory of {} is not writable and executable by both its owner and group",
            source.display()
        )));
    }

    Ok(())
}
