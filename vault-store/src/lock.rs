// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! `flock()`-based locks.
//!
//! Two kinds of lock guard the vault:
//!
//! - A cooperative per-vault lock (`.vault/.lock`) serialising CLI
//!   invocations against the sweeper for the same vault.
//! - A non-blocking advisory probe on source files, so the sweeper never
//!   destroys a file another process is still writing and never livelocks
//!   against an interactive writer.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

/// Name of the cooperative lock file inside `.vault`.
const LOCK_FILE: &str = ".lock";

/// An exclusive lock on a vault, backed by `flock()` on `.vault/.lock`.
///
/// The lock is released when this value is dropped.
pub struct VaultLock {
    _flock: Flock<File>,
    _lock_path: PathBuf,
}

impl VaultLock {
    /// Acquire the vault's cooperative lock (blocking).
    ///
    /// Creates the lock file if it doesn't exist.
    pub fn lock(vault_location: &Path) -> io::Result<Self> {
        let lock_path = vault_location.join(LOCK_FILE);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        let flock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            io::Error::new(io::ErrorKind::Other, format!("flock failed: {errno}"))
        })?;

        Ok(Self {
            _flock: flock,
            _lock_path: lock_path,
        })
    }
}

/// A non-blocking exclusive probe on a source file.
///
/// Held while the sweeper unlinks or moves the file; released on drop.
pub struct WriteLock {
    _flock: Flock<File>,
}

impl WriteLock {
    /// Try to take an exclusive advisory lock on `path`.
    ///
    /// Returns `Ok(None)` when another process holds the lock; the caller
    /// skips the file and the next sweep is a cheap retry.
    pub fn try_lock(path: &Path) -> io::Result<Option<Self>> {
        let file = OpenOptions::new().read(true).open(path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => Ok(Some(Self { _flock: flock })),
            Err((_, Errno::EWOULDBLOCK)) => Ok(None),
            Err((_, errno)) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("flock failed: {errno}"),
            )),
        }
    }
}
