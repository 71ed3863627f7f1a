// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! The drain phase.
//!
//! Once the staged backlog crosses its threshold (or a drain is forced),
//! the downstream handler is probed for readiness and the backlog is
//! streamed, NUL-delimited, into its stdin. Only a clean handler exit
//! removes the drained rows; any failure leaves the queue intact for the
//! next scheduled run. The drainer never retries on its own.

use std::io::Write as _;
use std::os::unix::ffi::OsStrExt as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{error, info, warn};

use vault_core::config::Config;
use vault_core::fs as vfs;
use vault_db::Db;

#[derive(Error, Debug)]
pub enum DrainError {
    #[error("the staging queue is empty")]
    QueueEmpty,

    #[error("only {0} files to archive; use --force-drain to ignore the threshold")]
    UnderThreshold(usize),

    #[error("the downstream handler is busy")]
    HandlerBusy,

    #[error("the downstream handler is out of capacity")]
    HandlerNoCapacity,

    #[error("the downstream handler failed unexpectedly")]
    HandlerFailed,

    #[error("interrupted by signal")]
    Interrupted,

    #[error("handler IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(#[from] vault_db::Error),
}

/// The downstream archive handler executable.
struct Handler {
    path: PathBuf,
}

impl Handler {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Probe readiness for the given required capacity, in bytes.
    ///
    /// Exit 0 means ready, 1 busy, 2 insufficient capacity; anything
    /// else is an error.
    fn preflight(&self, required: u64) -> Result<(), DrainError> {
        let status = Command::new(&self.path)
            .arg("ready")
            .arg(required.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;

        match status.code() {
            Some(0) => Ok(()),
            Some(1) => Err(DrainError::HandlerBusy),
            Some(2) => Err(DrainError::HandlerNoCapacity),
            _ => Err(DrainError::HandlerFailed),
        }
    }

    /// Stream the staged paths, NUL-delimited, through the handler's
    /// stdin. The handler owns unlinking the physical staged hardlinks.
    fn consume(&self, files: &[PathBuf]) -> Result<(), DrainError> {
        let mut child = Command::new(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or(DrainError::HandlerFailed)?;
            for file in files {
                // Abort between files; the queue stays intact
                if crate::interrupt::pending() {
                    return Err(DrainError::Interrupted);
                }
                info!("Draining: {}", file.display());
                stdin.write_all(file.as_os_str().as_bytes())?;
                stdin.write_all(b"\0")?;
            }
        }
        // Dropping the pipe closes the handler's stdin
        drop(child.stdin.take());

        if !child.wait()?.success() {
            return Err(DrainError::HandlerFailed);
        }
        Ok(())
    }
}

/// Run the drain phase; the returned code feeds the process exit status.
pub fn drain(db: &mut Db, config: &Config, force: bool) -> i32 {
    match try_drain(db, config, force) {
        Ok(count) => {
            info!("Successfully drained {count} files into the downstream handler");
            0
        }
        Err(DrainError::QueueEmpty) => {
            info!("Staging queue is empty");
            0
        }
        Err(e @ DrainError::UnderThreshold(_)) => {
            info!("Skipping: {e}");
            0
        }
        Err(DrainError::HandlerBusy) => {
            warn!("The downstream handler is busy; try again later...");
            0
        }
        Err(DrainError::Interrupted) => {
            warn!("Drain interrupted; the queue is left intact");
            0
        }
        Err(DrainError::HandlerNoCapacity) => {
            error!("The downstream handler is reporting it is out of capacity and cannot proceed");
            1
        }
        Err(e) => {
            error!("The drain failed: {e}; the queue is left intact");
            1
        }
    }
}

fn try_drain(db: &mut Db, config: &Config, force: bool) -> Result<usize, DrainError> {
    let (queue, required) = db.staged_queue()?;
    if queue.is_empty() {
        return Err(DrainError::QueueEmpty);
    }
    if queue.len() < config.archive.threshold && !force {
        return Err(DrainError::UnderThreshold(queue.len()));
    }

    // Reconcile against the filesystem: a queue row whose staged
    // hardlink has vanished is forgotten, not drained
    let mut ids = Vec::new();
    let mut files = Vec::new();
    for row in &queue {
        match &row.facts.key {
            Some(key) if vfs::is_regular(key) => {
                ids.push(row.id);
                files.push(key.clone());
            }
            Some(key) => {
                warn!(
                    "Skipping: {} is not a regular file or does not exist",
                    key.display()
                );
                db.forget(row.facts.device, row.facts.inode)?;
            }
            None => {
                warn!("Skipping: staged record {}:{} has no key", row.facts.device, row.facts.inode);
                db.forget(row.facts.device, row.facts.inode)?;
            }
        }
    }
    if files.is_empty() {
        return Err(DrainError::QueueEmpty);
    }

    let handler = Handler::new(&config.archive.handler);
    info!("Checking downstream handler is ready for {required} bytes...");
    handler.preflight(required)?;

    info!("Handler is ready; beginning drain...");
    handler.consume(&files)?;

    db.drained(&ids)?;
    Ok(files.len())
}
