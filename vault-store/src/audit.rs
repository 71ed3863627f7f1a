// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Append-only audit log kept inside each vault.
//!
//! Every mutating vault operation appends a line to `.vault/.audit`, in
//! addition to the process-level tracing output, so each project tree
//! carries its own history.

use std::fs::OpenOptions;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

/// Name of the audit file inside `.vault`.
const AUDIT_FILE: &str = ".audit";

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Open (creating if necessary) the audit log for a vault.
    pub fn open(vault_location: &Path) -> io::Result<Self> {
        let path = vault_location.join(AUDIT_FILE);
        OpenOptions::new().append(true).create(true).open(&path)?;
        Ok(Self { path })
    }

    /// Append a timestamped record.
    ///
    /// Audit failures must never abort the operation they describe, so
    /// they are logged and swallowed.
    pub fn record(&self, message: &str) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let uid = nix::unistd::getuid().as_raw();

        let result = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "[{timestamp}] uid={uid} {message}"));

        if let Err(e) = result {
            warn!("Could not append to audit log {}: {e}", self.path.display());
        }
    }
}
