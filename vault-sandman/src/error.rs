// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

use thiserror::Error;

use vault_core::quorum::QuorumError;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error(transparent)]
    Vault(#[from] vault_core::Error),

    #[error("Database error: {0}")]
    Db(#[from] vault_db::Error),

    /// The deletion predicates disagreed; always fatal
    #[error("Consensus failed: {0}")]
    Consensus(#[from] QuorumError),

    #[error("Mail error: {0}")]
    Mail(#[from] crate::mail::MailError),

    /// A termination signal arrived; stop between file decisions
    #[error("interrupted by signal")]
    Interrupted,

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

impl SweepError {
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Whether the sweeper may log this error and carry on with the next
    /// file. Consensus failures, unresolvable identities, corruption it
    /// cannot repair and database errors terminate the process instead.
    pub fn is_per_file(&self) -> bool {
        match self {
            SweepError::Vault(e) => matches!(
                e,
                vault_core::Error::NotRegular(_)
                    | vault_core::Error::PermissionDenied(_)
                    | vault_core::Error::NotTracked(_)
                    | vault_core::Error::AlreadyTracked { .. }
                    | vault_core::Error::MalformedKey(_)
                    | vault_core::Error::Io { .. }
            ),
            SweepError::Io { .. } => true,
            SweepError::Db(_)
            | SweepError::Consensus(_)
            | SweepError::Mail(_)
            | SweepError::Interrupted => false,
        }
    }
}
