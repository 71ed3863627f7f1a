use std::path::PathBuf;

use thiserror::Error;

use crate::branch::Branch;

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by vault and key operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No vault covers the given reference path
    #[error("No vault contains {0}")]
    NoVault(PathBuf),

    /// The reference path is itself a vault
    #[error("{0} is a vault")]
    IsVault(PathBuf),

    /// A user file occupies the place of vault infrastructure
    #[error("Cannot create vault infrastructure at {0}: a user file already exists")]
    VaultConflict(PathBuf),

    /// Non-regular file passed where a regular file is required
    #[error("{0} is not a regular file")]
    NotRegular(PathBuf),

    /// Upfront permission checks failed, or the caller lacks rights
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// File not present in the expected branch
    #[error("{0} is not tracked by the vault")]
    NotTracked(PathBuf),

    /// Inode already present in a branch that does not permit moves
    #[error("{path} is already tracked in the {branch} branch")]
    AlreadyTracked { path: PathBuf, branch: Branch },

    /// Link-count or key inconsistency
    #[error("Vault corruption: {0}")]
    VaultCorruption(String),

    /// Unreadable vault key
    #[error("Malformed vault key: {0}")]
    MalformedKey(String),

    /// The identity manager cannot resolve a user or group
    #[error("No identity found for {0}")]
    NoSuchIdentity(String),

    /// Configuration could not be loaded or did not validate
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error with context
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::VaultCorruption(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }
}

/// Helper trait for adding context to IO errors
pub trait IoContext<T> {
    fn io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::io(f(), e))
    }
}
