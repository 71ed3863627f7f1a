//! Core types for the vault retention system.
//!
//! A *vault* is a hardlink-based side channel kept in a `.vault` directory
//! at the root of a homogroupic subtree. Files are tracked by hardlinking
//! them into branch subdirectories under a key that encodes their inode and
//! relative path. This crate holds the pieces everything else builds on:
//! the branch model, the key codec, filesystem and identity helpers, the
//! consensus combinator and the configuration schema.

pub mod branch;
pub mod config;
pub mod error;
pub mod fs;
pub mod idm;
pub mod key;
pub mod quorum;

pub use branch::Branch;
pub use config::Config;
pub use error::{Error, Result};
pub use key::VaultKey;

/// Name of the vault directory at the root of a homogroupic subtree.
pub const VAULT_DIR: &str = ".vault";
