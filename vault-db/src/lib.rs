// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! SQLite database interface for retention metadata.
//!
//! This crate tracks the facts the filesystem cannot: which warnings have
//! been issued for which files at which checkpoints, which stakeholders
//! have been notified of which events, and which staged files await the
//! drain. The filesystem stays the source of truth for branch membership;
//! this database is the source of truth for notification history.
//!
//! # Key Features
//!
//! - Full schema support (files, statuses, warnings, notifications,
//!   groups and the stakeholder views)
//! - Replace-on-change file records keyed by (device, inode)
//! - Purge rules for fully-notified and expired history
//! - In-memory database for testing
//!
//! # Example
//!
//! ```ignore
//! use vault_db::{Db, OpenMode, Transition};
//!
//! let mut db = Db::open("/var/lib/vault/vault.db", OpenMode::Create)?;
//! db.persist(&facts, Transition::Warned { tminus: 72 }, now)?;
//! ```

mod connection;
mod error;
mod query;
mod schema;
mod types;
mod write;

pub use connection::{Db, OpenMode};
pub use error::{Error, Result};
pub use schema::SCHEMA_VERSION;
pub use types::*;
