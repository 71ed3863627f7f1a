// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! The batch half of the retention system.
//!
//! `sandman` walks vault-covered trees, warns owners ahead of deletion,
//! soft-deletes expired untracked files into limbo, hard-deletes files
//! whose limbo grace has elapsed, stages archive-marked files, notifies
//! stakeholders, and finally drains the staged backlog into the
//! downstream handler. Sweep and drain are single, sequential phases
//! within one process invocation.

pub mod drain;
pub mod error;
pub mod interrupt;
pub mod mail;
pub mod notify;
pub mod policy;
pub mod sweep;
pub mod walk;

pub use error::SweepError;
