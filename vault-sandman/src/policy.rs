// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! The deletion policy.
//!
//! Whether a file's age has met a threshold is the one question this
//! system must never get wrong, so it is answered three times over by
//! independently written predicates behind the consensus gate. All three
//! work at second granularity on the attributes passed in; none touches
//! the filesystem.

use vault_core::quorum::{Agreed, QuorumError};

/// The attributes a deletion decision is made from.
#[derive(Debug, Clone, Copy)]
pub struct DeletionVote {
    /// Seconds since the file's last modification.
    pub age_secs: u64,
    /// The configured threshold, in seconds.
    pub threshold_secs: u64,
}

fn elapsed_at_least(vote: &DeletionVote) -> bool {
    vote.age_secs >= vote.threshold_secs
}

fn no_time_remaining(vote: &DeletionVote) -> bool {
    vote.threshold_secs.saturating_sub(vote.age_secs) == 0
}

fn checked_subtraction(vote: &DeletionVote) -> bool {
    vote.age_secs.checked_sub(vote.threshold_secs).is_some()
}

/// The consensus gate over the three deletion predicates.
pub fn deletion_gate() -> Result<Agreed<DeletionVote>, QuorumError> {
    Agreed::new(vec![
        ("elapsed_at_least", elapsed_at_least as fn(&DeletionVote) -> bool),
        ("no_time_remaining", no_time_remaining),
        ("checked_subtraction", checked_subtraction),
    ])
}
