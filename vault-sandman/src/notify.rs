// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Stakeholder notification.
//!
//! After the sweep, every stakeholder with outstanding events gets
//! exactly one message summarising what will happen and what has
//! happened, with gzipped full listings attached. Only a successful send
//! marks the covered (status, stakeholder) pairs as notified; failures
//! are retried by the next sweep.

use std::fmt::Write as _;

use tracing::{debug, error, info};

use vault_core::config::Config;
use vault_core::error::Error;
use vault_core::idm::{IdentityManager, User};
use vault_db::{summarise_by_group, Criteria, Db, FileRow, StateKind};

use crate::error::SweepError;
use crate::mail::{gzipped_fofn, Message, Postman};

const SUBJECT: &str = "Action Required: Vault Summary";

/// Build and dispatch per-stakeholder summaries, recording notification
/// rows for everything a successful send covered.
pub fn notify(
    db: &mut Db,
    config: &Config,
    idm: &dyn IdentityManager,
    postman: &dyn Postman,
) -> Result<(), SweepError> {
    for uid in db.stakeholders()? {
        let user = idm
            .user(uid)?
            .ok_or_else(|| Error::NoSuchIdentity(format!("user {uid}")))?;
        debug!("Creating e-mail for UID {uid}");

        let deleted = db.files(&Criteria::unnotified(StateKind::Deleted, uid))?;
        let staged = db.files(&Criteria::unnotified(StateKind::Staged, uid))?;

        let mut warned = Vec::new();
        for &hours in &config.deletion.warnings {
            let due = db.files(&Criteria {
                state: StateKind::Warned,
                notified: Some(false),
                tminus: Some(hours),
                stakeholder: Some(uid),
            })?;
            warned.push((hours, due));
        }

        if deleted.is_empty() && staged.is_empty() && warned.iter().all(|(_, due)| due.is_empty())
        {
            debug!("Skipping: trivial e-mail");
            continue;
        }

        let message = build_message(&user, &warned, &deleted, &staged, idm)?;
        match postman.send(&message, &user.email) {
            Ok(()) => {
                info!("Sent summary e-mail to {} ({})", user.name, user.email);

                db.mark_notified(&Criteria::unnotified(StateKind::Deleted, uid))?;
                db.mark_notified(&Criteria::unnotified(StateKind::Staged, uid))?;
                for (hours, due) in &warned {
                    if !due.is_empty() {
                        db.mark_notified(&Criteria {
                            state: StateKind::Warned,
                            notified: Some(false),
                            tminus: Some(*hours),
                            stakeholder: Some(uid),
                        })?;
                    }
                }
            }
            Err(e) => {
                // Leave the rows un-notified; the next sweep retries
                error!("Could not notify {} ({}): {e}", user.name, user.email);
            }
        }
    }

    Ok(())
}

fn build_message(
    user: &User,
    warned: &[(u64, Vec<FileRow>)],
    deleted: &[FileRow],
    staged: &[FileRow],
    idm: &dyn IdentityManager,
) -> Result<Message, SweepError> {
    let mut body = String::new();
    let _ = writeln!(body, "Dear {},", user.name);
    let _ = writeln!(body);
    let _ = writeln!(
        body,
        "This is a summary of the retention activity in the vaults that"
    );
    let _ = writeln!(body, "manage files you are responsible for.");
    let _ = writeln!(body);

    for (hours, due) in warned {
        if due.is_empty() {
            continue;
        }
        section(
            &mut body,
            &format!(
                "The space of the following files will be reclaimed within {hours} hours\n\
                 unless they are kept, archived or touched:"
            ),
            due,
            idm,
        )?;
    }

    if !deleted.is_empty() {
        section(
            &mut body,
            "The space of the following files has been reclaimed this sweep; they\n\
             remain recoverable with `vault recover` until the grace period lapses:",
            deleted,
            idm,
        )?;
    }

    if !staged.is_empty() {
        section(
            &mut body,
            "The following files will be handed to the archive handler shortly:",
            staged,
            idm,
        )?;
    }

    let _ = writeln!(body, "A complete listing of each category is attached.");

    let mut message = Message::new(SUBJECT, body);
    for (hours, due) in warned {
        if !due.is_empty() {
            message.attach(gzipped_fofn(&format!("delete-{hours}.fofn.gz"), &paths(due))?);
        }
    }
    if !deleted.is_empty() {
        message.attach(gzipped_fofn("deleted.fofn.gz", &paths(deleted))?);
    }
    if !staged.is_empty() {
        message.attach(gzipped_fofn("staged.fofn.gz", &paths(staged))?);
    }

    Ok(message)
}

/// One summary line per group: count, MiB total and the common prefix.
fn section(
    body: &mut String,
    heading: &str,
    rows: &[FileRow],
    idm: &dyn IdentityManager,
) -> Result<(), SweepError> {
    let _ = writeln!(body, "{heading}");
    for (gid, summary) in summarise_by_group(rows) {
        let name = idm
            .group(gid)?
            .map(|g| g.name)
            .unwrap_or_else(|| gid.to_string());
        let _ = writeln!(
            body,
            "  {name}: {} file(s), {:.2} MiB under {}",
            summary.count,
            summary.size as f64 / (1024.0 * 1024.0),
            summary.path.display()
        );
    }
    let _ = writeln!(body);
    Ok(())
}

fn paths(rows: &[FileRow]) -> Vec<std::path::PathBuf> {
    rows.iter().map(|row| row.facts.path.clone()).collect()
}
