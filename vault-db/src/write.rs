// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Write operations for retention metadata.
//!
//! Every sweep decision commits in a single transaction here, after the
//! corresponding filesystem operation has already happened; a crash
//! between the two leaves an on-disk state the next sweep recognises and
//! repeats idempotently.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension as _, Transaction};
use tracing::debug;

use crate::connection::Db;
use crate::error::Result;
use crate::query::file_by_ids;
use crate::types::{path_to_blob, Criteria, FileFacts, StateKind, Transition};

/// Days a fully-notified, non-staged history is retained before expiry.
const EXPIRY_DAYS: i64 = 90;

fn insert_file(tx: &Transaction, facts: &FileFacts) -> Result<i64> {
    tx.execute(
        r#"
        INSERT INTO files (device, inode, path, key, mtime, owner, group_id, size)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            facts.device as i64,
            facts.inode as i64,
            path_to_blob(&facts.path),
            facts.key.as_deref().map(path_to_blob),
            facts.mtime,
            facts.owner as i64,
            facts.group as i64,
            facts.size as i64,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// The ID of an equivalent, still-armed status, if one exists.
///
/// A `warned` row only counts when its checkpoint matches and its
/// timestamp does not predate the file's current mtime; a touched file
/// re-arms its warnings.
fn status_exists(
    tx: &Transaction,
    file_id: i64,
    facts: &FileFacts,
    transition: Transition,
) -> Result<Option<i64>> {
    let found = match transition {
        Transition::Warned { tminus } => tx
            .query_row(
                r#"
                SELECT status.id
                FROM status
                JOIN warnings ON warnings.status = status.id
                WHERE status.file = ?1
                  AND warnings.tminus = ?2
                  AND status.timestamp >= ?3
                "#,
                params![file_id, tminus as i64, facts.mtime],
                |row| row.get(0),
            )
            .optional()?,
        _ => tx
            .query_row(
                "SELECT id FROM status WHERE file = ?1 AND state = ?2",
                params![file_id, transition.kind().as_str()],
                |row| row.get(0),
            )
            .optional()?,
    };
    Ok(found)
}

impl Db {
    /// Record a group and its owners, replacing any previous owner set.
    pub fn register_group(&self, gid: u32, owners: &[u32]) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO groups (gid) VALUES (?1)",
            params![gid as i64],
        )?;
        self.conn.execute(
            "DELETE FROM group_owners WHERE gid = ?1",
            params![gid as i64],
        )?;
        for owner in owners {
            self.conn.execute(
                "INSERT OR IGNORE INTO group_owners (gid, owner) VALUES (?1, ?2)",
                params![gid as i64, *owner as i64],
            )?;
        }
        Ok(())
    }

    /// Persist a file and a state transition against it.
    ///
    /// The file record is replaced (cascading its history away) when the
    /// observed facts have changed; only the vault key is updated in
    /// place. An equivalent, still-armed status suppresses the append and
    /// `None` is returned. A `deleted` transition supersedes: the file's
    /// earlier non-deleted statuses are purged in the same transaction so
    /// a deleted file is never also warned about.
    pub fn persist(
        &mut self,
        facts: &FileFacts,
        transition: Transition,
        now: i64,
    ) -> Result<Option<i64>> {
        let tx = self.conn.transaction()?;
        let status = persist_in(&tx, facts, transition, now)?;
        tx.commit()?;
        Ok(status)
    }

    /// Repair path: a staged hardlink with no database record gets a bare
    /// file row and a fresh `staged` status; an existing record is left
    /// untouched. Returns whether a repair happened.
    pub fn ensure_staged(&mut self, facts: &FileFacts, now: i64) -> Result<bool> {
        let tx = self.conn.transaction()?;

        if file_by_ids(&tx, facts.device, facts.inode)?.is_some() {
            tx.commit()?;
            return Ok(false);
        }

        debug!(
            "Re-inserting bare record for staged {}:{}",
            facts.device, facts.inode
        );
        let file_id = insert_file(&tx, facts)?;
        tx.execute(
            "INSERT INTO status (file, state, timestamp) VALUES (?1, 'staged', ?2)",
            params![file_id, now],
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Record that every (status, stakeholder) pair matching the criteria
    /// has been informed. Returns the number of new notification rows.
    pub fn mark_notified(&self, criteria: &Criteria) -> Result<usize> {
        let mut sql = String::from(
            r#"
            INSERT OR IGNORE INTO notifications (status, stakeholder)
            SELECT sn.id, sn.stakeholder
            FROM stakeholder_notified sn
            "#,
        );
        let mut values: Vec<Value> = vec![Value::from(criteria.state.as_str().to_string())];

        if criteria.tminus.is_some() {
            sql.push_str(" JOIN warnings w ON w.status = sn.id");
        }
        sql.push_str(" WHERE sn.state = ? AND sn.notified = 0");

        if let Some(stakeholder) = criteria.stakeholder {
            sql.push_str(" AND sn.stakeholder = ?");
            values.push(Value::from(stakeholder as i64));
        }
        if let Some(tminus) = criteria.tminus {
            sql.push_str(" AND w.tminus = ?");
            values.push(Value::from(tminus as i64));
        }

        let changed = self.conn.execute(&sql, params_from_iter(values))?;
        Ok(changed)
    }

    /// Forget a file record outright (the hardlink it described is gone).
    pub fn forget(&self, device: u64, inode: u64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM files WHERE device = ?1 AND inode = ?2",
            params![device as i64, inode as i64],
        )?;
        Ok(rows > 0)
    }

    /// Remove the given drained files from the queue entirely.
    pub fn drained(&mut self, file_ids: &[i64]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for id in file_ids {
            tx.execute("DELETE FROM files WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Housekeeping, run at initialisation and after each sweep:
    ///
    /// 1. A file whose `deleted` status is fully notified loses its prior
    ///    non-deleted statuses first (silencing stale warnings), then the
    ///    record itself.
    /// 2. A file all of whose non-staged statuses are fully notified and
    ///    older than the expiry horizon is removed, unless it still sits
    ///    in the staging queue.
    pub fn purge(&mut self, now: i64) -> Result<()> {
        let tx = self.conn.transaction()?;

        let fully_deleted: Vec<i64> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT file
                FROM stakeholder_notified
                WHERE state = 'deleted'
                GROUP BY file
                HAVING min(notified) = 1
                "#,
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        for file in &fully_deleted {
            debug!("Purging fully-notified deleted file record {file}");
            tx.execute(
                "DELETE FROM status WHERE file = ?1 AND state != 'deleted'",
                params![file],
            )?;
            tx.execute("DELETE FROM files WHERE id = ?1", params![file])?;
        }

        let cutoff = now - EXPIRY_DAYS * 86400;
        let expired = tx.execute(
            r#"
            DELETE FROM files
            WHERE id IN (
                SELECT file
                FROM stakeholder_notified
                WHERE state != 'staged'
                GROUP BY file
                HAVING min(notified) = 1 AND max(timestamp) <= ?1
            )
            AND id NOT IN (SELECT file FROM status WHERE state = 'staged')
            "#,
            params![cutoff],
        )?;
        if expired > 0 {
            debug!("Expired {expired} fully-notified file records");
        }

        tx.commit()?;
        Ok(())
    }
}

fn persist_in(
    tx: &Transaction,
    facts: &FileFacts,
    transition: Transition,
    now: i64,
) -> Result<Option<i64>> {
    let file_tag = format!("{}:{}", facts.device, facts.inode);

    let file_id = match file_by_ids(tx, facts.device, facts.inode)? {
        Some(row) if !row.same_facts(facts) => {
            // Facts changed: replace the record, cascading old statuses
            debug!("Deleting stale records for file {file_tag}");
            tx.execute("DELETE FROM files WHERE id = ?1", params![row.id])?;
            debug!("Persisting file {file_tag}");
            insert_file(tx, facts)?
        }
        Some(row) => {
            if row.facts.key != facts.key {
                debug!("Updating persisted key for {file_tag}");
                tx.execute(
                    "UPDATE files SET key = ?2 WHERE id = ?1",
                    params![row.id, facts.key.as_deref().map(path_to_blob)],
                )?;
            }
            row.id
        }
        None => {
            debug!("Persisting file {file_tag}");
            insert_file(tx, facts)?
        }
    };

    if status_exists(tx, file_id, facts, transition)?.is_some() {
        return Ok(None);
    }

    debug!(
        "Setting {} status for file {file_tag}",
        transition.kind().as_str()
    );
    tx.execute(
        "INSERT INTO status (file, state, timestamp) VALUES (?1, ?2, ?3)",
        params![file_id, transition.kind().as_str(), now],
    )?;
    let status_id = tx.last_insert_rowid();

    if let Transition::Warned { tminus } = transition {
        tx.execute(
            "INSERT INTO warnings (status, tminus) VALUES (?1, ?2)",
            params![status_id, tminus as i64],
        )?;
    }

    if transition.kind() == StateKind::Deleted {
        // Deletion supersedes any outstanding warnings for the file
        tx.execute(
            "DELETE FROM status WHERE file = ?1 AND state != 'deleted'",
            params![file_id],
        )?;
    }

    Ok(Some(status_id))
}
