// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Read query operations for retention metadata.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension as _, Row};

use crate::connection::Db;
use crate::error::Result;
use crate::types::{blob_to_path, Criteria, FileFacts, FileRow, Status};

pub(crate) fn row_to_file(row: &Row) -> rusqlite::Result<FileRow> {
    Ok(FileRow {
        id: row.get(0)?,
        facts: FileFacts {
            device: row.get::<_, i64>(1)? as u64,
            inode: row.get::<_, i64>(2)? as u64,
            path: blob_to_path(row.get::<_, Vec<u8>>(3)?),
            key: row.get::<_, Option<Vec<u8>>>(4)?.map(blob_to_path),
            mtime: row.get(5)?,
            owner: row.get::<_, i64>(6)? as u32,
            group: row.get::<_, i64>(7)? as u32,
            size: row.get::<_, i64>(8)? as u64,
        },
    })
}

pub(crate) fn file_by_ids(conn: &Connection, device: u64, inode: u64) -> Result<Option<FileRow>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT files.id, files.device, files.inode, files.path, files.key,
               files.mtime, files.owner, files.group_id, files.size
        FROM files
        WHERE device = ?1 AND inode = ?2
        "#,
    )?;

    let row = stmt
        .query_row(params![device as i64, inode as i64], row_to_file)
        .optional()?;
    Ok(row)
}

impl Db {
    /// Look up a file record by its (device, inode) identity.
    pub fn query_file(&self, device: u64, inode: u64) -> Result<Option<FileRow>> {
        file_by_ids(&self.conn, device, inode)
    }

    /// User IDs with any outstanding (un-notified) status event.
    pub fn stakeholders(&self) -> Result<Vec<u32>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT stakeholder FROM stakeholders ORDER BY stakeholder")?;

        let mut uids = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            uids.push(row.get::<_, i64>(0)? as u32);
        }
        Ok(uids)
    }

    /// Fetch the files matching the given status criteria.
    pub fn files(&self, criteria: &Criteria) -> Result<Vec<FileRow>> {
        let mut sql = String::from(
            r#"
            SELECT DISTINCT files.id, files.device, files.inode, files.path, files.key,
                            files.mtime, files.owner, files.group_id, files.size
            FROM files
            JOIN stakeholder_notified sn ON sn.file = files.id
            "#,
        );
        let mut values: Vec<Value> = vec![Value::from(criteria.state.as_str().to_string())];

        if criteria.tminus.is_some() {
            sql.push_str(" JOIN warnings w ON w.status = sn.id");
        }
        sql.push_str(" WHERE sn.state = ?");

        if let Some(notified) = criteria.notified {
            sql.push_str(" AND sn.notified = ?");
            values.push(Value::from(notified));
        }
        if let Some(stakeholder) = criteria.stakeholder {
            sql.push_str(" AND sn.stakeholder = ?");
            values.push(Value::from(stakeholder as i64));
        }
        if let Some(tminus) = criteria.tminus {
            sql.push_str(" AND w.tminus = ?");
            values.push(Value::from(tminus as i64));
        }
        sql.push_str(" ORDER BY files.path");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_file)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The drain backlog: files whose `staged` status is fully notified,
    /// together with the total byte size required downstream.
    pub fn staged_queue(&self) -> Result<(Vec<FileRow>, u64)> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT files.id, files.device, files.inode, files.path, files.key,
                   files.mtime, files.owner, files.group_id, files.size
            FROM files
            WHERE files.id IN (
                SELECT file
                FROM stakeholder_notified
                WHERE state = 'staged'
                GROUP BY file
                HAVING min(notified) = 1
            )
            ORDER BY files.id
            "#,
        )?;

        let rows = stmt.query_map([], row_to_file)?;
        let queue = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        let bytes = queue.iter().map(|f| f.facts.size).sum();
        Ok((queue, bytes))
    }

    /// All status rows for a file, oldest first.
    pub fn statuses(&self, file: i64) -> Result<Vec<Status>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, file, state, timestamp FROM status WHERE file = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![file], |row| {
            Ok(Status {
                id: row.get(0)?,
                file: row.get(1)?,
                state: row.get(2)?,
                timestamp: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Count live file records.
    pub fn count_files(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
