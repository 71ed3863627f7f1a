// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Smoke tests for vault-db.
//!
//! These tests verify the schema, the replace-on-change file discipline,
//! warning re-arming, notification accounting and the purge rules using
//! an in-memory database.

use std::path::PathBuf;

use vault_db::{Criteria, Db, FileFacts, StateKind, Transition};

const NOW: i64 = 1_700_000_000;
const DAY: i64 = 86400;

fn facts(inode: u64, path: &str) -> FileFacts {
    FileFacts {
        device: 1,
        inode,
        path: PathBuf::from(path),
        key: None,
        mtime: NOW - 100 * DAY,
        owner: 1001,
        group: 2001,
        size: 4096,
    }
}

fn db_with_group() -> Db {
    let db = Db::open_memory().unwrap();
    db.register_group(2001, &[3001, 3002]).unwrap();
    db
}

#[test]
fn test_schema_creation() {
    let db = Db::open_memory().unwrap();
    assert!(db.has_schema().unwrap());
    assert_eq!(db.count_files().unwrap(), 0);
    assert!(db.stakeholders().unwrap().is_empty());
}

#[test]
fn test_persist_roundtrip() {
    let mut db = db_with_group();
    let observed = facts(42, "/g/proj/a.txt");

    let status = db.persist(&observed, Transition::Deleted, NOW).unwrap();
    assert!(status.is_some());

    let row = db.query_file(1, 42).unwrap().unwrap();
    assert!(row.same_facts(&observed));
    assert_eq!(row.facts.path, PathBuf::from("/g/proj/a.txt"));
    assert_eq!(row.facts.size, 4096);

    let statuses = db.statuses(row.id).unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].state, "deleted");
    assert_eq!(statuses[0].timestamp, NOW);
}

#[test]
fn test_duplicate_status_suppressed() {
    let mut db = db_with_group();
    let observed = facts(42, "/g/proj/a.txt");

    assert!(db.persist(&observed, Transition::Staged, NOW).unwrap().is_some());
    assert!(db.persist(&observed, Transition::Staged, NOW + 60).unwrap().is_none());

    let row = db.query_file(1, 42).unwrap().unwrap();
    assert_eq!(db.statuses(row.id).unwrap().len(), 1);
}

#[test]
fn test_changed_facts_replace_record() {
    let mut db = db_with_group();
    let observed = facts(42, "/g/proj/a.txt");
    db.persist(&observed, Transition::Warned { tminus: 72 }, NOW)
        .unwrap();
    let old_id = db.query_file(1, 42).unwrap().unwrap().id;

    // The file was touched: same identity, new mtime
    let mut touched = observed.clone();
    touched.mtime = NOW - 10 * DAY;
    db.persist(&touched, Transition::Warned { tminus: 72 }, NOW + 60)
        .unwrap();

    let row = db.query_file(1, 42).unwrap().unwrap();
    assert_ne!(row.id, old_id, "record must be re-inserted");
    assert_eq!(row.facts.mtime, touched.mtime);

    // History went with the old record; only the new warning remains
    let statuses = db.statuses(row.id).unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].timestamp, NOW + 60);
    assert!(db.statuses(old_id).unwrap().is_empty());
}

#[test]
fn test_key_updated_in_place() {
    let mut db = db_with_group();
    let observed = facts(42, "/g/proj/a.txt");
    db.persist(&observed, Transition::Staged, NOW).unwrap();
    let old_id = db.query_file(1, 42).unwrap().unwrap().id;

    let mut keyed = observed.clone();
    keyed.key = Some(PathBuf::from("/g/.vault/.staged/2a-YS50eHQ="));
    db.persist(&keyed, Transition::Staged, NOW + 1).unwrap();

    let row = db.query_file(1, 42).unwrap().unwrap();
    assert_eq!(row.id, old_id, "key change must not replace the record");
    assert_eq!(row.facts.key, keyed.key);
}

#[test]
fn test_warning_checkpoints_are_separate_events() {
    let mut db = db_with_group();
    let observed = facts(42, "/g/proj/a.txt");

    assert!(db
        .persist(&observed, Transition::Warned { tminus: 240 }, NOW)
        .unwrap()
        .is_some());
    assert!(db
        .persist(&observed, Transition::Warned { tminus: 72 }, NOW)
        .unwrap()
        .is_some());
    // Same checkpoint again: suppressed
    assert!(db
        .persist(&observed, Transition::Warned { tminus: 240 }, NOW + 60)
        .unwrap()
        .is_none());

    let row = db.query_file(1, 42).unwrap().unwrap();
    assert_eq!(db.statuses(row.id).unwrap().len(), 2);
}

#[test]
fn test_deleted_supersedes_warnings() {
    let mut db = db_with_group();
    let observed = facts(42, "/g/proj/a.txt");

    db.persist(&observed, Transition::Warned { tminus: 240 }, NOW)
        .unwrap();
    db.persist(&observed, Transition::Warned { tminus: 72 }, NOW)
        .unwrap();
    db.persist(&observed, Transition::Deleted, NOW + 60).unwrap();

    let row = db.query_file(1, 42).unwrap().unwrap();
    let statuses = db.statuses(row.id).unwrap();
    assert_eq!(statuses.len(), 1, "warnings purged by the deletion");
    assert_eq!(statuses[0].state, "deleted");

    // No warned rows survive to generate notifications
    let warned = db
        .files(&Criteria {
            state: StateKind::Warned,
            notified: Some(false),
            tminus: None,
            stakeholder: None,
        })
        .unwrap();
    assert!(warned.is_empty());
}

#[test]
fn test_stakeholders_are_owner_and_group_owners() {
    let mut db = db_with_group();
    db.persist(&facts(42, "/g/proj/a.txt"), Transition::Deleted, NOW)
        .unwrap();

    assert_eq!(db.stakeholders().unwrap(), vec![1001, 3001, 3002]);

    // Notifying one stakeholder leaves the others outstanding
    let notified = db
        .mark_notified(&Criteria::unnotified(StateKind::Deleted, 3001))
        .unwrap();
    assert_eq!(notified, 1);
    assert_eq!(db.stakeholders().unwrap(), vec![1001, 3002]);
}

#[test]
fn test_notification_is_idempotent() {
    let mut db = db_with_group();
    db.persist(&facts(42, "/g/proj/a.txt"), Transition::Deleted, NOW)
        .unwrap();

    assert_eq!(
        db.mark_notified(&Criteria::unnotified(StateKind::Deleted, 1001))
            .unwrap(),
        1
    );
    assert_eq!(
        db.mark_notified(&Criteria::unnotified(StateKind::Deleted, 1001))
            .unwrap(),
        0
    );
}

#[test]
fn test_files_by_criteria() {
    let mut db = db_with_group();
    db.persist(&facts(1, "/g/proj/a.txt"), Transition::Warned { tminus: 72 }, NOW)
        .unwrap();
    db.persist(&facts(2, "/g/proj/b.txt"), Transition::Warned { tminus: 24 }, NOW)
        .unwrap();
    db.persist(&facts(3, "/g/proj/c.txt"), Transition::Staged, NOW)
        .unwrap();

    let warned_72 = db
        .files(&Criteria {
            state: StateKind::Warned,
            notified: Some(false),
            tminus: Some(72),
            stakeholder: Some(3001),
        })
        .unwrap();
    assert_eq!(warned_72.len(), 1);
    assert_eq!(warned_72[0].facts.path, PathBuf::from("/g/proj/a.txt"));

    let staged = db
        .files(&Criteria::unnotified(StateKind::Staged, 1001))
        .unwrap();
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].facts.inode, 3);
}

#[test]
fn test_purge_fully_notified_deleted() {
    let mut db = db_with_group();
    let observed = facts(42, "/g/proj/a.txt");
    db.persist(&observed, Transition::Deleted, NOW).unwrap();

    // Partially notified: record must survive
    db.mark_notified(&Criteria::unnotified(StateKind::Deleted, 1001))
        .unwrap();
    db.purge(NOW).unwrap();
    assert_eq!(db.count_files().unwrap(), 1);

    for uid in [3001, 3002] {
        db.mark_notified(&Criteria::unnotified(StateKind::Deleted, uid))
            .unwrap();
    }
    db.purge(NOW).unwrap();
    assert_eq!(db.count_files().unwrap(), 0);
}

#[test]
fn test_purge_expires_stale_history() {
    let mut db = db_with_group();
    let observed = facts(42, "/g/proj/a.txt");
    let when = NOW - 91 * DAY;
    db.persist(&observed, Transition::Warned { tminus: 72 }, when)
        .unwrap();

    for uid in [1001, 3001, 3002] {
        db.mark_notified(&Criteria::unnotified(StateKind::Warned, uid))
            .unwrap();
    }

    // Not yet stale relative to its timestamp? 91 days is beyond the
    // 90-day horizon, so the record expires
    db.purge(NOW).unwrap();
    assert_eq!(db.count_files().unwrap(), 0);
}

#[test]
fn test_purge_keeps_recent_history() {
    let mut db = db_with_group();
    db.persist(&facts(42, "/g/proj/a.txt"), Transition::Warned { tminus: 72 }, NOW)
        .unwrap();

    for uid in [1001, 3001, 3002] {
        db.mark_notified(&Criteria::unnotified(StateKind::Warned, uid))
            .unwrap();
    }

    db.purge(NOW).unwrap();
    assert_eq!(db.count_files().unwrap(), 1);
}

#[test]
fn test_staged_queue_requires_full_notification() {
    let mut db = db_with_group();
    let mut a = facts(1, "/g/proj/a.txt");
    a.size = 100;
    let mut b = facts(2, "/g/proj/b.txt");
    b.size = 200;
    db.persist(&a, Transition::Staged, NOW).unwrap();
    db.persist(&b, Transition::Staged, NOW).unwrap();

    let (queue, _) = db.staged_queue().unwrap();
    assert!(queue.is_empty(), "unnotified files are not drainable");

    for uid in [1001, 3001, 3002] {
        db.mark_notified(&Criteria::unnotified(StateKind::Staged, uid))
            .unwrap();
    }

    let (queue, bytes) = db.staged_queue().unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(bytes, 300);

    // Drained rows leave the queue for good
    let ids: Vec<i64> = queue.iter().map(|f| f.id).collect();
    db.drained(&ids).unwrap();
    let (queue, bytes) = db.staged_queue().unwrap();
    assert!(queue.is_empty());
    assert_eq!(bytes, 0);
    assert_eq!(db.count_files().unwrap(), 0);
}

#[test]
fn test_ensure_staged_repairs_bare_records() {
    let mut db = db_with_group();
    let observed = facts(42, "/g/.vault/.staged/2a-YS50eHQ=");

    assert!(db.ensure_staged(&observed, NOW).unwrap());
    assert!(!db.ensure_staged(&observed, NOW + 1).unwrap());

    let row = db.query_file(1, 42).unwrap().unwrap();
    let statuses = db.statuses(row.id).unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].state, "staged");
}

#[test]
fn test_forget() {
    let mut db = db_with_group();
    db.persist(&facts(42, "/g/proj/a.txt"), Transition::Staged, NOW)
        .unwrap();

    assert!(db.forget(1, 42).unwrap());
    assert!(!db.forget(1, 42).unwrap());
    assert_eq!(db.count_files().unwrap(), 0);
}

#[test]
fn test_non_utf8_paths_roundtrip() {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt as _;

    let mut db = db_with_group();
    let mut observed = facts(42, "");
    observed.path = PathBuf::from(OsString::from_vec(b"/g/proj/caf\xe9".to_vec()));

    db.persist(&observed, Transition::Deleted, NOW).unwrap();
    let row = db.query_file(1, 42).unwrap().unwrap();
    assert_eq!(row.facts.path, observed.path);
}
