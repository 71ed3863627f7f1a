// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! End-to-end tests for the sweep, notification and drain phases.
//!
//! Each test builds a real homogroupic tree inside a tempdir, an
//! in-memory database and a static identity map, then advances a
//! synthetic clock through the sweeper instead of back-dating files.

use std::cell::RefCell;
use std::fs;
use std::os::unix::fs::{MetadataExt as _, PermissionsExt as _};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use nix::unistd::Gid;
use tempfile::TempDir;

use vault_core::config::{Archive, Config, Deletion, Email, Persistence};
use vault_core::idm::StaticIdm;
use vault_core::Branch;
use vault_db::{system_time_to_unix, Criteria, Db, StateKind};
use vault_sandman::mail::{MailError, Message, PipePostman, Postman};
use vault_sandman::notify::notify;
use vault_sandman::sweep::Sweeper;
use vault_sandman::walk::FilesystemWalker;
use vault_sandman::{drain, SweepError};

const DAY: i64 = 86400;

/// Make sure the homogroupic climb stops at the fixture root: a plain
/// user's tempdir already differs in group from `/tmp`, while a root run
/// (everything gid 0) needs the fixture moved into another group, which
/// root can always do.
fn pin_group(root: &Path) -> u32 {
    let parent_gid = fs::metadata(root.parent().unwrap()).unwrap().gid();
    let own_gid = fs::metadata(root).unwrap().gid();
    if own_gid != parent_gid {
        return own_gid;
    }
    let target = if parent_gid == 65534 { 65533 } else { 65534 };
    nix::unistd::chown(root, None, Some(Gid::from_raw(target)))
        .expect("fixture requires chown or a group boundary at the tempdir");
    target
}

/// Records messages instead of delivering them.
#[derive(Default)]
struct MockPostman {
    sent: RefCell<Vec<(String, Message)>>,
}

impl Postman for MockPostman {
    fn send(&self, message: &Message, recipient: &str) -> Result<(), MailError> {
        self.sent
            .borrow_mut()
            .push((recipient.to_string(), message.clone()));
        Ok(())
    }
}

struct Fixture {
    tmp: TempDir,
    root: PathBuf,
    idm: StaticIdm,
    db: Db,
    config: Config,
    epoch: i64,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        let gid = pin_group(&root);
        // setgid, so nested fixtures inherit the pinned group
        fs::set_permissions(&root, fs::Permissions::from_mode(0o2770)).unwrap();

        // Files created under the setgid root carry the pinned group;
        // the identity map must know it, its owners and the caller
        let uid = nix::unistd::getuid().as_raw();
        let mut idm = StaticIdm::new();
        idm.add_user(uid, "owner").add_user(3001, "pi").add_user(3002, "copi");
        idm.add_group(gid, &[3001, 3002], &[3001, 3002, uid]);

        let config = Config {
            identity: Default::default(),
            persistence: Persistence {
                database: tmp.path().join("vault.db"),
                postgres: Default::default(),
            },
            email: Email {
                sender: "vault@example.com".into(),
                command: PathBuf::from("sendmail"),
                smtp: Default::default(),
            },
            deletion: Deletion {
                threshold: 90,
                limbo: 14,
                warnings: vec![24, 72, 240],
                keep: None,
            },
            archive: Archive {
                threshold: 3,
                handler: tmp.path().join("handler"),
            },
            min_group_owners: 1,
            sandman_run_interval: 24,
        };

        Self {
            tmp,
            root,
            idm,
            db: Db::open_memory().unwrap(),
            config,
            epoch: system_time_to_unix(SystemTime::now()),
        }
    }

    fn stakeholders(&self) -> Vec<u32> {
        let uid = nix::unistd::getuid().as_raw();
        let mut expected = vec![uid, 3001, 3002];
        expected.sort_unstable();
        expected
    }

    fn file(&self, relative: &str) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
            let mut dir = parent.to_path_buf();
            while dir != self.root {
                fs::set_permissions(&dir, fs::Permissions::from_mode(0o2770)).unwrap();
                dir = dir.parent().unwrap().to_path_buf();
            }
        }
        fs::write(&path, b"payload").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o660)).unwrap();
        path
    }

    fn vault(&self) -> vault_store::Vault<'_> {
        vault_store::Vault::open_or_create(&self.root, &self.idm).unwrap()
    }

    /// Run a sweep with the clock advanced by `days` from the fixture
    /// epoch.
    fn sweep_at(&mut self, days: i64) -> Result<(), SweepError> {
        self.sweep_inner(days, false)
    }

    fn dry_sweep_at(&mut self, days: i64) -> Result<(), SweepError> {
        self.sweep_inner(days, true)
    }

    fn sweep_inner(&mut self, days: i64, dry_run: bool) -> Result<(), SweepError> {
        let now = self.epoch + days * DAY;
        let walker = FilesystemWalker::new(&[self.root.clone()], &self.idm, now)?;
        let mut sweeper = Sweeper::new(&self.config, &mut self.db, &self.idm, dry_run, now)?;
        sweeper.sweep(&walker)
    }

    fn notify_all(&mut self) -> MockPostman {
        let postman = MockPostman::default();
        notify(&mut self.db, &self.config, &self.idm, &postman).unwrap();
        postman
    }

    /// Install a stub archive handler that records its stdin.
    fn install_handler(&self, ready_exit: i32) -> PathBuf {
        let script = self.tmp.path().join("handler");
        let received = self.tmp.path().join("received");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\nif [ \"$1\" = ready ]; then exit {ready_exit}; fi\ncat > {}\n",
                received.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        received
    }
}

#[test]
fn test_soft_delete_of_expired_untracked_file() {
    let mut fx = Fixture::new();
    let file = fx.file("a.txt");
    fx.vault();

    let before = system_time_to_unix(SystemTime::now());
    fx.sweep_at(100).unwrap();

    assert!(!file.exists(), "source must be gone");

    let vault = fx.vault();
    let limboed = vault.list(Branch::Limbo).unwrap();
    assert_eq!(limboed.len(), 1);
    assert_eq!(limboed[0].source, file);

    let meta = fs::metadata(&limboed[0].path).unwrap();
    assert_eq!(meta.nlink(), 1, "limbo holds the last link");
    assert!(
        (meta.mtime() - before).abs() < 60,
        "limbo mtime is reset to the sweep's wall clock"
    );

    // One deleted status; notifications pending for owner + group owners
    let row = fx.db.query_file(meta.dev(), meta.ino()).unwrap().unwrap();
    let statuses = fx.db.statuses(row.id).unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].state, "deleted");
    assert_eq!(fx.db.stakeholders().unwrap(), fx.stakeholders());
}

#[test]
fn test_young_files_are_left_alone() {
    let mut fx = Fixture::new();
    let file = fx.file("a.txt");
    fx.vault();

    fx.sweep_at(10).unwrap();

    assert!(file.exists());
    assert_eq!(fx.db.count_files().unwrap(), 0);
    assert!(fx.vault().list(Branch::Limbo).unwrap().is_empty());
}

#[test]
fn test_dry_run_changes_nothing() {
    let mut fx = Fixture::new();
    let file = fx.file("a.txt");
    fx.vault();

    fx.dry_sweep_at(100).unwrap();

    assert!(file.exists(), "dry run must not delete");
    assert!(fx.vault().list(Branch::Limbo).unwrap().is_empty());
    assert_eq!(fx.db.count_files().unwrap(), 0, "dry run must not persist");
}

#[test]
fn test_hard_delete_from_limbo() {
    let mut fx = Fixture::new();
    let file = fx.file("a.txt");
    fx.vault();

    fx.sweep_at(100).unwrap();
    let limboed = fx.vault().list(Branch::Limbo).unwrap();
    assert_eq!(limboed.len(), 1);
    let (device, inode) = {
        let meta = fs::metadata(&limboed[0].path).unwrap();
        (meta.dev(), meta.ino())
    };

    // Within the limbo grace (13 days after the reset): entry survives
    fx.sweep_at(100 + 13).unwrap();
    assert!(limboed[0].path.exists());

    // Past the grace: hard-deleted, and no new status row appears
    fx.sweep_at(100 + 15).unwrap();
    assert!(!limboed[0].path.exists());
    assert!(!file.exists());

    let row = fx.db.query_file(device, inode).unwrap().unwrap();
    let statuses = fx.db.statuses(row.id).unwrap();
    assert_eq!(statuses.len(), 1, "hard delete appends nothing");
    assert_eq!(statuses[0].state, "deleted");
}

#[test]
fn test_warning_checkpoints_accumulate_without_duplicates() {
    let mut fx = Fixture::new();
    let file = fx.file("a.txt");
    fx.vault();

    // Age 81d: 216 hours remain, only the 240h checkpoint applies
    fx.sweep_at(81).unwrap();

    let meta = fs::metadata(&file).unwrap();
    let row = fx.db.query_file(meta.dev(), meta.ino()).unwrap().unwrap();
    let statuses = fx.db.statuses(row.id).unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].state, "warned");

    // Age 88d: 48 hours remain; the 72h checkpoint fires, the 240h one
    // is not emitted again for this mtime
    fx.sweep_at(88).unwrap();

    let row = fx.db.query_file(meta.dev(), meta.ino()).unwrap().unwrap();
    assert_eq!(fx.db.statuses(row.id).unwrap().len(), 2);

    let due_72 = fx
        .db
        .files(&Criteria {
            state: StateKind::Warned,
            notified: Some(false),
            tminus: Some(72),
            stakeholder: None,
        })
        .unwrap();
    assert_eq!(due_72.len(), 1);
    assert_eq!(due_72[0].facts.path, file);

    // Repeating the sweep adds nothing
    fx.sweep_at(88).unwrap();
    let row = fx.db.query_file(meta.dev(), meta.ino()).unwrap().unwrap();
    assert_eq!(fx.db.statuses(row.id).unwrap().len(), 2);
}

#[test]
fn test_touching_a_file_rearms_warnings() {
    let mut fx = Fixture::new();
    let file = fx.file("a.txt");
    fx.vault();

    fx.sweep_at(87).unwrap();
    let meta = fs::metadata(&file).unwrap();
    let old = fx.db.query_file(meta.dev(), meta.ino()).unwrap().unwrap();
    assert!(!fx.db.statuses(old.id).unwrap().is_empty());

    // The user touches the file: its facts change, history resets
    vault_core::fs::touch(&file).unwrap();
    fx.sweep_at(87).unwrap();

    let row = fx.db.query_file(meta.dev(), meta.ino()).unwrap().unwrap();
    assert_ne!(row.id, old.id, "changed facts replace the record");
    // A fresh file 87 synthetic days before its new mtime is young again
    assert!(fx.db.statuses(row.id).unwrap().is_empty() || row.facts.mtime > old.facts.mtime);
}

#[test]
fn test_archive_staging_deletes_source() {
    let mut fx = Fixture::new();
    let file = fx.file("data/big.bin");
    let vault = fx.vault();
    vault.add(Branch::Archive, &file).unwrap();
    let meta = fs::metadata(&file).unwrap();
    drop(vault);

    fx.sweep_at(0).unwrap();

    assert!(!file.exists(), "archive staging removes the source");
    let vault = fx.vault();
    assert!(vault.list(Branch::Archive).unwrap().is_empty());
    let staged = vault.list(Branch::Staged).unwrap();
    assert_eq!(staged.len(), 1);
    assert_eq!(fs::metadata(&staged[0].path).unwrap().nlink(), 1);

    let row = fx.db.query_file(meta.dev(), meta.ino()).unwrap().unwrap();
    assert_eq!(row.facts.key.as_deref(), Some(staged[0].path.as_path()));
    let statuses = fx.db.statuses(row.id).unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].state, "staged");
}

#[test]
fn test_stash_staging_keeps_source() {
    let mut fx = Fixture::new();
    let file = fx.file("data/big.bin");
    fx.vault().add(Branch::Stash, &file).unwrap();

    fx.sweep_at(0).unwrap();

    assert!(file.exists(), "stash staging keeps the source");
    let staged = fx.vault().list(Branch::Staged).unwrap();
    assert_eq!(staged.len(), 1);
    assert_eq!(fs::metadata(&staged[0].path).unwrap().nlink(), 2);
}

#[test]
fn test_locked_archive_file_is_skipped() {
    let mut fx = Fixture::new();
    let file = fx.file("busy.bin");
    fx.vault().add(Branch::Archive, &file).unwrap();

    {
        // Another writer holds the file
        let _writer = vault_store::WriteLock::try_lock(&file).unwrap().unwrap();
        fx.sweep_at(0).unwrap();

        assert!(file.exists(), "locked file must be left alone");
        assert_eq!(fx.vault().list(Branch::Archive).unwrap().len(), 1);
        assert!(fx.vault().list(Branch::Staged).unwrap().is_empty());
        assert_eq!(fx.db.count_files().unwrap(), 0);
    }

    // Lock released: the next run succeeds
    fx.sweep_at(0).unwrap();
    assert!(!file.exists());
    assert_eq!(fx.vault().list(Branch::Staged).unwrap().len(), 1);
}

#[test]
fn test_locked_expired_file_is_not_soft_deleted() {
    let mut fx = Fixture::new();
    let file = fx.file("busy.txt");
    fx.vault();

    let _writer = vault_store::WriteLock::try_lock(&file).unwrap().unwrap();
    fx.sweep_at(100).unwrap();

    assert!(file.exists());
    assert!(fx.vault().list(Branch::Limbo).unwrap().is_empty());
}

#[test]
fn test_keep_files_are_never_deleted() {
    let mut fx = Fixture::new();
    let file = fx.file("precious.txt");
    fx.vault().add(Branch::Keep, &file).unwrap();

    fx.sweep_at(1000).unwrap();

    assert!(file.exists());
    assert_eq!(fx.vault().list(Branch::Keep).unwrap().len(), 1);
}

#[test]
fn test_keep_threshold_untracks_silently() {
    let mut fx = Fixture::new();
    fx.config.deletion.keep = Some(365);
    let file = fx.file("precious.txt");
    fx.vault().add(Branch::Keep, &file).unwrap();

    fx.sweep_at(366).unwrap();

    assert!(file.exists(), "untracking never deletes the source");
    assert!(fx.vault().list(Branch::Keep).unwrap().is_empty());
    assert_eq!(fx.db.count_files().unwrap(), 0, "untracking is silent");
}

#[test]
fn test_vanished_source_repairs_branch_entry() {
    let mut fx = Fixture::new();
    let file = fx.file("gone.txt");
    let entry = fx.vault().add(Branch::Keep, &file).unwrap();

    // The user removes the source behind our back
    fs::remove_file(&file).unwrap();
    assert_eq!(fs::metadata(&entry.path).unwrap().nlink(), 1);

    fx.sweep_at(0).unwrap();

    assert!(!entry.path.exists(), "orphaned branch entry is unlinked");
}

#[test]
fn test_notification_is_one_message_per_stakeholder() {
    let mut fx = Fixture::new();
    let file = fx.file("a.txt");
    fx.file("b.txt");
    fx.vault();

    fx.sweep_at(100).unwrap();
    let postman = fx.notify_all();

    let sent = postman.sent.borrow();
    assert_eq!(sent.len(), fx.stakeholders().len());
    for (_, message) in sent.iter() {
        assert!(!message.body.contains("IRRECOVERABLY"));
        assert!(message
            .attachments
            .iter()
            .any(|a| a.filename == "deleted.fofn.gz"));
    }
    drop(sent);

    // Everything acknowledged: a second pass sends nothing
    assert!(fx.db.stakeholders().unwrap().is_empty());
    let postman = fx.notify_all();
    assert!(postman.sent.borrow().is_empty());

    // And the fully-notified record purges away
    let now = fx.epoch + 100 * DAY;
    fx.db.purge(now).unwrap();
    assert_eq!(fx.db.count_files().unwrap(), 0);
    let _ = file;
}

#[test]
fn test_drain_streams_null_delimited_paths() {
    let mut fx = Fixture::new();
    let received = fx.install_handler(0);
    for name in ["a.bin", "b.bin", "c.bin"] {
        let file = fx.file(name);
        fx.vault().add(Branch::Archive, &file).unwrap();
    }

    fx.sweep_at(0).unwrap();
    fx.notify_all();

    let (queue, _) = fx.db.staged_queue().unwrap();
    assert_eq!(queue.len(), 3);

    assert_eq!(drain::drain(&mut fx.db, &fx.config, false), 0);

    let payload = fs::read(&received).unwrap();
    let parts: Vec<_> = payload.split(|&b| b == 0).filter(|p| !p.is_empty()).collect();
    assert_eq!(parts.len(), 3);
    for part in &parts {
        let path = Path::new(std::str::from_utf8(part).unwrap());
        assert!(path.starts_with(fx.vault().branch_path(Branch::Staged)));
    }

    // The queue is empty; a second invocation sees nothing to do
    let (queue, bytes) = fx.db.staged_queue().unwrap();
    assert!(queue.is_empty());
    assert_eq!(bytes, 0);
    assert_eq!(drain::drain(&mut fx.db, &fx.config, false), 0);
}

#[test]
fn test_drain_respects_threshold_and_busy_handler() {
    let mut fx = Fixture::new();
    fx.install_handler(1); // handler reports busy
    let file = fx.file("a.bin");
    fx.vault().add(Branch::Archive, &file).unwrap();

    fx.sweep_at(0).unwrap();
    fx.notify_all();

    // One staged file, threshold three: under threshold, nothing happens
    assert_eq!(drain::drain(&mut fx.db, &fx.config, false), 0);
    assert_eq!(fx.db.staged_queue().unwrap().0.len(), 1);

    // Forced, but the handler is busy: the queue stays intact
    assert_eq!(drain::drain(&mut fx.db, &fx.config, true), 0);
    assert_eq!(fx.db.staged_queue().unwrap().0.len(), 1);
}

#[test]
fn test_drain_fails_on_no_capacity() {
    let mut fx = Fixture::new();
    fx.install_handler(2);
    let file = fx.file("a.bin");
    fx.vault().add(Branch::Archive, &file).unwrap();

    fx.sweep_at(0).unwrap();
    fx.notify_all();

    assert_eq!(drain::drain(&mut fx.db, &fx.config, true), 1);
    assert_eq!(fx.db.staged_queue().unwrap().0.len(), 1);
}

#[test]
fn test_duplicate_branch_entries_abort_the_sweep() {
    let mut fx = Fixture::new();
    let file = fx.file("twice.txt");
    let vault = fx.vault();
    let entry = vault.add(Branch::Keep, &file).unwrap();

    // Forge a duplicate of the same inode in another branch
    let forged = vault
        .branch_path(Branch::Archive)
        .join(entry.path.strip_prefix(vault.branch_path(Branch::Keep)).unwrap());
    fs::create_dir_all(forged.parent().unwrap()).unwrap();
    fs::hard_link(&file, &forged).unwrap();
    drop(vault);

    let result = fx.sweep_at(100);
    assert!(result.is_err(), "unrepairable corruption is fatal");
    assert!(file.exists(), "no mutation may follow the abort");
}

#[test]
fn test_consensus_failure_is_fatal_not_per_file() {
    use vault_core::quorum::QuorumError;

    let err = SweepError::Consensus(QuorumError::NoConsensus {
        leader: "elapsed_at_least".into(),
        dissenter: "no_time_remaining".into(),
    });
    assert!(!err.is_per_file());

    let benign = SweepError::Vault(vault_core::Error::NotRegular(PathBuf::from("/x")));
    assert!(benign.is_per_file());
}

#[test]
fn test_pipe_postman_is_constructible() {
    // Delivery itself is exercised against a real MTA; here we only
    // check the rendering path through a failing command
    let postman = PipePostman::new(Path::new("/nonexistent/sendmail"), "vault@example.com");
    let message = Message::new("s", "b");
    assert!(postman.send(&message, "user").is_err());
}
