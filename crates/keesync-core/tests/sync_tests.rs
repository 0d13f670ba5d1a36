//! End-to-end sync passes over real KDBX files.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use keepass::config::DatabaseConfig;
use keepass::db::{Entry, Group, Node, Value};
use keepass::Database;
use keesync_core::{
    tree, Credential, DocumentHost, FileStore, KeepassDatabase, NoDocuments, OpenDocument,
    SaveToken, SyncOrchestrator, SyncSettings, DEFAULT_JOBS_GROUP,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

fn at(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + TimeDelta::hours(i64::from(hour))
}

fn set(entry: &mut Entry, name: &str, value: &str) {
    let value = if name == "Password" {
        Value::Protected(value.as_bytes().into())
    } else {
        Value::Unprotected(value.to_string())
    };
    entry.fields.insert(name.to_string(), value);
}

fn record(title: &str, tags: &[&str], modified: NaiveDateTime) -> Entry {
    let mut entry = Entry::new();
    set(&mut entry, "Title", title);
    entry.tags = tags.iter().map(|t| t.to_string()).collect();
    entry.times.set_last_modification(modified);
    entry
}

fn job(fields: &[(&str, &str)]) -> Entry {
    let mut entry = Entry::new();
    for (name, value) in fields {
        set(&mut entry, name, value);
    }
    entry
}

fn with_jobs(db: &mut Database, jobs: Vec<Entry>) {
    let mut group = Group::new(DEFAULT_JOBS_GROUP);
    group.children.extend(jobs.into_iter().map(Node::Entry));
    db.root.children.push(Node::Group(group));
}

fn group_with(name: &str, entries: Vec<Entry>) -> Node {
    let mut group = Group::new(name);
    group.children.extend(entries.into_iter().map(Node::Entry));
    Node::Group(group)
}

fn write(path: &Path, password: &str, db: Database) {
    KeepassDatabase::new(db, path, Credential::with_password(password))
        .save()
        .unwrap();
}

fn open(path: &Path, password: &str) -> KeepassDatabase {
    KeepassDatabase::unlock(path, &Credential::with_password(password)).unwrap()
}

fn title_of(db: &KeepassDatabase, uuid: Uuid) -> Option<String> {
    db.find_entry(uuid)
        .map(|e| e.get_title().unwrap_or_default().to_string())
}

fn orchestrator() -> SyncOrchestrator<FileStore, NoDocuments> {
    SyncOrchestrator::new(FileStore, NoDocuments, SyncSettings::default())
}

struct Vaults {
    dir: TempDir,
    site: Uuid,
    other: Uuid,
}

impl Vaults {
    fn master(&self) -> PathBuf {
        self.dir.path().join("master.kdbx")
    }

    fn slave(&self) -> PathBuf {
        self.dir.path().join("slave.kdbx")
    }
}

/// Master with `/Web/Site1 [sync]`, `/Web/Other [sync]` and a job pushing
/// the `sync` tag to an empty slave.
fn vaults() -> Vaults {
    let dir = TempDir::new().unwrap();
    let site = record("Site1", &["sync"], at(0));
    let other = record("Other", &["sync"], at(0));
    let (site_id, other_id) = (site.uuid, other.uuid);

    let mut master = Database::new(DatabaseConfig::default());
    master.root.children.push(group_with("Web", vec![site, other]));
    with_jobs(
        &mut master,
        vec![job(&[
            ("Title", "To slave"),
            ("TargetFilePath", "slave.kdbx"),
            ("Password", "slave-pw"),
            ("Tag", "sync"),
        ])],
    );
    write(&dir.path().join("master.kdbx"), "master-pw", master);
    write(
        &dir.path().join("slave.kdbx"),
        "slave-pw",
        Database::new(DatabaseConfig::default()),
    );

    Vaults {
        dir,
        site: site_id,
        other: other_id,
    }
}

#[test]
fn edits_flow_to_the_slave_and_newer_slave_edits_flow_back() {
    let v = vaults();
    let mut sync = orchestrator();

    let mut master = open(&v.master(), "master-pw");
    let report = sync.run_sync(&mut master);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.jobs_run, 1);

    let slave = open(&v.slave(), "slave-pw");
    assert_eq!(title_of(&slave, v.site).as_deref(), Some("Site1"));
    let mirrored = tree::entry_ancestors(slave.root(), v.site).unwrap();
    assert_eq!(mirrored.last().unwrap().name, "Web");

    // Source edit at T1 reaches the slave.
    let e = tree::find_entry_mut(&mut master.db_mut().root, v.site).unwrap();
    set(e, "Title", "Site1-v2");
    e.times.set_last_modification(at(1));
    sync.run_sync(&mut master);
    assert_eq!(title_of(&open(&v.slave(), "slave-pw"), v.site).as_deref(), Some("Site1-v2"));

    // Slave edit at T2 wins and is written back into the master.
    let mut slave = open(&v.slave(), "slave-pw");
    let e = tree::find_entry_mut(&mut slave.db_mut().root, v.site).unwrap();
    set(e, "Title", "Site1-v3");
    e.times.set_last_modification(at(2));
    slave.save().unwrap();

    let report = sync.run_sync(&mut master);
    assert_eq!(report.merged.written_back, 1);
    assert_eq!(title_of(&master, v.site).as_deref(), Some("Site1-v3"));
    assert_eq!(title_of(&open(&v.master(), "master-pw"), v.site).as_deref(), Some("Site1-v3"));
    assert_eq!(title_of(&open(&v.slave(), "slave-pw"), v.site).as_deref(), Some("Site1-v3"));
}

#[test]
fn removing_the_tag_deletes_only_that_entry_from_the_slave() {
    let v = vaults();
    let mut sync = orchestrator();
    let mut master = open(&v.master(), "master-pw");
    sync.run_sync(&mut master);

    let e = tree::find_entry_mut(&mut master.db_mut().root, v.site).unwrap();
    e.tags.clear();
    e.times.set_last_modification(at(3));
    let report = sync.run_sync(&mut master);

    assert_eq!(report.deleted, 1);
    let slave = open(&v.slave(), "slave-pw");
    assert!(slave.find_entry(v.site).is_none());
    assert!(slave.find_entry(v.other).is_some());
}

#[test]
fn second_pass_without_edits_changes_nothing() {
    let v = vaults();
    let mut sync = orchestrator();
    let mut master = open(&v.master(), "master-pw");
    sync.run_sync(&mut master);
    let report = sync.run_sync(&mut master);

    assert_eq!(report.merged.created, 0);
    assert_eq!(report.merged.written_back, 0);
    assert_eq!(report.merged.cleanup.duplicates, 0);
    assert_eq!(report.deleted, 0);
    let slave = open(&v.slave(), "slave-pw");
    assert_eq!(tree::all_entries(slave.root()).len(), 2);
}

#[test]
fn slave_jobs_push_back_to_the_master_with_the_master_credential() {
    let v = vaults();
    let local = record("Made on laptop", &["sync"], at(4));
    let local_id = local.uuid;

    // The slave has its own entry and a slave-only job without a password.
    let mut slave = Database::new(DatabaseConfig::default());
    slave.root.children.push(group_with("Laptop", vec![local]));
    with_jobs(
        &mut slave,
        vec![job(&[
            ("Title", "Back to master"),
            ("TargetFilePath", "master.kdbx"),
            ("Tag", "sync"),
            ("IsSlave", "true"),
        ])],
    );
    write(&v.slave(), "slave-pw", slave);

    let mut master = open(&v.master(), "master-pw");
    let report = orchestrator().run_sync(&mut master);

    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.jobs_run, 2);
    assert_eq!(report.touched.len(), 2);
    let master = open(&v.master(), "master-pw");
    assert_eq!(title_of(&master, local_id).as_deref(), Some("Made on laptop"));
    assert_eq!(title_of(&master, v.site).as_deref(), Some("Site1"));
}

#[test]
fn master_credential_replaces_stale_secrets_on_jobs_back_to_the_master() {
    let v = vaults();
    let local = record("Made on laptop", &["sync"], at(4));
    let local_id = local.uuid;

    let mut slave = Database::new(DatabaseConfig::default());
    slave.root.children.push(group_with("Laptop", vec![local]));
    with_jobs(
        &mut slave,
        vec![job(&[
            ("Title", "Back to master"),
            ("TargetFilePath", "./master.kdbx"),
            ("Password", "stale"),
            ("KeyFilePath", "missing.keyx"),
            ("Tag", "sync"),
        ])],
    );
    write(&v.slave(), "slave-pw", slave);

    let mut master = open(&v.master(), "master-pw");
    let report = orchestrator().run_sync(&mut master);

    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.jobs_run, 2);
    let master = open(&v.master(), "master-pw");
    assert_eq!(title_of(&master, local_id).as_deref(), Some("Made on laptop"));
}

#[test]
fn jobs_unlock_targets_with_a_key_file_next_to_the_master() {
    let dir = TempDir::new().unwrap();
    let key_file = dir.path().join("slave.keyx");
    std::fs::write(&key_file, b"slave key file material").unwrap();
    let site = record("Site", &["sync"], at(0));
    let site_id = site.uuid;

    let mut master = Database::new(DatabaseConfig::default());
    master.root.children.push(group_with("Web", vec![site]));
    with_jobs(
        &mut master,
        vec![job(&[
            ("Title", "Key file only"),
            ("TargetFilePath", "slave.kdbx"),
            ("KeyFilePath", "slave.keyx"),
            ("Tag", "sync"),
        ])],
    );
    write(&dir.path().join("master.kdbx"), "master-pw", master);
    let slave_credential = Credential::from_parts("", Some(key_file));
    KeepassDatabase::new(
        Database::new(DatabaseConfig::default()),
        dir.path().join("slave.kdbx"),
        slave_credential.clone(),
    )
    .save()
    .unwrap();

    let mut master = open(&dir.path().join("master.kdbx"), "master-pw");
    let report = orchestrator().run_sync(&mut master);

    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.jobs_run, 1);
    let slave = KeepassDatabase::unlock(dir.path().join("slave.kdbx"), &slave_credential).unwrap();
    assert_eq!(title_of(&slave, site_id).as_deref(), Some("Site"));
}

#[test]
fn slave_only_jobs_do_not_run_from_the_master() {
    let dir = TempDir::new().unwrap();
    let mut master = Database::new(DatabaseConfig::default());
    master.root.children.push(Node::Entry(record("x", &["sync"], at(0))));
    with_jobs(
        &mut master,
        vec![job(&[
            ("Title", "Only as target"),
            ("TargetFilePath", "slave.kdbx"),
            ("Password", "slave-pw"),
            ("Tag", "sync"),
            ("IsSlave", "1"),
        ])],
    );
    write(&dir.path().join("master.kdbx"), "master-pw", master);
    write(&dir.path().join("slave.kdbx"), "slave-pw", Database::new(DatabaseConfig::default()));

    let mut master = open(&dir.path().join("master.kdbx"), "master-pw");
    let report = orchestrator().run_sync(&mut master);

    assert_eq!(report.jobs_run, 0);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    let skipped: Vec<&str> = report.skipped.iter().map(|s| s.job.as_str()).collect();
    assert_eq!(skipped, vec!["Only as target"]);
    assert!(tree::all_entries(open(&dir.path().join("slave.kdbx"), "slave-pw").root()).is_empty());
}

#[test]
fn a_failing_job_does_not_stop_the_others() {
    let dir = TempDir::new().unwrap();
    let site = record("Site", &["sync"], at(0));
    let site_id = site.uuid;
    let mut master = Database::new(DatabaseConfig::default());
    master.root.children.push(Node::Entry(site));
    with_jobs(
        &mut master,
        vec![
            job(&[
                ("Title", "Wrong password"),
                ("TargetFilePath", "a.kdbx"),
                ("Password", "nope"),
                ("Tag", "sync"),
            ]),
            job(&[("Title", "No filter"), ("TargetFilePath", "b.kdbx"), ("Password", "b-pw")]),
            job(&[
                ("Title", "Switched off"),
                ("TargetFilePath", "b.kdbx"),
                ("Password", "b-pw"),
                ("Tag", "sync"),
                ("Disabled", "true"),
            ]),
            job(&[
                ("Title", "Good"),
                ("TargetFilePath", "b.kdbx"),
                ("Password", "b-pw"),
                ("Tag", "sync"),
            ]),
        ],
    );
    write(&dir.path().join("master.kdbx"), "master-pw", master);
    write(&dir.path().join("a.kdbx"), "a-pw", Database::new(DatabaseConfig::default()));
    write(&dir.path().join("b.kdbx"), "b-pw", Database::new(DatabaseConfig::default()));

    let mut master = open(&dir.path().join("master.kdbx"), "master-pw");
    let report = orchestrator().run_sync(&mut master);

    let warned: Vec<&str> = report.warnings.iter().map(|w| w.job.as_str()).collect();
    assert!(warned.contains(&"Wrong password"));
    assert!(warned.contains(&"No filter"));
    assert!(!warned.contains(&"Switched off"));
    // The target that refused its password is not reopened in phase two.
    assert_eq!(warned.len(), 2, "{:?}", report.warnings);
    let skipped: Vec<&str> = report.skipped.iter().map(|s| s.job.as_str()).collect();
    assert_eq!(skipped, vec!["Switched off"]);
    assert_eq!(report.jobs_run, 1);
    assert!(open(&dir.path().join("b.kdbx"), "b-pw").find_entry(site_id).is_some());
}

#[test]
fn overlapping_saves_trigger_a_single_pass() {
    let v = vaults();
    let mut sync = orchestrator();
    let mut master = open(&v.master(), "master-pw");
    let (first, second) = (SaveToken::new(), SaveToken::new());

    sync.on_save_started(first);
    sync.on_save_started(second);
    assert!(sync.on_save_finished(first, &mut master).is_none());
    assert!(open(&v.slave(), "slave-pw").find_entry(v.site).is_none());

    let report = sync.on_save_finished(second, &mut master).unwrap();
    assert_eq!(report.jobs_run, 1);
    assert!(open(&v.slave(), "slave-pw").find_entry(v.site).is_some());
}

#[derive(Default)]
struct RecordingHost {
    open: Vec<OpenDocument>,
    reloaded: Vec<PathBuf>,
    activated: Vec<PathBuf>,
}

impl DocumentHost for RecordingHost {
    fn documents(&self) -> Vec<OpenDocument> {
        self.open.clone()
    }

    fn reload(&mut self, path: &Path) -> keesync_core::Result<()> {
        self.reloaded.push(path.to_path_buf());
        Ok(())
    }

    fn activate(&mut self, path: &Path) {
        self.activated.push(path.to_path_buf());
    }
}

#[rstest]
#[case::unlocked(false, 2)]
#[case::slave_locked(true, 1)]
fn touched_documents_are_reloaded_unless_locked(
    #[case] slave_locked: bool,
    #[case] expected_reloads: usize,
) {
    let v = vaults();
    let unrelated = v.dir.path().join("unrelated.kdbx");
    let host = RecordingHost {
        open: vec![
            OpenDocument { path: v.master(), locked: false },
            OpenDocument { path: v.slave(), locked: slave_locked },
            OpenDocument { path: unrelated, locked: false },
        ],
        ..RecordingHost::default()
    };
    let mut sync = SyncOrchestrator::new(FileStore, host, SyncSettings::default());

    let mut master = open(&v.master(), "master-pw");
    sync.run_sync(&mut master);

    assert_eq!(sync.host().reloaded.len(), expected_reloads);
    assert!(sync.host().reloaded.contains(&v.master()));
    assert_eq!(sync.host().activated, vec![v.master()]);
}
