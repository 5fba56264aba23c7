//! Integration coverage for lock + store + command behavior.

use super::lock::lock_path_for;
use super::store::RegistryStore;
use super::types::{PurgeUnit, PurgeWindow};
use crate::commands::{run, CommandOutcome, RegistryCommand};
use crate::config::RegistrySettings;
use chrono::{Duration, Utc};
use fs_err as fs;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tempfile::tempdir;

fn settings_in(dir: &std::path::Path) -> RegistrySettings {
    RegistrySettings {
        database_file: dir.join("autoscaling.db"),
        lock_timeout_secs: 30,
    }
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn readiness(settings: &RegistrySettings, id: &str) -> super::types::ReadinessReport {
    match run(settings, &RegistryCommand::Check(id.to_string()), Utc::now()).expect("check") {
        CommandOutcome::Readiness(report) => report,
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_full_entity_lifecycle() {
    let temp = tempdir().unwrap();
    let settings = settings_in(temp.path());
    let now = Utc::now();

    run(&settings, &RegistryCommand::NewInstance(ids(&["i-1"])), now).expect("new-instance");
    run(&settings, &RegistryCommand::NewMinion(ids(&["i-1"])), now).expect("new-minion");

    let report = readiness(&settings, "i-1");
    assert!(report.ready);
    assert!(!report.awaiting_connection.contains(&"i-1".to_string()));
    assert!(!report.awaiting_instance.contains(&"i-1".to_string()));

    let unknown = readiness(&settings, "i-2");
    assert!(!unknown.ready);

    run(&settings, &RegistryCommand::NewInstance(ids(&["i-3"])), now).expect("new-instance");
    let purged = run(
        &settings,
        &RegistryCommand::Purge(PurgeWindow::new(0, PurgeUnit::Seconds)),
        now + Duration::seconds(1),
    )
    .expect("purge");
    assert_eq!(purged, CommandOutcome::Purged { removed: 2 });

    let store = RegistryStore::open(&settings.database_file).expect("open store");
    assert!(store.get("i-3").unwrap().is_none());
    assert!(store.get("i-2").unwrap().is_none());
}

#[test]
fn test_purge_keeps_recent_records() {
    let temp = tempdir().unwrap();
    let settings = settings_in(temp.path());
    let now = Utc::now();

    run(
        &settings,
        &RegistryCommand::NewInstance(ids(&["old"])),
        now - Duration::days(10),
    )
    .expect("old instance");
    run(
        &settings,
        &RegistryCommand::NewMinion(ids(&["recent"])),
        now - Duration::hours(1),
    )
    .expect("recent minion");

    let purged = run(
        &settings,
        &RegistryCommand::Purge(PurgeWindow::new(1, PurgeUnit::Days)),
        now,
    )
    .expect("purge");

    assert_eq!(purged, CommandOutcome::Purged { removed: 1 });
    let store = RegistryStore::open(&settings.database_file).expect("open store");
    assert!(store.get("old").unwrap().is_none());
    assert!(store.get("recent").unwrap().is_some());
}

#[test]
fn test_dead_lock_owner_does_not_block_commands() {
    let temp = tempdir().unwrap();
    let settings = settings_in(temp.path());
    let lock_path = lock_path_for(&settings.database_file);
    fs::write(&lock_path, "99999999").unwrap();

    let started = Instant::now();
    run(
        &settings,
        &RegistryCommand::NewInstance(ids(&["i-1"])),
        Utc::now(),
    )
    .expect("new-instance over stale lock");

    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert!(!lock_path.exists());
}

#[test]
fn test_concurrent_signals_never_clobber_each_other() {
    let temp = tempdir().unwrap();
    let settings = Arc::new(settings_in(temp.path()));
    let entities = ["i-a", "i-b"];

    let handles: Vec<_> = entities
        .iter()
        .flat_map(|&id| {
            [
                RegistryCommand::NewInstance(ids(&[id])),
                RegistryCommand::NewMinion(ids(&[id])),
            ]
        })
        .map(|command| {
            let settings = Arc::clone(&settings);
            thread::spawn(move || run(&settings, &command, Utc::now()))
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread panicked").expect("command");
    }

    let store = RegistryStore::open(&settings.database_file).expect("open store");
    for id in entities {
        let record = store.get(id).unwrap().expect("record exists");
        assert!(record.instance_at.is_some(), "{id} lost its instance timestamp");
        assert!(record.connection_at.is_some(), "{id} lost its connection timestamp");
    }
    assert!(!lock_path_for(&settings.database_file).exists());
}
