//! SQLite persistence for the reconciliation registry.
//!
//! A single table keyed by entity identifier, holding one nullable timestamp
//! per signal. Callers must hold the registry lock for the whole lifetime of a
//! [`RegistryStore`]; nothing here synchronizes between processes.
//!
//! # Schema
//!
//! ```text
//! entities
//! ├── identifier            TEXT PRIMARY KEY
//! ├── instance_timestamp    NUMERIC   -- epoch seconds, NULL until announced
//! └── connection_timestamp  NUMERIC   -- epoch seconds, NULL until connected
//! ```
//!
//! Every public operation runs in one `IMMEDIATE` transaction, so a crash
//! mid-command leaves the previous committed state behind.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSqlError, Type};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};

use super::types::{EntityRecord, ReadinessReport, Signal};
use crate::error::{RegistryError, Result};

const BUSY_TIMEOUT_MS: i64 = 5000;

pub struct RegistryStore {
    path: PathBuf,
    conn: Connection,
}

impl RegistryStore {
    /// Opens (creating if needed) the registry database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(path, flags).map_err(RegistryError::storage(
            format!("Failed to open registry database {}", path.display()),
        ))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(RegistryError::storage("Failed to enable WAL"))?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(RegistryError::storage("Failed to set synchronous"))?;
        conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)
            .map_err(RegistryError::storage("Failed to set busy_timeout"))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entities (
                identifier TEXT PRIMARY KEY,
                instance_timestamp NUMERIC,
                connection_timestamp NUMERIC
             );",
        )
        .map_err(RegistryError::storage("Failed to initialize schema"))?;

        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records `signal` for every identifier at `now`, in one commit.
    ///
    /// Read-modify-write: the timestamp of the other signal is read back and
    /// written again unchanged, never defaulted. A stored timestamp that
    /// cannot be decoded aborts the whole transaction.
    fn record(
        &mut self,
        signal: Signal,
        identifiers: &[String],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(RegistryError::storage("Failed to begin transaction"))?;

        for identifier in identifiers {
            let record = match read_record(&tx, identifier)? {
                Some(mut existing) => {
                    existing.observe(signal, now);
                    existing
                }
                None => EntityRecord::observed(identifier, signal, now),
            };
            write_record(&tx, &record)?;
            tracing::debug!(identifier = %identifier, signal = %signal, "Recorded signal");
        }

        tx.commit()
            .map_err(RegistryError::storage("Failed to commit recorded signals"))
    }

    /// Upserts `instance_timestamp = now` for each identifier.
    pub fn record_instances(&mut self, identifiers: &[String], now: DateTime<Utc>) -> Result<()> {
        self.record(Signal::Instance, identifiers, now)
    }

    /// Upserts `connection_timestamp = now` for each identifier.
    pub fn record_connections(&mut self, identifiers: &[String], now: DateTime<Utc>) -> Result<()> {
        self.record(Signal::Connection, identifiers, now)
    }

    /// Reports pending records in both directions and whether `identifier`
    /// has both signals. Never creates a record.
    pub fn check_readiness(&mut self, identifier: &str) -> Result<ReadinessReport> {
        let tx = self
            .conn
            .transaction()
            .map_err(RegistryError::storage("Failed to begin transaction"))?;

        let awaiting_connection = list_identifiers(
            &tx,
            "SELECT identifier FROM entities \
             WHERE instance_timestamp IS NOT NULL AND connection_timestamp IS NULL \
             ORDER BY identifier",
        )?;
        let awaiting_instance = list_identifiers(
            &tx,
            "SELECT identifier FROM entities \
             WHERE connection_timestamp IS NOT NULL AND instance_timestamp IS NULL \
             ORDER BY identifier",
        )?;

        let ready_count: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM entities \
                 WHERE identifier = ?1 \
                 AND instance_timestamp IS NOT NULL \
                 AND connection_timestamp IS NOT NULL",
                params![identifier],
                |row| row.get(0),
            )
            .map_err(RegistryError::storage("Failed to query readiness"))?;

        tx.commit()
            .map_err(RegistryError::storage("Failed to finish readiness check"))?;

        Ok(ReadinessReport {
            identifier: identifier.to_string(),
            ready: ready_count > 0,
            awaiting_connection,
            awaiting_instance,
        })
    }

    /// Deletes records whose timestamps are all unset or strictly older than
    /// `cutoff`. Returns how many rows went.
    pub fn purge_stale(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        let cutoff_secs = to_epoch_secs(cutoff);
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(RegistryError::storage("Failed to begin transaction"))?;

        let removed = tx
            .execute(
                "DELETE FROM entities \
                 WHERE (instance_timestamp IS NULL OR instance_timestamp < ?1) \
                 AND (connection_timestamp IS NULL OR connection_timestamp < ?1)",
                params![cutoff_secs],
            )
            .map_err(RegistryError::storage("Failed to purge stale records"))?;

        tx.commit()
            .map_err(RegistryError::storage("Failed to commit purge"))?;

        Ok(removed as u64)
    }

    /// Looks up a single record.
    pub fn get(&self, identifier: &str) -> Result<Option<EntityRecord>> {
        read_record(&self.conn, identifier)
    }

    /// All records, ordered by identifier.
    pub fn list(&self) -> Result<Vec<EntityRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT identifier, instance_timestamp, connection_timestamp \
                 FROM entities ORDER BY identifier",
            )
            .map_err(RegistryError::storage("Failed to prepare records query"))?;

        let rows = stmt
            .query_map([], record_from_row)
            .map_err(RegistryError::storage("Failed to read records"))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(RegistryError::storage("Failed to decode record"))?);
        }
        Ok(records)
    }
}

fn read_record(conn: &Connection, identifier: &str) -> Result<Option<EntityRecord>> {
    conn.query_row(
        "SELECT identifier, instance_timestamp, connection_timestamp \
         FROM entities WHERE identifier = ?1",
        params![identifier],
        record_from_row,
    )
    .optional()
    .map_err(RegistryError::storage(format!(
        "Failed to read record {}",
        identifier
    )))
}

fn write_record(conn: &Connection, record: &EntityRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO entities \
            (identifier, instance_timestamp, connection_timestamp) \
         VALUES (?1, ?2, ?3)",
        params![
            record.identifier,
            record.instance_at.map(to_epoch_secs),
            record.connection_at.map(to_epoch_secs),
        ],
    )
    .map_err(RegistryError::storage(format!(
        "Failed to write record {}",
        record.identifier
    )))?;
    Ok(())
}

fn list_identifiers(conn: &Connection, sql: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(RegistryError::storage("Failed to prepare pending query"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(RegistryError::storage("Failed to read pending rows"))?;

    let mut identifiers = Vec::new();
    for row in rows {
        identifiers.push(row.map_err(RegistryError::storage("Failed to decode pending row"))?);
    }
    Ok(identifiers)
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRecord> {
    Ok(EntityRecord {
        identifier: row.get(0)?,
        instance_at: timestamp_column(row, 1)?,
        connection_at: timestamp_column(row, 2)?,
    })
}

fn timestamp_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let Some(secs) = row.get::<_, Option<f64>>(idx)? else {
        return Ok(None);
    };
    from_epoch_secs(secs).map(Some).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Real,
            Box::new(FromSqlError::OutOfRange(secs as i64)),
        )
    })
}

fn to_epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn open_temp() -> (tempfile::TempDir, RegistryStore) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = RegistryStore::open(&temp_dir.path().join("registry.db")).expect("open store");
        (temp_dir, store)
    }

    #[test]
    fn records_instance_then_connection_as_ready() {
        let (_temp, mut store) = open_temp();

        store
            .record_instances(&ids(&["i-1"]), at(1_000))
            .expect("record instance");
        store
            .record_connections(&ids(&["i-1"]), at(1_005))
            .expect("record connection");

        let record = store.get("i-1").expect("get").expect("record exists");
        assert_eq!(record.instance_at, Some(at(1_000)));
        assert_eq!(record.connection_at, Some(at(1_005)));

        let report = store.check_readiness("i-1").expect("check");
        assert!(report.ready);
        assert!(report.awaiting_connection.is_empty());
        assert!(report.awaiting_instance.is_empty());
    }

    #[test]
    fn connection_first_then_instance_is_ready() {
        let (_temp, mut store) = open_temp();

        store
            .record_connections(&ids(&["minion-a"]), at(50))
            .expect("record connection");
        store
            .record_instances(&ids(&["minion-a"]), at(60))
            .expect("record instance");

        let record = store.get("minion-a").expect("get").expect("record exists");
        assert_eq!(record.connection_at, Some(at(50)));
        assert_eq!(record.instance_at, Some(at(60)));
        assert!(store.check_readiness("minion-a").expect("check").ready);
    }

    #[test]
    fn repeated_signal_only_moves_its_own_timestamp() {
        let (_temp, mut store) = open_temp();

        store
            .record_connections(&ids(&["i-1"]), at(10))
            .expect("record connection");
        store
            .record_instances(&ids(&["i-1"]), at(20))
            .expect("record instance");
        store
            .record_instances(&ids(&["i-1"]), at(30))
            .expect("record instance again");

        let record = store.get("i-1").expect("get").expect("record exists");
        assert_eq!(record.instance_at, Some(at(30)));
        assert_eq!(record.connection_at, Some(at(10)));
    }

    #[test]
    fn records_many_identifiers_in_one_call() {
        let (_temp, mut store) = open_temp();

        store
            .record_instances(&ids(&["i-1", "i-2", "i-3"]), at(5))
            .expect("record instances");

        let records = store.list().expect("list");
        let names: Vec<_> = records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(names, vec!["i-1", "i-2", "i-3"]);
        assert!(records.iter().all(|r| r.connection_at.is_none()));
    }

    #[test]
    fn check_on_unknown_identifier_creates_nothing() {
        let (_temp, mut store) = open_temp();

        let report = store.check_readiness("i-404").expect("check");

        assert!(!report.ready);
        assert_eq!(report.identifier, "i-404");
        assert!(store.get("i-404").expect("get").is_none());
        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn check_reports_pending_in_both_directions() {
        let (_temp, mut store) = open_temp();

        store
            .record_instances(&ids(&["i-b", "i-a", "i-ready"]), at(1))
            .expect("record instances");
        store
            .record_connections(&ids(&["m-z", "i-ready"]), at(2))
            .expect("record connections");

        let report = store.check_readiness("i-a").expect("check");

        assert!(!report.ready);
        assert_eq!(report.awaiting_connection, vec!["i-a", "i-b"]);
        assert_eq!(report.awaiting_instance, vec!["m-z"]);
    }

    #[test]
    fn preserves_sub_second_precision() {
        let (_temp, mut store) = open_temp();
        let now = at(1_700_000_000) + Duration::microseconds(123_456);

        store
            .record_instances(&ids(&["i-1"]), now)
            .expect("record instance");

        let record = store.get("i-1").expect("get").expect("record exists");
        assert_eq!(record.instance_at, Some(now));
    }

    #[test]
    fn purge_follows_staleness_rules() {
        let (_temp, mut store) = open_temp();
        let cutoff = at(1_000);

        // both old
        store.record_instances(&ids(&["old"]), at(10)).unwrap();
        store.record_connections(&ids(&["old"]), at(20)).unwrap();
        // one side fresh
        store.record_instances(&ids(&["mixed"]), at(10)).unwrap();
        store.record_connections(&ids(&["mixed"]), at(2_000)).unwrap();
        // one side unset, the other stale
        store.record_instances(&ids(&["half"]), at(10)).unwrap();
        // one side unset, the other fresh
        store.record_connections(&ids(&["fresh"]), at(1_500)).unwrap();
        // exactly at the cutoff is not strictly older
        store.record_instances(&ids(&["edge"]), cutoff).unwrap();

        let removed = store.purge_stale(cutoff).expect("purge");

        assert_eq!(removed, 2);
        assert!(store.get("old").unwrap().is_none());
        assert!(store.get("half").unwrap().is_none());
        assert!(store.get("mixed").unwrap().is_some());
        assert!(store.get("fresh").unwrap().is_some());
        assert!(store.get("edge").unwrap().is_some());
    }

    #[test]
    fn purge_on_empty_store_removes_nothing() {
        let (_temp, mut store) = open_temp();
        assert_eq!(store.purge_stale(at(1_000)).expect("purge"), 0);
    }

    #[test]
    fn data_survives_reopen() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db_path = temp_dir.path().join("registry.db");

        {
            let mut store = RegistryStore::open(&db_path).expect("open store");
            store
                .record_instances(&ids(&["i-1"]), at(100))
                .expect("record instance");
        }

        let store = RegistryStore::open(&db_path).expect("reopen store");
        assert_eq!(store.path(), db_path.as_path());
        let record = store.get("i-1").expect("get").expect("record exists");
        assert_eq!(record.instance_at, Some(at(100)));
    }

    #[test]
    fn reads_integer_timestamps_written_by_other_tools() {
        let (_temp, store) = open_temp();
        store
            .conn
            .execute(
                "INSERT INTO entities (identifier, instance_timestamp, connection_timestamp) \
                 VALUES ('legacy', 1700000000, NULL)",
                [],
            )
            .expect("insert legacy row");

        let record = store.get("legacy").expect("get").expect("record exists");
        assert_eq!(record.instance_at, Some(at(1_700_000_000)));
        assert_eq!(record.connection_at, None);
    }

    #[test]
    fn undecodable_timestamp_aborts_record_without_touching_row() {
        let (_temp, mut store) = open_temp();
        store
            .conn
            .execute(
                "INSERT INTO entities (identifier, instance_timestamp, connection_timestamp) \
                 VALUES ('x', NULL, 1e13)",
                [],
            )
            .expect("insert far-future row");

        let result = store.record_instances(&ids(&["x"]), at(100));
        assert!(matches!(result, Err(RegistryError::Storage { .. })));

        let (instance, connection): (Option<f64>, Option<f64>) = store
            .conn
            .query_row(
                "SELECT instance_timestamp, connection_timestamp FROM entities \
                 WHERE identifier = 'x'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("read raw row");
        assert_eq!(instance, None);
        assert_eq!(connection, Some(1e13));
    }

    #[test]
    fn failure_midway_rolls_back_whole_invocation() {
        let (_temp, mut store) = open_temp();
        store
            .conn
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON entities \
                 WHEN NEW.identifier = 'bad' \
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .expect("create trigger");

        let result = store.record_instances(&ids(&["i-1", "bad"]), at(100));

        assert!(result.is_err());
        assert!(store.get("i-1").expect("get").is_none());
        assert!(store.list().expect("list").is_empty());
    }
}
