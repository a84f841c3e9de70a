use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use rollout_types::{OperationId, Outcome, ParentId, ResultStatus, UnitId};

use crate::error::SqliteResultExt;
use crate::record::{DATE_FORMAT, DATETIME_FORMAT};
use crate::sqlite_util::open_secure_db;
use crate::{
    FinalizeStatus, NewOperation, OperationLedger, OperationRecord, ReleaseRecord, ReleaseSync,
    StoreError,
};

const PENDING_CODE: i64 = ResultStatus::Pending.code();

const OPERATION_COLUMNS: &str = "id, unit_id, deployment, old_image, new_image, operator, \
     source_id, insert_time, online_date, result, message, cost_secs";

/// SQLite-backed [`OperationLedger`].
///
/// Holds one connection behind a mutex; the foreground executor and the
/// background convergence task may both hold an `Arc` to the same store.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            unit_id INTEGER NOT NULL,
            deployment TEXT NOT NULL,
            old_image TEXT NOT NULL,
            new_image TEXT NOT NULL,
            operator TEXT NOT NULL,
            source_id TEXT NOT NULL DEFAULT '',
            insert_time TEXT NOT NULL,
            online_date TEXT NOT NULL,
            result INTEGER NOT NULL DEFAULT 2,
            message TEXT NOT NULL DEFAULT '',
            cost_secs INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_operations_pending
        ON operations(result) WHERE result = 2;

        CREATE TABLE IF NOT EXISTS releases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL DEFAULT '',
            is_success INTEGER NOT NULL DEFAULT 2,
            error_log TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS release_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            release_id INTEGER NOT NULL,
            operation_id INTEGER NOT NULL DEFAULT 0
        );
    ";

    /// Open or create the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = open_secure_db(path.as_ref())?;
        Self::initialize(db)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let db = Connection::open_in_memory().during("open in-memory database")?;
        Self::initialize(db)
    }

    fn initialize(db: Connection) -> Result<Self, StoreError> {
        db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .during("set database pragmas")?;
        db.execute_batch(Self::SCHEMA)
            .during("create database schema")?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Insert a master release record.
    ///
    /// Release and parent records are owned by the release-management side;
    /// these writers exist for seeding and tooling.
    pub fn create_release(&self, source_id: &str) -> Result<i64, StoreError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO releases (source_id) VALUES (?1)",
            params![source_id],
        )
        .during("insert release")?;
        Ok(db.last_insert_rowid())
    }

    /// Insert a parent deployment record under `release_id`.
    pub fn create_release_item(&self, release_id: i64) -> Result<ParentId, StoreError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO release_items (release_id) VALUES (?1)",
            params![release_id],
        )
        .during("insert release item")?;
        let id = db.last_insert_rowid();
        ParentId::from_raw(id).ok_or(StoreError::ReleaseNotFound(release_id))
    }

    pub fn release(&self, release_id: i64) -> Result<Option<ReleaseRecord>, StoreError> {
        let db = self.conn()?;
        read_release(&db, release_id)
    }

    /// Operation currently linked from a parent record, if any.
    pub fn linked_operation(&self, parent: ParentId) -> Result<Option<OperationId>, StoreError> {
        let db = self.conn()?;
        let linked: Option<i64> = db
            .query_row(
                "SELECT operation_id FROM release_items WHERE id = ?1",
                params![parent.value()],
                |row| row.get(0),
            )
            .optional()
            .during("query release item")?;
        match linked {
            None => Err(StoreError::ParentNotFound(parent)),
            Some(0) => Ok(None),
            Some(id) => Ok(Some(OperationId::new(id))),
        }
    }

    /// Records that never left `pending`, oldest first.
    pub fn pending(&self) -> Result<Vec<OperationRecord>, StoreError> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM operations WHERE result = ?1 ORDER BY id ASC"
        );
        let mut stmt = db.prepare(&sql).during("prepare pending query")?;
        let rows = stmt
            .query_map(params![PENDING_CODE], operation_from_row)
            .during("query pending operations")?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.during("read pending operation")?);
        }
        Ok(records)
    }
}

impl OperationLedger for SqliteStore {
    fn create_pending(&self, operation: &NewOperation) -> Result<OperationId, StoreError> {
        let mut db = self.conn()?;
        let tx = db.transaction().during("start create transaction")?;

        tx.execute(
            "INSERT INTO operations
                (unit_id, deployment, old_image, new_image, operator, source_id,
                 insert_time, online_date, result, message, cost_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, '', 0)",
            params![
                operation.unit_id.value(),
                &operation.deployment,
                &operation.old_image,
                &operation.new_image,
                &operation.operator,
                &operation.source_id,
                operation.insert_time.format(DATETIME_FORMAT).to_string(),
                operation.online_date.format(DATE_FORMAT).to_string(),
                PENDING_CODE,
            ],
        )
        .during("insert operation")?;
        let id = tx.last_insert_rowid();

        tx.commit().during("commit operation insert")?;
        Ok(OperationId::new(id))
    }

    fn link_parent(&self, parent: ParentId, operation: OperationId) -> Result<(), StoreError> {
        let mut db = self.conn()?;
        let tx = db.transaction().during("start link transaction")?;

        let updated = tx
            .execute(
                "UPDATE release_items SET operation_id = ?1 WHERE id = ?2",
                params![operation.value(), parent.value()],
            )
            .during("link parent record")?;
        if updated == 0 {
            // Dropping the transaction rolls it back.
            return Err(StoreError::ParentNotFound(parent));
        }

        tx.commit().during("commit parent link")?;
        Ok(())
    }

    fn finalize(&self, id: OperationId, outcome: &Outcome) -> Result<FinalizeStatus, StoreError> {
        let mut db = self.conn()?;
        let tx = db.transaction().during("start finalize transaction")?;

        let cost = i64::try_from(outcome.cost_secs()).unwrap_or(i64::MAX);
        let updated = tx
            .execute(
                "UPDATE operations SET result = ?1, message = ?2, cost_secs = ?3
                 WHERE id = ?4 AND result = ?5",
                params![
                    outcome.result().code(),
                    outcome.message(),
                    cost,
                    id.value(),
                    PENDING_CODE
                ],
            )
            .during("finalize operation")?;

        if updated == 0 {
            let current: Option<i64> = tx
                .query_row(
                    "SELECT result FROM operations WHERE id = ?1",
                    params![id.value()],
                    |row| row.get(0),
                )
                .optional()
                .during("read operation result")?;
            let Some(code) = current else {
                return Err(StoreError::OperationNotFound(id));
            };
            let status = ResultStatus::from_code(code)
                .map_err(|e| conversion_failure(0, Type::Integer, e))
                .during("decode operation result")?;
            return Ok(FinalizeStatus::AlreadyFinal(status));
        }

        tx.commit().during("commit finalize")?;
        Ok(FinalizeStatus::Applied)
    }

    fn sync_release(
        &self,
        parent: ParentId,
        operation: OperationId,
    ) -> Result<ReleaseSync, StoreError> {
        let mut db = self.conn()?;
        let tx = db.transaction().during("start release sync transaction")?;

        let release_id: i64 = tx
            .query_row(
                "SELECT release_id FROM release_items WHERE id = ?1",
                params![parent.value()],
                |row| row.get(0),
            )
            .optional()
            .during("read release item")?
            .ok_or(StoreError::ParentNotFound(parent))?;

        let (result, message): (i64, String) = tx
            .query_row(
                "SELECT result, message FROM operations WHERE id = ?1",
                params![operation.value()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .during("read operation outcome")?
            .ok_or(StoreError::OperationNotFound(operation))?;

        let updated = tx
            .execute(
                "UPDATE releases SET is_success = ?1, error_log = ?2 WHERE id = ?3",
                params![result, message, release_id],
            )
            .during("update release")?;
        if updated == 0 {
            return Err(StoreError::ReleaseNotFound(release_id));
        }

        tx.commit().during("commit release sync")?;

        let release = read_release(&db, release_id)?.ok_or(StoreError::ReleaseNotFound(release_id))?;
        Ok(ReleaseSync {
            release,
            operation_id: operation,
        })
    }

    fn load(&self, id: OperationId) -> Result<Option<OperationRecord>, StoreError> {
        let db = self.conn()?;
        let sql = format!("SELECT {OPERATION_COLUMNS} FROM operations WHERE id = ?1");
        db.query_row(&sql, params![id.value()], operation_from_row)
            .optional()
            .during("load operation")
    }
}

fn read_release(db: &Connection, release_id: i64) -> Result<Option<ReleaseRecord>, StoreError> {
    db.query_row(
        "SELECT id, source_id, is_success, error_log FROM releases WHERE id = ?1",
        params![release_id],
        |row| {
            Ok(ReleaseRecord {
                id: row.get(0)?,
                source_id: row.get(1)?,
                result: result_from_row(row, 2)?,
                error_log: row.get(3)?,
            })
        },
    )
    .optional()
    .during("read release")
}

fn conversion_failure(
    idx: usize,
    ty: Type,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn result_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<ResultStatus> {
    let code: i64 = row.get(idx)?;
    ResultStatus::from_code(code).map_err(|e| conversion_failure(idx, Type::Integer, e))
}

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<OperationRecord> {
    let insert_time: String = row.get(7)?;
    let insert_time = NaiveDateTime::parse_from_str(&insert_time, DATETIME_FORMAT)
        .map_err(|e| conversion_failure(7, Type::Text, e))?;
    let online_date: String = row.get(8)?;
    let online_date = NaiveDate::parse_from_str(&online_date, DATE_FORMAT)
        .map_err(|e| conversion_failure(8, Type::Text, e))?;
    let cost: i64 = row.get(11)?;

    Ok(OperationRecord {
        id: OperationId::new(row.get(0)?),
        unit_id: UnitId::new(row.get(1)?),
        deployment: row.get(2)?,
        old_image: row.get(3)?,
        new_image: row.get(4)?,
        operator: row.get(5)?,
        source_id: row.get(6)?,
        insert_time,
        online_date,
        result: result_from_row(row, 9)?,
        message: row.get(10)?,
        cost_secs: u64::try_from(cost).unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_types::FailureKind;

    fn new_operation(created_at: &str) -> NewOperation {
        let insert_time = NaiveDateTime::parse_from_str(created_at, DATETIME_FORMAT).unwrap();
        NewOperation {
            unit_id: UnitId::new(42),
            deployment: "cart-v2".to_string(),
            old_image: "registry/cart:1.0".to_string(),
            new_image: "registry/cart:1.1".to_string(),
            operator: "alice".to_string(),
            source_id: "CI-7".to_string(),
            insert_time,
            online_date: crate::online_date(insert_time),
        }
    }

    #[test]
    fn creates_pending_record_with_online_date() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .create_pending(&new_operation("2024-05-02 02:10:00"))
            .unwrap();

        let record = store.load(id).unwrap().expect("record exists");
        assert_eq!(record.result, ResultStatus::Pending);
        assert_eq!(record.deployment, "cart-v2");
        assert_eq!(record.source_id, "CI-7");
        assert_eq!(record.cost_secs, 0);
        assert_eq!(record.online_date.to_string(), "2024-05-01");
        assert_eq!(
            record.insert_time.format(DATETIME_FORMAT).to_string(),
            "2024-05-02 02:10:00"
        );
    }

    #[test]
    fn identifiers_are_distinct() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.create_pending(&new_operation("2024-05-02 10:00:00")).unwrap();
        let b = store.create_pending(&new_operation("2024-05-02 10:00:01")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn finalize_applies_once_then_reports_existing_result() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.create_pending(&new_operation("2024-05-02 10:00:00")).unwrap();

        let timeout = Outcome::failure(FailureKind::ConvergenceTimeout, "deadline hit", 480);
        assert_eq!(store.finalize(id, &timeout).unwrap(), FinalizeStatus::Applied);

        let late = Outcome::success("cart-v2 updated", 500);
        assert_eq!(
            store.finalize(id, &late).unwrap(),
            FinalizeStatus::AlreadyFinal(ResultStatus::Failure)
        );

        let record = store.load(id).unwrap().unwrap();
        assert_eq!(record.result, ResultStatus::Failure);
        assert_eq!(record.message, "deadline hit");
        assert_eq!(record.cost_secs, 480);
    }

    #[test]
    fn finalize_unknown_operation_is_an_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .finalize(OperationId::new(99), &Outcome::success("ok", 1))
            .unwrap_err();
        assert!(matches!(err, StoreError::OperationNotFound(id) if id.value() == 99));
    }

    #[test]
    fn link_parent_overwrites_previous_link() {
        let store = SqliteStore::open_in_memory().unwrap();
        let release = store.create_release("R-1").unwrap();
        let parent = store.create_release_item(release).unwrap();
        assert_eq!(store.linked_operation(parent).unwrap(), None);

        let first = store.create_pending(&new_operation("2024-05-02 10:00:00")).unwrap();
        let second = store.create_pending(&new_operation("2024-05-02 11:00:00")).unwrap();
        store.link_parent(parent, first).unwrap();
        store.link_parent(parent, second).unwrap();

        assert_eq!(store.linked_operation(parent).unwrap(), Some(second));
    }

    #[test]
    fn link_parent_missing_parent_is_an_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let op = store.create_pending(&new_operation("2024-05-02 10:00:00")).unwrap();
        let parent = ParentId::from_raw(77).unwrap();
        let err = store.link_parent(parent, op).unwrap_err();
        assert!(matches!(err, StoreError::ParentNotFound(p) if p == parent));
    }

    #[test]
    fn sync_release_copies_outcome_to_master_record() {
        let store = SqliteStore::open_in_memory().unwrap();
        let release = store.create_release("R-9").unwrap();
        let parent = store.create_release_item(release).unwrap();
        let op = store.create_pending(&new_operation("2024-05-02 10:00:00")).unwrap();
        store.link_parent(parent, op).unwrap();
        store
            .finalize(
                op,
                &Outcome::failure(FailureKind::RemoteRejected, "image not found", 0),
            )
            .unwrap();

        let sync = store.sync_release(parent, op).unwrap();
        assert_eq!(sync.operation_id, op);
        assert_eq!(sync.release.id, release);
        assert_eq!(sync.release.source_id, "R-9");
        assert_eq!(sync.release.result, ResultStatus::Failure);
        assert_eq!(sync.release.error_log, "image not found");
        assert_eq!(store.release(release).unwrap(), Some(sync.release));
    }

    #[test]
    fn sync_release_missing_operation_leaves_release_untouched() {
        let store = SqliteStore::open_in_memory().unwrap();
        let release = store.create_release("R-9").unwrap();
        let parent = store.create_release_item(release).unwrap();

        let err = store.sync_release(parent, OperationId::new(5)).unwrap_err();
        assert!(matches!(err, StoreError::OperationNotFound(_)));
        let untouched = store.release(release).unwrap().unwrap();
        assert_eq!(untouched.result, ResultStatus::Pending);
    }

    #[test]
    fn pending_lists_only_unfinalized_records() {
        let store = SqliteStore::open_in_memory().unwrap();
        let done = store.create_pending(&new_operation("2024-05-02 10:00:00")).unwrap();
        let stuck = store.create_pending(&new_operation("2024-05-02 10:05:00")).unwrap();
        store.finalize(done, &Outcome::success("ok", 12)).unwrap();

        let pending = store.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, stuck);
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout.db");
        let id = {
            let store = SqliteStore::open(&path).unwrap();
            let id = store.create_pending(&new_operation("2024-05-02 10:00:00")).unwrap();
            store.finalize(id, &Outcome::success("ok", 30)).unwrap();
            id
        };

        let reopened = SqliteStore::open(&path).unwrap();
        let record = reopened.load(id).unwrap().unwrap();
        assert_eq!(record.result, ResultStatus::Success);
        assert_eq!(record.cost_secs, 30);
    }
}
