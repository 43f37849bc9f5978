//! SQLite-backed object store.

use crate::{CommitBatch, FetchRequest, StorageError, StorageResult};
use hearth_model::{ManagedObject, Model};
use hearth_types::ObjectId;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const FINGERPRINT_KEY: &str = "model_fingerprint";

/// The on-disk store. One per logical store; only the root session's save
/// path writes to it.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    model: Arc<Model>,
}

impl SqliteStore {
    /// Opens (or creates) a store file for `model`.
    ///
    /// Fails with [`StorageError::IncompatibleSchema`] when the file was
    /// written by a model with a different fingerprint, or is not a
    /// database at all.
    pub fn open(path: &Path, model: Arc<Model>) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
            model,
        };
        store.init_schema()?;
        store.check_fingerprint()?;
        info!(path = %path.display(), "Opened object store");
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory(model: Arc<Model>) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
            model,
        };
        store.init_schema()?;
        store.check_fingerprint()?;
        Ok(store)
    }

    /// Removes a store file and its journal siblings. Missing files are
    /// not an error.
    pub fn destroy(path: &Path) -> StorageResult<()> {
        let mut candidates = vec![path.to_path_buf()];
        for suffix in ["-wal", "-shm", "-journal"] {
            let mut sibling = path.as_os_str().to_owned();
            sibling.push(suffix);
            candidates.push(PathBuf::from(sibling));
        }
        for candidate in candidates {
            match std::fs::remove_file(&candidate) {
                Ok(()) => debug!(path = %candidate.display(), "Removed store file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Path of the backing file, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The model this store was opened with.
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock();
        let result = conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS objects (
                id TEXT PRIMARY KEY,
                entity TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                modified_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_objects_entity ON objects(entity);

            CREATE TABLE IF NOT EXISTS store_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        );
        match result {
            Ok(()) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::NotADatabase =>
            {
                Err(StorageError::IncompatibleSchema {
                    expected: self.model.fingerprint(),
                    found: "unreadable".to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn check_fingerprint(&self) -> StorageResult<()> {
        let expected = self.model.fingerprint();
        let conn = self.conn.lock();
        let found: Option<String> = conn
            .query_row(
                "SELECT value FROM store_metadata WHERE key = ?1",
                params![FINGERPRINT_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match found {
            Some(found) if found == expected => Ok(()),
            Some(found) => {
                warn!(%expected, %found, "Store was written by a different model");
                Err(StorageError::IncompatibleSchema { expected, found })
            }
            None => {
                conn.execute(
                    "INSERT INTO store_metadata (key, value) VALUES (?1, ?2)",
                    params![FINGERPRINT_KEY, expected],
                )?;
                Ok(())
            }
        }
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Runs a fetch: loads the entity's rows, then filters, sorts and
    /// truncates in process.
    pub fn fetch(&self, request: &FetchRequest) -> StorageResult<Vec<ManagedObject>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, entity, data, created_at, modified_at FROM objects
             WHERE entity = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![request.entity], read_row)?;

        let mut objects = Vec::new();
        for row in rows {
            let object = decode(row?)?;
            if request.predicate.evaluate(&object) {
                objects.push(object);
            }
        }
        Ok(request.finish(objects))
    }

    /// Runs a fetch and returns its first result.
    pub fn fetch_single(&self, request: &FetchRequest) -> StorageResult<Option<ManagedObject>> {
        let request = request.clone().with_limit(1);
        Ok(self.fetch(&request)?.into_iter().next())
    }

    /// Loads one object by id.
    pub fn fetch_by_id(&self, id: &ObjectId) -> StorageResult<Option<ManagedObject>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, entity, data, created_at, modified_at FROM objects WHERE id = ?1",
                params![id.to_string()],
                read_row,
            )
            .optional()?;
        row.map(decode).transpose()
    }

    /// Number of stored objects of an entity.
    pub fn count(&self, entity: &str) -> StorageResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE entity = ?1",
            params![entity],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Writes a batch in one transaction. Either every change lands or
    /// none does.
    pub fn commit(&self, batch: &CommitBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        for object in batch.inserted.iter().chain(&batch.updated) {
            self.model
                .validate(object)
                .map_err(|e| StorageError::Constraint(e.to_string()))?;
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for object in &batch.inserted {
            tx.execute(
                "INSERT INTO objects (id, entity, data, created_at, modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    object.id.to_string(),
                    object.entity,
                    serde_json::to_string(&object.data)?,
                    object.created_at,
                    object.modified_at,
                ],
            )?;
        }
        for object in &batch.updated {
            let changed = tx.execute(
                "UPDATE objects SET data = ?2, modified_at = ?3 WHERE id = ?1",
                params![
                    object.id.to_string(),
                    serde_json::to_string(&object.data)?,
                    object.modified_at,
                ],
            )?;
            if changed == 0 {
                // Dropping `tx` rolls back.
                return Err(StorageError::Constraint(format!(
                    "{} {} no longer exists",
                    object.entity, object.id
                )));
            }
        }
        for id in &batch.deleted {
            tx.execute("DELETE FROM objects WHERE id = ?1", params![id.to_string()])?;
        }
        tx.commit()?;

        debug!(
            inserted = batch.inserted.len(),
            updated = batch.updated.len(),
            deleted = batch.deleted.len(),
            "Committed batch"
        );
        Ok(())
    }
}

type RawRow = (String, String, String, i64, i64);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode((id, entity, data, created_at, modified_at): RawRow) -> StorageResult<ManagedObject> {
    let id = ObjectId::parse(&id)
        .map_err(|e| StorageError::InvalidData(format!("invalid object id {id}: {e}")))?;
    Ok(ManagedObject {
        id,
        entity,
        data: serde_json::from_str(&data)?,
        created_at,
        modified_at,
    })
}
