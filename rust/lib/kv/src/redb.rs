use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};

use redb::{Database, DatabaseError, TableDefinition};
use tracing::debug;

use crate::error::KVError;
use crate::namespace;
use crate::traits::KVStore;

const TABLE: TableDefinition<&str, &str> = TableDefinition::new("silo");

/// File name of the database inside a silo's directory.
pub const DB_FILE: &str = "silo.redb";

/// RedbStore is the embedded KVStore backed by redb, a pure-Rust embedded
/// key-value database.
///
/// Each silo gets its own directory under the storage root:
///
/// ```text
/// {root}/{silo}/silo.redb
/// ```
///
/// redb holds an exclusive file lock on the database while it is open, so a
/// second open of the same silo (from this process or another) fails with
/// `KVError::OpenFailed` until the first handle is closed.
///
/// Reads run in parallel MVCC read transactions. Writes are serialized by
/// redb's single writer and committed with immediate durability.
pub struct RedbStore {
    path: PathBuf,
    db: RwLock<Option<Database>>,
}

impl RedbStore {
    /// Open or create the database for `namespace` under `root`.
    pub fn open(namespace: &str, root: &Path) -> Result<Self, KVError> {
        namespace::validate(namespace)?;

        let dir = root.join(namespace);
        fs::create_dir_all(&dir).map_err(|e| {
            KVError::OpenFailed(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let path = dir.join(DB_FILE);
        let db = Database::create(&path).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => KVError::OpenFailed(format!(
                "{} is locked by another open handle",
                path.display()
            )),
            other => KVError::OpenFailed(format!("{}: {}", path.display(), other)),
        })?;

        // Ensure the table exists so read transactions never see it missing.
        let write_txn = db
            .begin_write()
            .map_err(|e| KVError::OpenFailed(e.to_string()))?;
        {
            let _table = write_txn
                .open_table(TABLE)
                .map_err(|e| KVError::OpenFailed(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| KVError::OpenFailed(e.to_string()))?;

        debug!("RedbStore: opened silo {:?} at {}", namespace, path.display());
        Ok(Self {
            path,
            db: RwLock::new(Some(db)),
        })
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn database(&self) -> Result<RwLockReadGuard<'_, Option<Database>>, KVError> {
        let guard = self
            .db
            .read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        if guard.is_none() {
            return Err(KVError::Closed);
        }
        Ok(guard)
    }

    fn write<F>(&self, f: F) -> Result<(), KVError>
    where
        F: FnOnce(&mut redb::Table<'_, &'static str, &'static str>) -> Result<(), redb::StorageError>,
    {
        let guard = self.database()?;
        let db = guard.as_ref().ok_or(KVError::Closed)?;

        let write_txn = db
            .begin_write()
            .map_err(|e| KVError::WriteFailed(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| KVError::WriteFailed(e.to_string()))?;
            f(&mut table).map_err(|e| KVError::WriteFailed(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| KVError::WriteFailed(e.to_string()))
    }
}

impl KVStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<String>, KVError> {
        let guard = self.database()?;
        let db = guard.as_ref().ok_or(KVError::Closed)?;

        let read_txn = db
            .begin_read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(TABLE)
            .map_err(|e| KVError::Storage(e.to_string()))?;

        match table.get(key) {
            Ok(Some(val)) => Ok(Some(val.value().to_string())),
            Ok(None) => Ok(None),
            Err(e) => Err(KVError::Storage(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KVError> {
        self.write(|table| table.insert(key, value).map(|_| ()))
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        self.write(|table| table.remove(key).map(|_| ()))
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, KVError> {
        let guard = self.database()?;
        let db = guard.as_ref().ok_or(KVError::Closed)?;

        let read_txn = db
            .begin_read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(TABLE)
            .map_err(|e| KVError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        let iter = table
            .range(prefix..)
            .map_err(|e| KVError::Storage(e.to_string()))?;

        for entry in iter {
            let entry = entry.map_err(|e| KVError::Storage(e.to_string()))?;
            let key = entry.0.value().to_string();
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key, entry.1.value().to_string()));
        }

        Ok(results)
    }

    fn close(&self) -> Result<(), KVError> {
        let mut guard = self
            .db
            .write()
            .map_err(|e| KVError::CloseFailed(e.to_string()))?;
        // Dropping the database releases the file lock. Every commit was
        // already durable, so there is nothing left to flush.
        match guard.take() {
            Some(db) => {
                drop(db);
                debug!("RedbStore: closed {}", self.path.display());
                Ok(())
            }
            None => Err(KVError::Closed),
        }
    }
}
