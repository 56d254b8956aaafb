//! redb-backed document store
//!
//! One [`Database`] holds every table (see [`tables`]). A write transaction is
//! the unit of atomicity: engines open one, touch as many tables as the
//! operation needs, and commit once. Dropping an uncommitted transaction
//! discards everything it wrote.
//!
//! # Durability
//!
//! redb commits with `Durability::Immediate`; a commit is persistent as soon
//! as `commit()` returns and the file is always in a consistent state.

pub mod idempotency;
pub mod tables;

use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, Table, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::error::AppError;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use tables::*;

pub use idempotency::{IdempotencyRecord, request_fingerprint};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        tracing::error!(error = %err, "Storage error occurred");
        match err {
            StorageError::Serialization(e) => AppError::internal(format!("Corrupt document: {e}")),
            other => AppError::database(other.to_string()),
        }
    }
}

/// Handle to the embedded database, cheap to clone
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
}

impl Storage {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (tests and ephemeral runs)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        // Create all tables so read transactions never see a missing table
        let write_txn = db.begin_write()?;
        {
            for def in [
                ITEMS,
                LOTS,
                SUPPLIERS,
                PURCHASE_ORDERS,
                STOCK_COUNTS,
                WASTE,
                MENU_ITEMS,
                RECIPES,
                POS_SESSIONS,
                ORDERS,
                PAYMENTS,
                TIPS,
                TICKETS,
                ERROR_RECORDS,
                ACTION_TOKENS,
                IDEMPOTENCY,
            ] {
                let _ = write_txn.open_table(def)?;
            }
            for def in [
                ITEMS_BY_VENUE,
                LOTS_BY_ITEM,
                MENU_BY_VENUE,
                PAYMENTS_BY_ORDER,
                TICKETS_BY_ORDER,
                TICKET_OPS,
                ERRORS_BY_VENUE,
            ] {
                let _ = write_txn.open_table(def)?;
            }
            let _ = write_txn.open_table(LEDGER)?;
            let _ = write_txn.open_table(LEDGER_BY_REF)?;
            let _ = write_txn.open_table(WASTE_BY_VENUE)?;
            let _ = write_txn.open_table(OUTBOX)?;
            let _ = write_txn.open_table(TICKETS_BY_VENUE)?;
            let _ = write_txn.open_table(STATIONS)?;
            let _ = write_txn.open_table(ERROR_FINGERPRINTS)?;
            let _ = write_txn.open_table(COUNTERS)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> StorageResult<ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    /// Raw database handle
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Read one document outside of any write
    pub fn get<T: DeserializeOwned>(&self, def: DocTable, key: &str) -> StorageResult<Option<T>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(def)?;
        get_doc(&table, key)
    }
}

// ========== Document helpers ==========

/// Load a JSON document by key
pub fn get_doc<T, Tbl>(table: &Tbl, key: &str) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

/// Store a JSON document under key
pub fn put_doc<T: Serialize>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    doc: &T,
) -> StorageResult<()> {
    let value = serde_json::to_vec(doc)?;
    table.insert(key, value.as_slice())?;
    Ok(())
}

/// Ids stored under `prefix` in a `(prefix, id)` index, in key order
pub fn index_ids<Tbl>(table: &Tbl, prefix: &str) -> StorageResult<Vec<String>>
where
    Tbl: ReadableTable<(&'static str, &'static str), ()>,
{
    let mut ids = Vec::new();
    for row in table.range((prefix, "")..)? {
        let (key, _) = row?;
        let (p, id) = key.value();
        if p != prefix {
            break;
        }
        ids.push(id.to_string());
    }
    Ok(ids)
}

/// Load every document listed in a `(prefix, id)` index
pub fn load_indexed<T, Idx, Tbl>(index: &Idx, docs: &Tbl, prefix: &str) -> StorageResult<Vec<T>>
where
    T: DeserializeOwned,
    Idx: ReadableTable<(&'static str, &'static str), ()>,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    let mut out = Vec::new();
    for id in index_ids(index, prefix)? {
        if let Some(doc) = get_doc(docs, &id)? {
            out.push(doc);
        }
    }
    Ok(out)
}

/// Increment a named counter inside the transaction and return the new value
pub fn next_counter(txn: &WriteTransaction, name: &str) -> StorageResult<u64> {
    let mut table = txn.open_table(COUNTERS)?;
    let current = table.get(name)?.map(|g| g.value()).unwrap_or(0);
    let next = current + 1;
    table.insert(name, next)?;
    Ok(next)
}
