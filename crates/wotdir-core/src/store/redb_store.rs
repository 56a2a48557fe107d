//! # redb-backed Graph Store
//!
//! One row per graph partition: the partition name maps to the
//! postcard-encoded list of its triples. redb supplies the rest:
//! - ACID write transactions, single writer
//! - MVCC snapshots for readers
//! - Crash safety (copy-on-write B-trees)

use super::{GraphStore, ReadTxn, UpdateOperation, UpdateStatement, WriteTxn, parse_body};
use crate::codec::{Triple, TripleSet};
use crate::{DirectoryError, EntityKey};
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use std::path::Path;

/// Partition name -> postcard-encoded `Vec<Triple>`.
const PARTITIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("partitions");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const FORMAT_VERSION_KEY: &str = "format_version";
const FORMAT_VERSION: u64 = 1;

pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let db = Database::create(path.as_ref()).map_err(DirectoryError::store)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(DirectoryError::store)?;
            let _ = write_txn
                .open_table(PARTITIONS)
                .map_err(DirectoryError::store)?;
            {
                let mut meta = write_txn
                    .open_table(METADATA)
                    .map_err(DirectoryError::store)?;
                let existing = meta
                    .get(FORMAT_VERSION_KEY)
                    .map_err(DirectoryError::store)?
                    .map(|v| v.value());
                match existing {
                    None => {
                        meta.insert(FORMAT_VERSION_KEY, FORMAT_VERSION)
                            .map_err(DirectoryError::store)?;
                    }
                    Some(FORMAT_VERSION) => {}
                    Some(other) => {
                        return Err(DirectoryError::StoreOperation(format!(
                            "unsupported store format version {other} (expected {FORMAT_VERSION})"
                        )));
                    }
                }
            }
            write_txn.commit().map_err(DirectoryError::store)?;
        }

        tracing::debug!(path = %path.as_ref().display(), "opened redb store");
        Ok(Self { db })
    }
}

fn encode(triples: &TripleSet) -> Result<Vec<u8>, DirectoryError> {
    let list: Vec<&Triple> = triples.iter().collect();
    postcard::to_allocvec(&list).map_err(DirectoryError::store)
}

fn decode(bytes: &[u8]) -> Result<TripleSet, DirectoryError> {
    let list: Vec<Triple> = postcard::from_bytes(bytes).map_err(DirectoryError::store)?;
    Ok(list.into_iter().collect())
}

fn read_from(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &EntityKey,
) -> Result<TripleSet, DirectoryError> {
    match table.get(key.as_str()).map_err(DirectoryError::store)? {
        Some(bytes) => decode(bytes.value()),
        None => Ok(TripleSet::new()),
    }
}

fn names_from(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> Result<Vec<EntityKey>, DirectoryError> {
    let mut names = Vec::new();
    for entry in table.iter().map_err(DirectoryError::store)? {
        let (key, _) = entry.map_err(DirectoryError::store)?;
        names.push(EntityKey::from_raw(key.value()));
    }
    Ok(names)
}

struct RedbRead {
    txn: ReadTransaction,
}

impl ReadTxn for RedbRead {
    fn read_partition(&self, key: &EntityKey) -> Result<TripleSet, DirectoryError> {
        let table = self
            .txn
            .open_table(PARTITIONS)
            .map_err(DirectoryError::store)?;
        read_from(&table, key)
    }

    fn list_partition_names(&self) -> Result<Vec<EntityKey>, DirectoryError> {
        let table = self
            .txn
            .open_table(PARTITIONS)
            .map_err(DirectoryError::store)?;
        names_from(&table)
    }
}

struct RedbWrite {
    txn: WriteTransaction,
}

impl ReadTxn for RedbWrite {
    fn read_partition(&self, key: &EntityKey) -> Result<TripleSet, DirectoryError> {
        let table = self
            .txn
            .open_table(PARTITIONS)
            .map_err(DirectoryError::store)?;
        read_from(&table, key)
    }

    fn list_partition_names(&self) -> Result<Vec<EntityKey>, DirectoryError> {
        let table = self
            .txn
            .open_table(PARTITIONS)
            .map_err(DirectoryError::store)?;
        names_from(&table)
    }
}

impl WriteTxn for RedbWrite {
    fn execute_update(&mut self, statement: &UpdateStatement) -> Result<(), DirectoryError> {
        let mut table = self
            .txn
            .open_table(PARTITIONS)
            .map_err(DirectoryError::store)?;
        for op in statement.operations() {
            match op {
                UpdateOperation::DeleteWhere { graph } => {
                    table
                        .remove(graph.as_str())
                        .map_err(DirectoryError::store)?;
                }
                UpdateOperation::InsertData { graph, body } => {
                    let added = parse_body(graph, body)?;
                    if added.is_empty() {
                        continue;
                    }
                    let mut merged = read_from(&table, graph)?;
                    merged.extend(added);
                    let bytes = encode(&merged)?;
                    table
                        .insert(graph.as_str(), bytes.as_slice())
                        .map_err(DirectoryError::store)?;
                }
            }
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), DirectoryError> {
        self.txn.commit().map_err(DirectoryError::store)
    }

    fn abort(self: Box<Self>) -> Result<(), DirectoryError> {
        self.txn.abort().map_err(DirectoryError::store)
    }
}

impl GraphStore for RedbStore {
    fn begin_read(&self) -> Result<Box<dyn ReadTxn + '_>, DirectoryError> {
        let txn = self.db.begin_read().map_err(DirectoryError::store)?;
        Ok(Box::new(RedbRead { txn }))
    }

    fn begin_write(&self) -> Result<Box<dyn WriteTxn + '_>, DirectoryError> {
        let txn = self.db.begin_write().map_err(DirectoryError::store)?;
        Ok(Box::new(RedbWrite { txn }))
    }
}

// =============================================================================
// TESTS
// =============================================================================
