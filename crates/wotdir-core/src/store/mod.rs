//! # Graph Store
//!
//! The transactional quad store behind the directory.
//!
//! A store holds one named graph partition per entity. Writers go through a
//! [`WriteTxn`] and express changes as [`UpdateStatement`]s; readers get a
//! consistent snapshot through a [`ReadTxn`]. Dropping a write transaction
//! without committing ends it with no effect.
//!
//! ## Backends
//!
//! - [`MemoryStore`]: MVCC snapshots in memory (tests, `--backend memory`)
//! - [`RedbStore`]: redb-backed, ACID, persistent

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::codec::TripleSet;
use crate::{DirectoryError, EntityKey};
use std::fmt;
use std::path::Path;

// =============================================================================
// UPDATE STATEMENTS
// =============================================================================

/// One operation of an update statement, scoped to a single partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOperation {
    /// Remove every triple of the partition.
    DeleteWhere { graph: EntityKey },
    /// Add the triples written in linear form to the partition.
    InsertData { graph: EntityKey, body: String },
}

/// An ordered sequence of update operations executed inside one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStatement {
    operations: Vec<UpdateOperation>,
}

impl UpdateStatement {
    /// Insert a fresh partition.
    #[must_use]
    pub fn insert(graph: EntityKey, body: String) -> Self {
        Self {
            operations: vec![UpdateOperation::InsertData { graph, body }],
        }
    }

    /// Replace a partition wholesale: delete-then-insert.
    #[must_use]
    pub fn replace(graph: EntityKey, body: String) -> Self {
        Self {
            operations: vec![
                UpdateOperation::DeleteWhere {
                    graph: graph.clone(),
                },
                UpdateOperation::InsertData { graph, body },
            ],
        }
    }

    /// Remove a partition.
    #[must_use]
    pub fn delete(graph: EntityKey) -> Self {
        Self {
            operations: vec![UpdateOperation::DeleteWhere { graph }],
        }
    }

    #[must_use]
    pub fn operations(&self) -> &[UpdateOperation] {
        &self.operations
    }
}

impl fmt::Display for UpdateStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.operations.iter().enumerate() {
            if i > 0 {
                f.write_str(";\n")?;
            }
            match op {
                UpdateOperation::DeleteWhere { graph } => {
                    write!(f, "DELETE WHERE {{ GRAPH <{graph}> {{ ?s ?p ?o }} }}")?;
                }
                UpdateOperation::InsertData { graph, body } => {
                    write!(f, "INSERT DATA {{ GRAPH <{graph}> {{\n{body}}} }}")?;
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

/// Read access to a consistent snapshot.
pub trait ReadTxn {
    /// Triples of one partition; empty if the partition does not exist.
    fn read_partition(&self, key: &EntityKey) -> Result<TripleSet, DirectoryError>;

    /// Names of every non-empty partition, in order.
    fn list_partition_names(&self) -> Result<Vec<EntityKey>, DirectoryError>;
}

/// A write transaction. Reads observe the transaction's own uncommitted changes.
pub trait WriteTxn: ReadTxn {
    /// Execute an update statement. A failure leaves the transaction open;
    /// the caller is expected to abort it.
    fn execute_update(&mut self, statement: &UpdateStatement) -> Result<(), DirectoryError>;

    fn commit(self: Box<Self>) -> Result<(), DirectoryError>;

    fn abort(self: Box<Self>) -> Result<(), DirectoryError>;
}

/// A transactional store of named graph partitions.
pub trait GraphStore: Send + Sync {
    fn begin_read(&self) -> Result<Box<dyn ReadTxn + '_>, DirectoryError>;

    fn begin_write(&self) -> Result<Box<dyn WriteTxn + '_>, DirectoryError>;
}

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Storage backend selected at startup.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory store (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed store using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

impl StorageBackend {
    /// Open (or create) a redb database at `path`.
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        Ok(Self::Persistent(RedbStore::open(path)?))
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }
}

impl GraphStore for StorageBackend {
    fn begin_read(&self) -> Result<Box<dyn ReadTxn + '_>, DirectoryError> {
        match self {
            Self::InMemory(store) => store.begin_read(),
            Self::Persistent(store) => store.begin_read(),
        }
    }

    fn begin_write(&self) -> Result<Box<dyn WriteTxn + '_>, DirectoryError> {
        match self {
            Self::InMemory(store) => store.begin_write(),
            Self::Persistent(store) => store.begin_write(),
        }
    }
}

/// Parse the linear-form body of an insert, mapping failures to a store error.
pub(crate) fn parse_body(graph: &EntityKey, body: &str) -> Result<TripleSet, DirectoryError> {
    crate::codec::parse_triples(body).map_err(|e| {
        DirectoryError::StoreOperation(format!("malformed INSERT DATA for <{graph}>: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_renders_delete_then_insert() {
        let key = EntityKey::from_raw("http://g/urn:x");
        let stmt = UpdateStatement::replace(key.clone(), "<urn:x> <http://p> \"v\" .\n".into());
        let text = stmt.to_string();
        let delete = text.find("DELETE WHERE").expect("delete");
        let insert = text.find("INSERT DATA").expect("insert");
        assert!(delete < insert);
        assert!(text.contains("GRAPH <http://g/urn:x>"));
        assert_eq!(stmt.operations().len(), 2);
    }

    #[test]
    fn default_backend_is_in_memory() {
        assert!(!StorageBackend::default().is_persistent());
    }
}
