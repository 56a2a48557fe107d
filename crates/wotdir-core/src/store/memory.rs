//! In-memory store with snapshot reads and a single writer.
//!
//! Committed state is an immutable map behind an `Arc`. Readers clone the
//! `Arc`; a writer works on a private copy and swaps it in on commit.

use super::{GraphStore, ReadTxn, UpdateOperation, UpdateStatement, WriteTxn, parse_body};
use crate::codec::TripleSet;
use crate::types::{acquire_lock, read_lock, write_lock};
use crate::{DirectoryError, EntityKey};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

type Partitions = BTreeMap<EntityKey, TripleSet>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: RwLock<Arc<Partitions>>,
    writer: Mutex<()>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Result<Arc<Partitions>, DirectoryError> {
        Ok(Arc::clone(&*read_lock(&self.committed, "memory store")?))
    }
}

struct MemoryRead {
    snapshot: Arc<Partitions>,
}

struct MemoryWrite<'a> {
    store: &'a MemoryStore,
    working: Partitions,
    _writer: MutexGuard<'a, ()>,
}

fn read(partitions: &Partitions, key: &EntityKey) -> TripleSet {
    partitions.get(key).cloned().unwrap_or_default()
}

fn names(partitions: &Partitions) -> Vec<EntityKey> {
    partitions
        .iter()
        .filter(|(_, triples)| !triples.is_empty())
        .map(|(key, _)| key.clone())
        .collect()
}

impl ReadTxn for MemoryRead {
    fn read_partition(&self, key: &EntityKey) -> Result<TripleSet, DirectoryError> {
        Ok(read(&self.snapshot, key))
    }

    fn list_partition_names(&self) -> Result<Vec<EntityKey>, DirectoryError> {
        Ok(names(&self.snapshot))
    }
}

impl ReadTxn for MemoryWrite<'_> {
    fn read_partition(&self, key: &EntityKey) -> Result<TripleSet, DirectoryError> {
        Ok(read(&self.working, key))
    }

    fn list_partition_names(&self) -> Result<Vec<EntityKey>, DirectoryError> {
        Ok(names(&self.working))
    }
}

impl WriteTxn for MemoryWrite<'_> {
    fn execute_update(&mut self, statement: &UpdateStatement) -> Result<(), DirectoryError> {
        for op in statement.operations() {
            match op {
                UpdateOperation::DeleteWhere { graph } => {
                    self.working.remove(graph);
                }
                UpdateOperation::InsertData { graph, body } => {
                    let triples = parse_body(graph, body)?;
                    if !triples.is_empty() {
                        self.working.entry(graph.clone()).or_default().extend(triples);
                    }
                }
            }
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), DirectoryError> {
        let this = *self;
        *write_lock(&this.store.committed, "memory store")? = Arc::new(this.working);
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<(), DirectoryError> {
        Ok(())
    }
}

impl GraphStore for MemoryStore {
    fn begin_read(&self) -> Result<Box<dyn ReadTxn + '_>, DirectoryError> {
        Ok(Box::new(MemoryRead {
            snapshot: self.snapshot()?,
        }))
    }

    fn begin_write(&self) -> Result<Box<dyn WriteTxn + '_>, DirectoryError> {
        let writer = acquire_lock(&self.writer, "memory store writer")?;
        let working = (*self.snapshot()?).clone();
        Ok(Box::new(MemoryWrite {
            store: self,
            working,
            _writer: writer,
        }))
    }
}
