//! # Directory
//!
//! The one object a process holds: write engine, cache, validator, event
//! log and event bus, built from a single [`DirectoryConfig`].

use crate::codec::{TripleSet, write_triples};
use crate::config::DirectoryConfig;
use crate::document::ThingDescription;
use crate::engine::{DirectoryWriteEngine, RebuildReport};
use crate::events::{EventCategory, EventHub, Subscription};
use crate::store::{GraphStore, StorageBackend};
use crate::validation::ValidationPipeline;
use crate::{DirectoryError, EntityKey};
use serde_json::Value;
use std::sync::Arc;

/// Thing Description directory over a graph store.
#[derive(Debug)]
pub struct Directory<S: GraphStore = StorageBackend> {
    engine: DirectoryWriteEngine<S>,
    events: Arc<EventHub>,
    config: DirectoryConfig,
}

impl<S: GraphStore> Directory<S> {
    /// Build a directory over `store`. The cache starts empty.
    pub fn new(store: S, config: DirectoryConfig) -> Self {
        let events = Arc::new(EventHub::with_capacity(config.event_capacity));
        let engine = DirectoryWriteEngine::new(
            store,
            ValidationPipeline::new(config.rules.clone()),
            config.graph_prefix.clone(),
        )
        .with_events(Arc::clone(&events));
        Self {
            engine,
            events,
            config,
        }
    }

    /// Build a directory and load every existing partition into the cache.
    pub fn open(
        store: S,
        config: DirectoryConfig,
    ) -> Result<(Self, RebuildReport), DirectoryError> {
        let directory = Self::new(store, config);
        let report = directory.rebuild_cache()?;
        Ok((directory, report))
    }

    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    #[must_use]
    pub fn into_store(self) -> S {
        self.engine.into_store()
    }

    #[must_use]
    pub fn engine(&self) -> &DirectoryWriteEngine<S> {
        &self.engine
    }

    #[must_use]
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    pub fn insert(&self, raw: Value) -> Result<(String, Arc<ThingDescription>), DirectoryError> {
        self.engine.insert(raw)
    }

    pub fn upsert(&self, raw: Value) -> Result<(String, bool), DirectoryError> {
        self.engine.upsert(raw)
    }

    pub fn patch(&self, partial: Value, id: &str) -> Result<String, DirectoryError> {
        self.engine.patch(partial, id)
    }

    pub fn delete(&self, id: &str) -> Result<(), DirectoryError> {
        self.engine.delete(id)
    }

    pub fn rebuild_cache(&self) -> Result<RebuildReport, DirectoryError> {
        self.engine.rebuild_cache()
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn exists(&self, id: &str) -> Result<bool, DirectoryError> {
        self.engine.exists(id)
    }

    pub fn get(&self, id: &str) -> Result<Option<Arc<ThingDescription>>, DirectoryError> {
        self.engine.get_by_id(id)
    }

    /// Every document, ordered by id.
    pub fn all(&self) -> Result<Vec<Arc<ThingDescription>>, DirectoryError> {
        self.engine.get_all()
    }

    pub fn count(&self) -> Result<usize, DirectoryError> {
        self.engine.cache().len()
    }

    /// Every partition of one read snapshot of the store, for graph-pattern
    /// search.
    pub fn partitions(&self) -> Result<Vec<(EntityKey, TripleSet)>, DirectoryError> {
        let read = self.engine.store().begin_read()?;
        read.list_partition_names()?
            .into_iter()
            .map(|key| {
                let triples = read.read_partition(&key)?;
                Ok((key, triples))
            })
            .collect()
    }

    /// All partitions in linear form, each under a `# graph <key>` header.
    pub fn export_linear(&self) -> Result<String, DirectoryError> {
        let mut out = String::new();
        for (key, triples) in self.partitions()? {
            out.push_str("# graph <");
            out.push_str(key.as_str());
            out.push_str(">\n");
            out.push_str(&write_triples(&triples));
        }
        Ok(out)
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Live receivers for `categories` plus the events after `since`.
    pub fn subscribe(
        &self,
        categories: &[EventCategory],
        since: Option<&str>,
    ) -> Result<Subscription, DirectoryError> {
        self.events.subscribe(categories, since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn directory() -> Directory<MemoryStore> {
        Directory::new(MemoryStore::new(), DirectoryConfig::default())
    }

    fn thing(id: &str, title: &str) -> Value {
        json!({
            "@context": "https://www.w3.org/2022/wot/td/v1.1",
            "id": id,
            "title": title,
            "securityDefinitions": {"nosec_sc": {"scheme": "nosec"}},
            "security": ["nosec_sc"]
        })
    }

    #[test]
    fn writes_emit_events_in_commit_order() {
        let dir = directory();
        dir.upsert(thing("urn:a", "A")).expect("create a");
        dir.upsert(thing("urn:a", "A2")).expect("update a");
        dir.upsert(thing("urn:b", "B")).expect("create b");

        let log = dir.events().log();
        let both = log
            .replay(Some("-1"), &[EventCategory::Created, EventCategory::Updated])
            .expect("replay");
        let seen: Vec<_> = both
            .iter()
            .map(|e| (e.category, e.sequence_id))
            .collect();
        assert_eq!(
            seen,
            vec![
                (EventCategory::Created, 0),
                (EventCategory::Updated, 1),
                (EventCategory::Created, 2)
            ]
        );
        let created = log
            .replay(Some("-1"), &[EventCategory::Created])
            .expect("replay");
        assert_eq!(created.len(), 2);
        assert_eq!(created[1].payload, r#"{"id":"urn:b"}"#);
    }

    #[test]
    fn failed_delete_appends_nothing() {
        let dir = directory();
        assert!(matches!(
            dir.delete("urn:missing"),
            Err(DirectoryError::NotFound(_))
        ));
        assert!(dir.events().log().is_empty().expect("empty"));
    }

    #[test]
    fn export_lists_every_partition() {
        let dir = directory();
        dir.upsert(thing("urn:a", "A")).expect("create");
        dir.upsert(thing("urn:b", "B")).expect("create");
        let text = dir.export_linear().expect("export");
        assert!(text.contains("# graph <http://localhost/wotdir/graph/urn:a>"));
        assert!(text.contains("# graph <http://localhost/wotdir/graph/urn:b>"));
        assert_eq!(dir.partitions().expect("partitions").len(), 2);
        assert_eq!(dir.count().expect("count"), 2);
    }

    #[test]
    fn open_loads_existing_partitions() {
        let store = MemoryStore::new();
        let first = Directory::new(store, DirectoryConfig::default());
        first.upsert(thing("urn:a", "A")).expect("create");
        let store = first.into_store();

        let (reopened, report) =
            Directory::open(store, DirectoryConfig::default()).expect("open");
        assert_eq!(report.loaded, 1);
        assert_eq!(
            reopened.get("urn:a").expect("get").expect("present").title(),
            Some("A")
        );
    }
}
