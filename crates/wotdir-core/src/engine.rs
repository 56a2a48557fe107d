//! # Directory Write Engine
//!
//! Every mutation runs the same pipeline:
//!
//! ```text
//! normalize -> decorate -> to_graph -> validate -> persist -> refresh
//! ```
//!
//! Conversion and validation failures return before a write transaction
//! begins. Any failure after `begin_write` aborts the transaction before the
//! error is returned. The persist step runs under one engine-wide lock and
//! stamps the commit with a version; the cache refresh then runs outside the
//! lock in its own read transaction, and the cache keeps only the newest
//! version per key.
//!
//! Every commit records exactly one event while the lock is still held, so
//! sequence ids follow commit order. The event is published once its refresh
//! has been attempted, even when that refresh fails.

use crate::cache::ThingCache;
use crate::codec::GraphCodec;
use crate::document::{KEY_AT_ID, KEY_ID, ThingDescription};
use crate::events::{Event, EventCategory, EventHub};
use crate::normalizer::{carry_created, decorate, merge_patch, normalize, now_timestamp, prune};
use crate::primitives::{MAX_ID_ATTEMPTS, URN_UUID_PREFIX};
use crate::store::{GraphStore, UpdateStatement, WriteTxn};
use crate::types::acquire_lock;
use crate::validation::ValidationPipeline;
use crate::{DirectoryError, EntityKey};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// What must hold for the partition inside the write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Precondition {
    /// Fresh key: a non-empty partition is a key collision.
    Absent,
    /// Existing entity: an empty partition is `NotFound`.
    Present,
    Any,
}

/// Event a commit reports. `Stored` depends on whether the partition
/// existed inside the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Created,
    Stored,
    Updated,
    Deleted,
}

impl Change {
    fn category(self, existed: bool) -> EventCategory {
        match self {
            Self::Created => EventCategory::Created,
            Self::Stored if !existed => EventCategory::Created,
            Self::Stored | Self::Updated => EventCategory::Updated,
            Self::Deleted => EventCategory::Deleted,
        }
    }
}

/// A landed commit and the event recorded for it.
#[derive(Debug)]
struct Committed {
    version: u64,
    existed: bool,
    event: Option<Event>,
}

/// Outcome of [`DirectoryWriteEngine::rebuild_cache`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub loaded: usize,
    /// Partitions that failed conversion, with the reason.
    pub skipped: Vec<(String, String)>,
}

/// Orchestrates writes against one store and keeps the cache in step.
pub struct DirectoryWriteEngine<S: GraphStore> {
    store: S,
    cache: ThingCache,
    codec: GraphCodec,
    validator: ValidationPipeline,
    prefix: String,
    write_lock: Mutex<()>,
    commit_version: AtomicU64,
    events: Option<Arc<EventHub>>,
}

impl<S: GraphStore> std::fmt::Debug for DirectoryWriteEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWriteEngine")
            .field("prefix", &self.prefix)
            .field("commit_version", &self.commit_version.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<S: GraphStore> DirectoryWriteEngine<S> {
    /// Wrap a store. The cache starts empty; call [`Self::rebuild_cache`]
    /// to load existing partitions.
    pub fn new(store: S, validator: ValidationPipeline, prefix: impl Into<String>) -> Self {
        Self {
            store,
            cache: ThingCache::new(),
            codec: GraphCodec::new(),
            validator,
            prefix: prefix.into(),
            write_lock: Mutex::new(()),
            commit_version: AtomicU64::new(0),
            events: None,
        }
    }

    /// Emit change events on `hub` after every commit.
    #[must_use]
    pub fn with_events(mut self, hub: Arc<EventHub>) -> Self {
        self.events = Some(hub);
        self
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Give the store back, dropping cache and engine state.
    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }

    #[must_use]
    pub fn cache(&self) -> &ThingCache {
        &self.cache
    }

    #[must_use]
    pub fn codec(&self) -> &GraphCodec {
        &self.codec
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn key_for(&self, id: &str) -> EntityKey {
        EntityKey::new(&self.prefix, id)
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Register a document without an id. Returns the assigned id and the
    /// document as stored.
    pub fn insert(&self, raw: Value) -> Result<(String, Arc<ThingDescription>), DirectoryError> {
        if raw.as_object().is_some_and(declares_id) {
            return Err(DirectoryError::MalformedRequest(
                "anonymous registration must not declare an id".to_string(),
            ));
        }

        let mut td = normalize(raw)?;
        let id = self.fresh_id()?;
        td.id = Some(id.clone());
        decorate(&mut td, &now_timestamp());

        let key = self.key_for(&id);
        let committed = self.persist(&key, &td, Precondition::Absent, Change::Created)?;
        let version = committed.version;
        let doc = self
            .finish(&key, &id, committed)?
            .ok_or_else(|| DirectoryError::CacheRefresh {
                id: id.clone(),
                reason: "partition empty after insert".to_string(),
            })?;

        tracing::info!(event = "thing_created", id = %id, version, "thing registered");
        Ok((id, doc))
    }

    /// Create or fully replace the document named by its id. Returns the id
    /// and whether it existed before the call.
    pub fn upsert(&self, raw: Value) -> Result<(String, bool), DirectoryError> {
        let mut td = normalize(raw)?;
        let id = td.id.clone().ok_or_else(|| {
            DirectoryError::MalformedRequest("document has no id".to_string())
        })?;

        let key = self.key_for(&id);
        let existing = self.cache.get(&key)?;
        carry_created(&mut td, existing.as_deref().and_then(ThingDescription::created));
        decorate(&mut td, &now_timestamp());

        let committed = self.persist(&key, &td, Precondition::Any, Change::Stored)?;
        let (version, existed) = (committed.version, committed.existed);
        self.finish(&key, &id, committed)?;

        tracing::info!(
            event = Change::Stored.category(existed).wire_name(),
            id = %id,
            version,
            "thing stored"
        );
        Ok((id, existed))
    }

    /// Overlay `partial` onto the stored document, dropping null fields.
    pub fn patch(&self, partial: Value, id: &str) -> Result<String, DirectoryError> {
        let Value::Object(mut partial) = partial else {
            return Err(DirectoryError::Conversion(
                "patch document must be a JSON object".to_string(),
            ));
        };
        for field in [KEY_ID, KEY_AT_ID] {
            match partial.shift_remove(field) {
                None | Some(Value::Null) => {}
                Some(Value::String(declared)) if declared == id => {}
                Some(other) => {
                    return Err(DirectoryError::MalformedRequest(format!(
                        "patch for {id} declares a different {field}: {other}"
                    )));
                }
            }
        }

        let key = self.key_for(id);
        let current = self
            .cache
            .get(&key)?
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))?;

        let mut merged = current.to_map();
        merge_patch(&mut merged, partial);
        let mut merged = Value::Object(merged);
        prune(&mut merged);

        let mut td = normalize(merged)?;
        td.id = Some(id.to_string());
        carry_created(&mut td, current.created());
        decorate(&mut td, &now_timestamp());

        let committed = self.persist(&key, &td, Precondition::Present, Change::Updated)?;
        let version = committed.version;
        self.finish(&key, id, committed)?;

        tracing::info!(event = "thing_updated", id = %id, version, "thing patched");
        Ok(id.to_string())
    }

    /// Remove a document. `NotFound` when no partition exists for `id`.
    pub fn delete(&self, id: &str) -> Result<(), DirectoryError> {
        let key = self.key_for(id);
        let statement = UpdateStatement::delete(key.clone());
        let committed = self.commit(&key, &statement, Precondition::Present, Change::Deleted)?;
        let version = committed.version;
        self.finish(&key, id, committed)?;

        tracing::info!(event = "thing_deleted", id = %id, version, "thing deleted");
        Ok(())
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn exists(&self, id: &str) -> Result<bool, DirectoryError> {
        self.cache.has(&self.key_for(id))
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<Arc<ThingDescription>>, DirectoryError> {
        self.cache.get(&self.key_for(id))
    }

    pub fn get_all(&self) -> Result<Vec<Arc<ThingDescription>>, DirectoryError> {
        self.cache.all()
    }

    /// Reload the cache from every partition in the store.
    ///
    /// Partitions that fail conversion are skipped and reported; they do not
    /// abort the rebuild.
    pub fn rebuild_cache(&self) -> Result<RebuildReport, DirectoryError> {
        let version = self.commit_version.load(Ordering::SeqCst);
        let read = self.store.begin_read()?;
        let mut report = RebuildReport::default();
        let mut docs = Vec::new();

        for key in read.list_partition_names()? {
            let triples = read.read_partition(&key)?;
            match self.codec.to_document(&triples) {
                Ok(doc) => docs.push((key, doc)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping unreadable partition");
                    report.skipped.push((key.to_string(), e.to_string()));
                }
            }
        }
        drop(read);

        report.loaded = docs.len();
        self.cache.rebuild_all(docs, version)?;
        tracing::info!(
            loaded = report.loaded,
            skipped = report.skipped.len(),
            "cache rebuilt from store"
        );
        Ok(report)
    }

    // =========================================================================
    // PIPELINE
    // =========================================================================

    fn fresh_id(&self) -> Result<String, DirectoryError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = format!("{URN_UUID_PREFIX}{}", Uuid::new_v4());
            if !self.cache.has(&self.key_for(&id))? {
                return Ok(id);
            }
            tracing::warn!(id = %id, "generated id collides, retrying");
        }
        Err(DirectoryError::Internal(format!(
            "no unique id after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    /// Convert, validate, then commit a full replace of the partition.
    fn persist(
        &self,
        key: &EntityKey,
        td: &ThingDescription,
        precondition: Precondition,
        change: Change,
    ) -> Result<Committed, DirectoryError> {
        let triples = self.codec.to_graph(td)?;
        self.validator.validate(&triples)?;
        let body = self.codec.to_linear_form(&triples);
        let statement = match precondition {
            Precondition::Absent => UpdateStatement::insert(key.clone(), body),
            Precondition::Present | Precondition::Any => {
                UpdateStatement::replace(key.clone(), body)
            }
        };
        self.commit(key, &statement, precondition, change)
    }

    /// Run one statement in one write transaction under the engine lock,
    /// then record its event before the lock is released.
    fn commit(
        &self,
        key: &EntityKey,
        statement: &UpdateStatement,
        precondition: Precondition,
        change: Change,
    ) -> Result<Committed, DirectoryError> {
        let _guard = acquire_lock(&self.write_lock, "write engine")?;
        let mut txn = self.store.begin_write()?;

        let existed = match check_precondition(txn.as_ref(), key, &self.prefix, precondition) {
            Ok(existed) => existed,
            Err(e) => {
                abort(txn, key);
                return Err(e);
            }
        };

        if let Err(e) = txn.execute_update(statement) {
            tracing::warn!(key = %key, error = %e, "update failed, aborting");
            abort(txn, key);
            return Err(e);
        }

        txn.commit()?;
        let version = self.commit_version.fetch_add(1, Ordering::SeqCst) + 1;

        let category = change.category(existed);
        let event = self.events.as_ref().and_then(|hub| {
            let id = key.id(&self.prefix).unwrap_or(key.as_str());
            hub.record(category, id)
                .map_err(|e| {
                    tracing::error!(
                        key = %key,
                        category = %category,
                        error = %e,
                        "event not recorded"
                    );
                })
                .ok()
        });

        Ok(Committed {
            version,
            existed,
            event,
        })
    }

    /// Refresh the cache after a commit, then publish its event.
    fn finish(
        &self,
        key: &EntityKey,
        id: &str,
        committed: Committed,
    ) -> Result<Option<Arc<ThingDescription>>, DirectoryError> {
        let refreshed = self.refresh(key, id, committed.version);
        if let (Some(hub), Some(event)) = (&self.events, committed.event) {
            if let Err(e) = hub.release(event) {
                tracing::error!(id = %id, error = %e, "event not published");
            }
        }
        refreshed
    }

    /// Re-read one partition and apply it to the cache.
    fn refresh(
        &self,
        key: &EntityKey,
        id: &str,
        version: u64,
    ) -> Result<Option<Arc<ThingDescription>>, DirectoryError> {
        let load = || -> Result<Option<Arc<ThingDescription>>, DirectoryError> {
            let read = self.store.begin_read()?;
            let triples = read.read_partition(key)?;
            if triples.is_empty() {
                return Ok(None);
            }
            Ok(Some(Arc::new(self.codec.to_document(&triples)?)))
        };

        let doc = load().map_err(|e| {
            tracing::error!(key = %key, version, error = %e, "cache refresh failed after commit");
            DirectoryError::CacheRefresh {
                id: id.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.cache
            .apply_refresh(key.clone(), version, doc.clone())
            .map_err(|e| DirectoryError::CacheRefresh {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(doc)
    }
}

fn declares_id(map: &Map<String, Value>) -> bool {
    [KEY_ID, KEY_AT_ID]
        .iter()
        .any(|field| map.get(*field).is_some_and(|v| !v.is_null()))
}

fn check_precondition(
    txn: &dyn WriteTxn,
    key: &EntityKey,
    prefix: &str,
    precondition: Precondition,
) -> Result<bool, DirectoryError> {
    let empty = txn.read_partition(key)?.is_empty();
    match precondition {
        Precondition::Absent if !empty => Err(DirectoryError::Internal(format!(
            "entity key collision on {key}"
        ))),
        Precondition::Present if empty => Err(DirectoryError::NotFound(
            key.id(prefix).unwrap_or(key.as_str()).to_string(),
        )),
        _ => Ok(!empty),
    }
}

fn abort(txn: Box<dyn WriteTxn + '_>, key: &EntityKey) {
    if let Err(e) = txn.abort() {
        tracing::error!(key = %key, error = %e, "abort failed");
    }
}

// =============================================================================
// TESTS
// =============================================================================
