//! # Thing Cache
//!
//! Read mirror of the graph store: entity key to canonical document.
//!
//! Documents are immutable `Arc`s swapped in whole, so readers never see a
//! half-written entry. Every slot remembers the commit version of the
//! refresh that produced it (deletions included), and a refresh carrying an
//! older version than the slot is dropped.
//!
//! A deletion leaves a tombstone slot behind so a late refresh cannot bring
//! the document back. Tombstones are only reclaimed by [`ThingCache::rebuild_all`],
//! so between rebuilds the map grows by one slot per distinct deleted key.

use crate::document::ThingDescription;
use crate::types::{read_lock, write_lock};
use crate::{DirectoryError, EntityKey};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
struct Slot {
    version: u64,
    doc: Option<Arc<ThingDescription>>,
}

/// Concurrent map from entity key to document.
#[derive(Debug, Default)]
pub struct ThingCache {
    slots: RwLock<BTreeMap<EntityKey, Slot>>,
}

impl ThingCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &EntityKey) -> Result<Option<Arc<ThingDescription>>, DirectoryError> {
        let slots = read_lock(&self.slots, "thing cache")?;
        Ok(slots.get(key).and_then(|slot| slot.doc.clone()))
    }

    pub fn has(&self, key: &EntityKey) -> Result<bool, DirectoryError> {
        let slots = read_lock(&self.slots, "thing cache")?;
        Ok(slots.get(key).is_some_and(|slot| slot.doc.is_some()))
    }

    /// Every document, ordered by entity key.
    pub fn all(&self) -> Result<Vec<Arc<ThingDescription>>, DirectoryError> {
        let slots = read_lock(&self.slots, "thing cache")?;
        Ok(slots.values().filter_map(|slot| slot.doc.clone()).collect())
    }

    pub fn len(&self) -> Result<usize, DirectoryError> {
        let slots = read_lock(&self.slots, "thing cache")?;
        Ok(slots.values().filter(|slot| slot.doc.is_some()).count())
    }

    pub fn is_empty(&self) -> Result<bool, DirectoryError> {
        Ok(self.len()? == 0)
    }

    /// Slots held only to fence off late refreshes of deleted keys.
    pub fn tombstones(&self) -> Result<usize, DirectoryError> {
        let slots = read_lock(&self.slots, "thing cache")?;
        Ok(slots.values().filter(|slot| slot.doc.is_none()).count())
    }

    /// Unversioned insert. Keeps the slot's version.
    pub fn put(&self, key: EntityKey, doc: Arc<ThingDescription>) -> Result<(), DirectoryError> {
        let mut slots = write_lock(&self.slots, "thing cache")?;
        let slot = slots.entry(key).or_insert(Slot {
            version: 0,
            doc: None,
        });
        slot.doc = Some(doc);
        Ok(())
    }

    /// Unversioned removal. Keeps the slot's version as a tombstone.
    pub fn remove(&self, key: &EntityKey) -> Result<(), DirectoryError> {
        let mut slots = write_lock(&self.slots, "thing cache")?;
        if let Some(slot) = slots.get_mut(key) {
            slot.doc = None;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<(), DirectoryError> {
        write_lock(&self.slots, "thing cache")?.clear();
        Ok(())
    }

    /// Apply the result of a post-commit refresh.
    ///
    /// `doc = None` means the partition was empty. Returns `false` when a
    /// newer refresh already landed for this key.
    pub fn apply_refresh(
        &self,
        key: EntityKey,
        version: u64,
        doc: Option<Arc<ThingDescription>>,
    ) -> Result<bool, DirectoryError> {
        let mut slots = write_lock(&self.slots, "thing cache")?;
        match slots.get_mut(&key) {
            Some(slot) if slot.version > version => {
                tracing::debug!(
                    key = %key,
                    version,
                    held = slot.version,
                    "stale cache refresh dropped"
                );
                Ok(false)
            }
            Some(slot) => {
                slot.version = version;
                slot.doc = doc;
                Ok(true)
            }
            None => {
                slots.insert(key, Slot { version, doc });
                Ok(true)
            }
        }
    }

    /// Replace the whole map with `docs`, all tagged `version`.
    ///
    /// The new map is built before the lock is taken. Slots that already
    /// carry a newer version than `version` survive the swap; older
    /// tombstones are dropped.
    pub fn rebuild_all(
        &self,
        docs: impl IntoIterator<Item = (EntityKey, ThingDescription)>,
        version: u64,
    ) -> Result<(), DirectoryError> {
        let mut fresh: BTreeMap<EntityKey, Slot> = docs
            .into_iter()
            .map(|(key, doc)| {
                (
                    key,
                    Slot {
                        version,
                        doc: Some(Arc::new(doc)),
                    },
                )
            })
            .collect();

        let mut slots = write_lock(&self.slots, "thing cache")?;
        for (key, slot) in slots.iter() {
            if slot.version > version {
                fresh.insert(key.clone(), slot.clone());
            }
        }
        *slots = fresh;
        Ok(())
    }
}
