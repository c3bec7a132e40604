//! Storage backends for the fact log.
//!
//! The store only needs an append-only log with a per-key index, so the
//! backend seam is a small trait. [`MemoryBackend`] is the in-process
//! implementation used by default.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::fact::{AttributeFact, EntityId, Fact};
use crate::rules::AttributeKey;

/// Append-only fact log with lookups by attribute key and entity id.
///
/// Implementations must be safe to share between threads. Appends for one
/// entity id are serialized by the caller; appends for different ids may
/// race.
pub trait FactBackend: Send + Sync {
    fn append(&self, fact: Fact);

    /// Most recently appended fact for `key` and `entity_id`.
    fn latest_attribute(&self, key: &AttributeKey, entity_id: &EntityId) -> Option<AttributeFact>;

    /// Every fact for `key` and `entity_id`, oldest first.
    fn attribute_history(&self, key: &AttributeKey, entity_id: &EntityId) -> Vec<AttributeFact>;

    /// Snapshot of the whole log in insertion order.
    fn facts(&self) -> Vec<Fact>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct MemoryLog {
    log: Vec<Fact>,
    /// (key, entity id) -> positions in `log`, ascending
    attribute_index: HashMap<(AttributeKey, EntityId), Vec<usize>>,
}

/// In-memory fact log behind an `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RwLock<MemoryLog>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    // Facts are only ever pushed, so a writer that panicked mid-append cannot
    // leave a half-written entry behind. Keep serving after poisoning.
    fn read(&self) -> RwLockReadGuard<'_, MemoryLog> {
        self.inner.read().unwrap_or_else(|poisoned| {
            tracing::warn!("fact log lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryLog> {
        self.inner.write().unwrap_or_else(|poisoned| {
            tracing::warn!("fact log lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}

impl FactBackend for MemoryBackend {
    fn append(&self, fact: Fact) {
        let mut inner = self.write();
        let position = inner.log.len();
        if let Fact::Attribute(attr) = &fact {
            let key = (
                AttributeKey::new(attr.entity_type(), attr.attribute()),
                attr.entity_id().clone(),
            );
            inner.attribute_index.entry(key).or_default().push(position);
        }
        inner.log.push(fact);
    }

    fn latest_attribute(&self, key: &AttributeKey, entity_id: &EntityId) -> Option<AttributeFact> {
        let inner = self.read();
        let positions = inner.attribute_index.get(&(key.clone(), entity_id.clone()))?;
        let last = *positions.last()?;
        inner.log.get(last).and_then(Fact::as_attribute).cloned()
    }

    fn attribute_history(&self, key: &AttributeKey, entity_id: &EntityId) -> Vec<AttributeFact> {
        let inner = self.read();
        inner
            .attribute_index
            .get(&(key.clone(), entity_id.clone()))
            .map(|positions| {
                positions
                    .iter()
                    .filter_map(|&i| inner.log.get(i).and_then(Fact::as_attribute).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn facts(&self) -> Vec<Fact> {
        self.read().log.clone()
    }

    fn len(&self) -> usize {
        self.read().log.len()
    }
}
