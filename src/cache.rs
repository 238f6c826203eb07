//! Session-wide entity cache.
//!
//! Populated by lookup results, point lookups, push events and settlement
//! bookkeeping. Upsert and delete are the only mutations; both are keyed and
//! commutative, so writers never need to coordinate beyond the map lock.
//! Nothing is evicted by age.

use parking_lot::RwLock;
use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use crate::models::{Entity, DEFAULT_KEY_FIELD};

#[derive(Clone)]
pub struct EntityCache {
    entries: Arc<RwLock<HashMap<String, Entity>>>,
    key_field: Arc<str>,
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityCache {
    pub fn new() -> Self {
        Self::with_key_field(DEFAULT_KEY_FIELD)
    }

    pub fn with_key_field(key_field: &str) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::with_capacity(256))),
            key_field: Arc::from(key_field),
        }
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// Merge `entity` into the entry for its key. Returns false (and does
    /// nothing) when the entity carries no key.
    pub fn upsert(&self, entity: Entity) -> bool {
        let Some(key) = entity.key_of(&self.key_field) else {
            return false;
        };
        match self.entries.write().entry(key) {
            Entry::Occupied(mut existing) => existing.get_mut().merge(entity),
            Entry::Vacant(slot) => {
                slot.insert(entity);
            }
        }
        true
    }

    pub fn upsert_all(&self, entities: impl IntoIterator<Item = Entity>) -> usize {
        entities.into_iter().map(|e| self.upsert(e)).filter(|stored| *stored).count()
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<Entity> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_merges_fields() {
        let cache = EntityCache::new();
        assert!(cache.upsert(Entity::new().with("id", "emp-1").with("name", "Budi")));
        assert!(cache.upsert(Entity::new().with("id", "emp-1").with("department", "Gudang")));

        let e = cache.get("emp-1").unwrap();
        assert_eq!(e.get_str("name"), Some("Budi"));
        assert_eq!(e.get_str("department"), Some("Gudang"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_upsert_without_key_is_noop() {
        let cache = EntityCache::new();
        assert!(!cache.upsert(Entity::new().with("name", "nobody")));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_then_get_is_absent() {
        let cache = EntityCache::new();
        cache.upsert(
            Entity::from_value(json!({"id": "kb-7", "balance": 10, "status": "disbursed"})).unwrap(),
        );
        assert!(cache.delete("kb-7"));
        assert!(cache.get("kb-7").is_none());
        assert!(!cache.delete("kb-7"));

        // Re-upsert after delete starts from scratch
        cache.upsert(Entity::new().with("id", "kb-7").with("name", "x"));
        let e = cache.get("kb-7").unwrap();
        assert!(e.get("balance").is_none());
    }

    #[test]
    fn test_custom_key_field() {
        let cache = EntityCache::with_key_field("uuid");
        assert!(cache.upsert(Entity::new().with("uuid", "u-1")));
        assert!(!cache.upsert(Entity::new().with("id", "i-1")));
        assert!(cache.contains("u-1"));
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = EntityCache::new();
        let other = cache.clone();
        other.upsert(Entity::new().with("id", "a"));
        assert!(cache.contains("a"));
    }
}
