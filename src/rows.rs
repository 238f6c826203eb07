//! Ordered row list backing one topic's table view.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::models::{Entity, DEFAULT_KEY_FIELD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowChange {
    Inserted,
    Replaced,
    Ignored,
}

#[derive(Clone)]
pub struct RowCollection {
    rows: Arc<RwLock<Vec<Entity>>>,
    key_field: Arc<str>,
}

impl Default for RowCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl RowCollection {
    pub fn new() -> Self {
        Self::with_key_field(DEFAULT_KEY_FIELD)
    }

    pub fn with_key_field(key_field: &str) -> Self {
        Self {
            rows: Arc::new(RwLock::new(Vec::new())),
            key_field: Arc::from(key_field),
        }
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// Insert at head if the key is unseen, otherwise replace the row in place.
    pub fn upsert(&self, row: Entity) -> RowChange {
        let Some(key) = row.key_of(&self.key_field) else {
            return RowChange::Ignored;
        };
        let mut rows = self.rows.write();
        match rows
            .iter()
            .position(|r| r.key_of(&self.key_field).as_deref() == Some(key.as_str()))
        {
            Some(idx) => {
                rows[idx] = row;
                RowChange::Replaced
            }
            None => {
                rows.insert(0, row);
                RowChange::Inserted
            }
        }
    }

    /// Shallow-merge `patch` into an existing row. Unknown keys are ignored.
    pub fn patch(&self, patch: Entity) -> bool {
        let Some(key) = patch.key_of(&self.key_field) else {
            return false;
        };
        let mut rows = self.rows.write();
        match rows
            .iter_mut()
            .find(|r| r.key_of(&self.key_field).as_deref() == Some(key.as_str()))
        {
            Some(row) => {
                row.merge(patch);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|r| r.key_of(&self.key_field).as_deref() != Some(key));
        rows.len() != before
    }

    /// Full-list refresh; the authoritative state after any reconnect gap.
    pub fn replace_all(&self, rows: Vec<Entity>) {
        *self.rows.write() = rows;
    }

    pub fn get(&self, key: &str) -> Option<Entity> {
        self.rows
            .read()
            .iter()
            .find(|r| r.key_of(&self.key_field).as_deref() == Some(key))
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<Entity> {
        self.rows.read().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.rows
            .read()
            .iter()
            .filter_map(|r| r.key_of(&self.key_field))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, name: &str) -> Entity {
        Entity::new().with("id", id).with("name", name)
    }

    #[test]
    fn test_upsert_inserts_at_head_and_replaces_in_place() {
        let rows = RowCollection::new();
        assert_eq!(rows.upsert(row("a", "A")), RowChange::Inserted);
        assert_eq!(rows.upsert(row("b", "B")), RowChange::Inserted);
        assert_eq!(rows.keys(), vec!["b", "a"]);

        assert_eq!(rows.upsert(Entity::new().with("id", "a")), RowChange::Replaced);
        assert_eq!(rows.keys(), vec!["b", "a"]);
        // Replacement is wholesale
        assert!(rows.get("a").unwrap().get("name").is_none());
    }

    #[test]
    fn test_patch_merges_existing_only() {
        let rows = RowCollection::new();
        rows.upsert(row("a", "A"));
        assert!(rows.patch(Entity::new().with("id", "a").with("balance", 0)));
        assert!(!rows.patch(Entity::new().with("id", "zzz").with("balance", 0)));
        let a = rows.get("a").unwrap();
        assert_eq!(a.get_str("name"), Some("A"));
        assert_eq!(a.get_f64("balance"), Some(0.0));
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_remove_and_replace_all() {
        let rows = RowCollection::new();
        rows.upsert(row("a", "A"));
        rows.upsert(row("b", "B"));
        assert!(rows.remove("a"));
        assert!(!rows.remove("a"));
        assert_eq!(rows.keys(), vec!["b"]);

        rows.replace_all(vec![row("x", "X"), row("y", "Y")]);
        assert_eq!(rows.keys(), vec!["x", "y"]);
    }

    #[test]
    fn test_keyless_rows_ignored() {
        let rows = RowCollection::new();
        assert_eq!(rows.upsert(Entity::new().with("name", "?")), RowChange::Ignored);
        assert!(rows.is_empty());
    }
}
