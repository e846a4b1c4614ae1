//! BTreeMap-based index structure
//!
//! Indexes use BTreeMap<IndexKey, Vec<RecordId>> for deterministic ordering.
//! Record ids under one key are always sorted ascending.

use std::collections::BTreeMap;
use std::ops::Bound;

use super::key::IndexKey;

/// Record identifier assigned by the collection, ascending in insertion order
pub type RecordId = u64;

/// A regular (single-field or compound) index
#[derive(Debug, Default)]
pub struct IndexTree {
    /// Maps keys to sorted lists of record ids
    tree: BTreeMap<IndexKey, Vec<RecordId>>,
    /// Total number of (key, id) entries
    entries: usize,
}

fn bound_key(bound: &Bound<IndexKey>) -> Option<&IndexKey> {
    match bound {
        Bound::Included(k) | Bound::Excluded(k) => Some(k),
        Bound::Unbounded => None,
    }
}

impl IndexTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an id for a key, keeping ids sorted
    pub fn insert(&mut self, key: IndexKey, id: RecordId) {
        let ids = self.tree.entry(key).or_default();
        if let Err(pos) = ids.binary_search(&id) {
            ids.insert(pos, id);
            self.entries += 1;
        }
    }

    /// Remove an id for a key; drops the key when no ids remain
    pub fn remove(&mut self, key: &IndexKey, id: RecordId) {
        if let Some(ids) = self.tree.get_mut(key) {
            if let Ok(pos) = ids.binary_search(&id) {
                ids.remove(pos);
                self.entries -= 1;
            }
            if ids.is_empty() {
                self.tree.remove(key);
            }
        }
    }

    /// Ids stored under exactly `key`, ascending
    pub fn lookup_eq(&self, key: &IndexKey) -> &[RecordId] {
        self.tree.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    // BTreeMap::range panics on inverted or empty-excluded ranges
    fn is_empty_range(lower: &Bound<IndexKey>, upper: &Bound<IndexKey>) -> bool {
        match (bound_key(lower), bound_key(upper)) {
            (Some(lo), Some(hi)) => {
                lo > hi
                    || (lo == hi
                        && (matches!(lower, Bound::Excluded(_))
                            || matches!(upper, Bound::Excluded(_))))
            }
            _ => false,
        }
    }

    fn entries_in(
        &self,
        lower: Bound<IndexKey>,
        upper: Bound<IndexKey>,
    ) -> impl Iterator<Item = (&IndexKey, &Vec<RecordId>)> {
        let empty = Self::is_empty_range(&lower, &upper);
        let range = if empty {
            None
        } else {
            Some(self.tree.range((lower, upper)))
        };
        range.into_iter().flatten()
    }

    /// Distinct ids with a key inside the range, sorted ascending
    pub fn range(&self, lower: Bound<IndexKey>, upper: Bound<IndexKey>) -> Vec<RecordId> {
        let mut result: Vec<RecordId> = self
            .entries_in(lower, upper)
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        result.sort_unstable();
        result.dedup();
        result
    }

    /// Number of index entries inside the range
    pub fn count_range(&self, lower: Bound<IndexKey>, upper: Bound<IndexKey>) -> usize {
        self.entries_in(lower, upper).map(|(_, ids)| ids.len()).sum()
    }

    /// Ids in key order; ids sharing a key stay ascending in both directions
    pub fn ordered_ids(&self, reverse: bool) -> Vec<RecordId> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(self.entries);
        let mut push = |ids: &Vec<RecordId>| {
            for id in ids {
                if seen.insert(*id) {
                    out.push(*id);
                }
            }
        };
        if reverse {
            self.tree.values().rev().for_each(&mut push);
        } else {
            self.tree.values().for_each(&mut push);
        }
        out
    }

    /// Iterate keys with their ids in key order
    pub fn iter(&self) -> impl Iterator<Item = (&IndexKey, &Vec<RecordId>)> {
        self.tree.iter()
    }

    pub fn clear(&mut self) {
        self.tree.clear();
        self.entries = 0;
    }

    /// Number of distinct keys
    pub fn key_count(&self) -> usize {
        self.tree.len()
    }

    /// Total number of (key, id) entries
    pub fn entry_count(&self) -> usize {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn key(v: i32) -> IndexKey {
        IndexKey::single(Value::Int32(v))
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut tree = IndexTree::new();
        tree.insert(IndexKey::single(Value::from("alice")), 100);
        tree.insert(IndexKey::single(Value::from("alice")), 200);
        tree.insert(IndexKey::single(Value::from("bob")), 300);

        assert_eq!(tree.lookup_eq(&IndexKey::single(Value::from("alice"))), &[100, 200]);
        assert_eq!(tree.lookup_eq(&IndexKey::single(Value::from("bob"))), &[300]);
        assert_eq!(tree.entry_count(), 3);
    }

    #[test]
    fn test_ids_sorted() {
        let mut tree = IndexTree::new();
        tree.insert(key(42), 300);
        tree.insert(key(42), 100);
        tree.insert(key(42), 200);
        assert_eq!(tree.lookup_eq(&key(42)), &[100, 200, 300]);
    }

    #[test]
    fn test_remove() {
        let mut tree = IndexTree::new();
        tree.insert(key(1), 100);
        tree.insert(key(1), 200);

        tree.remove(&key(1), 100);
        assert_eq!(tree.lookup_eq(&key(1)), &[200]);

        tree.remove(&key(1), 200);
        assert_eq!(tree.key_count(), 0);
        assert_eq!(tree.entry_count(), 0);
    }

    #[test]
    fn test_range() {
        let mut tree = IndexTree::new();
        for i in 1..=5 {
            tree.insert(key(i), (i * 100) as u64);
        }
        let ids = tree.range(Bound::Included(key(2)), Bound::Excluded(key(5)));
        assert_eq!(ids, vec![200, 300, 400]);
        assert_eq!(tree.count_range(Bound::Excluded(key(2)), Bound::Unbounded), 3);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let mut tree = IndexTree::new();
        tree.insert(key(1), 1);
        assert!(tree.range(Bound::Included(key(5)), Bound::Included(key(2))).is_empty());
        assert!(tree.range(Bound::Excluded(key(1)), Bound::Excluded(key(1))).is_empty());
        assert_eq!(tree.range(Bound::Included(key(1)), Bound::Included(key(1))), vec![1]);
    }

    #[test]
    fn test_ordered_ids_reverse_keeps_ids_ascending() {
        let mut tree = IndexTree::new();
        tree.insert(key(1), 5);
        tree.insert(key(2), 3);
        tree.insert(key(2), 4);
        assert_eq!(tree.ordered_ids(false), vec![5, 3, 4]);
        assert_eq!(tree.ordered_ids(true), vec![3, 4, 5]);
    }
}
