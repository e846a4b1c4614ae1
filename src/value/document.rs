//! Ordered documents with unique keys

use super::types::Value;

/// An ordered mapping from field names to values.
///
/// # Invariants
///
/// - Keys are unique; inserting an existing key replaces the value in place
/// - Field order is insertion order
/// - `Value::Missing` is never stored; inserting it removes the key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Build a document from key/value pairs; later duplicates replace
    /// earlier ones
    pub fn from_pairs<K: Into<String>>(pairs: Vec<(K, Value)>) -> Self {
        let mut doc = Document::with_capacity(pairs.len());
        for (k, v) in pairs {
            doc.insert(k, v);
        }
        doc
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Field value, or `Value::Missing` when absent
    pub fn get_or_missing(&self, key: &str) -> Value {
        self.get(key).cloned().unwrap_or(Value::Missing)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    /// Insert or replace a field, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        if value.is_missing() {
            return self.remove(&key);
        }
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((key, value));
                None
            }
        }
    }

    /// Insert a field at the front, replacing any existing value
    pub fn insert_first(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.remove(&key);
        if !value.is_missing() {
            self.fields.insert(0, (key, value));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter().map(|(k, v)| (k, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Value)> {
        self.fields.iter_mut().map(|(k, v)| (&*k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.iter().map(|(k, _)| k)
    }

    /// The single key of a one-field document
    pub fn single_entry(&self) -> Option<(&String, &Value)> {
        if self.fields.len() == 1 {
            self.fields.first().map(|(k, v)| (k, v))
        } else {
            None
        }
    }

    pub(crate) fn approx_size(&self) -> usize {
        self.fields
            .iter()
            .map(|(k, v)| k.len() + v.approx_size())
            .sum()
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, (String, Value)>,
        fn(&'a (String, Value)) -> (&'a String, &'a Value),
    >;

    fn into_iter(self) -> Self::IntoIter {
        let split: fn(&'a (String, Value)) -> (&'a String, &'a Value) = |(k, v)| (k, v);
        self.fields.iter().map(split)
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_preserves_order_and_replaces_in_place() {
        let mut doc = Document::new();
        doc.insert("a", Value::Int32(1));
        doc.insert("b", Value::Int32(2));
        doc.insert("a", Value::Int32(3));

        let keys: Vec<&String> = doc.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(doc.get("a"), Some(&Value::Int32(3)));
    }

    #[test]
    fn test_missing_is_never_stored() {
        let mut doc = Document::new();
        doc.insert("a", Value::Int32(1));
        doc.insert("a", Value::Missing);
        doc.insert("b", Value::Missing);
        assert!(doc.is_empty());
    }

    #[test]
    fn test_insert_first() {
        let mut doc = Document::from_pairs(vec![("x", Value::Int32(1)), ("_id", Value::Int32(9))]);
        doc.insert_first("_id", Value::Int32(7));
        let keys: Vec<&String> = doc.keys().collect();
        assert_eq!(keys, vec!["_id", "x"]);
        assert_eq!(doc.get("_id"), Some(&Value::Int32(7)));
    }

    #[test]
    fn test_get_or_missing() {
        let doc = Document::new();
        assert_eq!(doc.get_or_missing("nope"), Value::Missing);
    }
}
