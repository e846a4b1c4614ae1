//! Document source and sink boundaries
//!
//! A source hands documents to the engine in record id order; a sink
//! receives pipeline output.

use crate::errors::AggResult;
use crate::index::RecordId;
use crate::value::Document;

/// Read access to a document store
///
/// Scans are resumable: `next_after` returns the first record with an id
/// greater than `after`, so records inserted or deleted between calls may
/// or may not be observed. No snapshot is taken.
pub trait DocumentSource {
    /// First record with an id strictly greater than `after`
    fn next_after(&self, after: Option<RecordId>) -> Option<(RecordId, Document)>;

    /// The record stored under `id`, if it still exists
    fn fetch(&self, id: RecordId) -> Option<Document>;

    /// Number of stored records
    fn record_count(&self) -> usize;
}

/// Receiver of pipeline output
pub trait DocumentSink {
    fn write(&mut self, doc: Document) -> AggResult<()>;
}

impl DocumentSource for Vec<Document> {
    fn next_after(&self, after: Option<RecordId>) -> Option<(RecordId, Document)> {
        let start = after.map_or(0, |id| id as usize + 1);
        self.get(start).map(|doc| (start as RecordId, doc.clone()))
    }

    fn fetch(&self, id: RecordId) -> Option<Document> {
        self.get(id as usize).cloned()
    }

    fn record_count(&self) -> usize {
        self.len()
    }
}

impl DocumentSink for Vec<Document> {
    fn write(&mut self, doc: Document) -> AggResult<()> {
        self.push(doc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_vec_source_resumes_after_id() {
        let docs: Vec<Document> = (0..3)
            .map(|i| Document::from_pairs(vec![("n", Value::Int32(i))]))
            .collect();
        let (first, _) = docs.next_after(None).unwrap();
        assert_eq!(first, 0);
        let (second, doc) = docs.next_after(Some(first)).unwrap();
        assert_eq!(second, 1);
        assert_eq!(doc.get("n"), Some(&Value::Int32(1)));
        assert!(docs.next_after(Some(2)).is_none());
    }

    #[test]
    fn test_vec_sink_collects() {
        let mut sink: Vec<Document> = Vec::new();
        sink.write(Document::new()).unwrap();
        assert_eq!(sink.len(), 1);
    }
}
