//! Text index
//!
//! Postings map each stemmed, lowercased term to the records containing it
//! along with the record's weighted term score:
//!
//! score(term, record) = Σ over fields of weight × (1 + ln(term frequency))
//!
//! A search matches records containing any positive term, all phrases and
//! none of the negated terms. A record's text score is the sum of the
//! scores of the distinct query terms it contains.

use std::collections::{BTreeMap, BTreeSet};

use crate::query::text::tokenize;
use crate::query::{ParsedSearch, TextLanguage, TextQuery};
use crate::value::path::collect;
use crate::value::{Document, FieldPath, Value};

use super::spec::IndexSpec;
use super::tree::RecordId;

/// A matching record with its relevance score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextHit {
    pub id: RecordId,
    pub score: f64,
}

#[derive(Debug, Default)]
struct IndexedText {
    terms: Vec<String>,
    raw: Vec<String>,
}

/// Inverted index over the string fields of a collection
#[derive(Debug)]
pub struct TextIndex {
    fields: Vec<(FieldPath, f64)>,
    language: TextLanguage,
    postings: BTreeMap<String, BTreeMap<RecordId, f64>>,
    records: BTreeMap<RecordId, IndexedText>,
}

fn strings_at(doc: &Document, path: &FieldPath) -> Vec<String> {
    let mut out = Vec::new();
    for leaf in collect(doc, path) {
        match leaf {
            Value::String(s) => out.push(s.clone()),
            Value::Array(items) => out.extend(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string),
            ),
            _ => {}
        }
    }
    out
}

impl TextIndex {
    pub fn new(spec: &IndexSpec) -> Self {
        Self {
            fields: spec
                .weights
                .iter()
                .map(|(path, weight)| (path.clone(), *weight as f64))
                .collect(),
            language: spec.default_language,
            postings: BTreeMap::new(),
            records: BTreeMap::new(),
        }
    }

    pub fn language(&self) -> TextLanguage {
        self.language
    }

    /// Index the string fields of a record
    pub fn insert(&mut self, id: RecordId, doc: &Document) {
        let mut scores: BTreeMap<String, f64> = BTreeMap::new();
        let mut raw = Vec::new();
        for (path, weight) in &self.fields {
            let mut frequencies: BTreeMap<String, usize> = BTreeMap::new();
            for text in strings_at(doc, path) {
                for term in tokenize(&text, self.language, false) {
                    *frequencies.entry(term).or_default() += 1;
                }
                raw.push(text);
            }
            for (term, tf) in frequencies {
                *scores.entry(term).or_default() += weight * (1.0 + (tf as f64).ln());
            }
        }
        if scores.is_empty() && raw.is_empty() {
            return;
        }
        let mut terms = Vec::with_capacity(scores.len());
        for (term, score) in scores {
            self.postings.entry(term.clone()).or_default().insert(id, score);
            terms.push(term);
        }
        self.records.insert(id, IndexedText { terms, raw });
    }

    pub fn remove(&mut self, id: RecordId) {
        if let Some(entry) = self.records.remove(&id) {
            for term in entry.terms {
                if let Some(ids) = self.postings.get_mut(&term) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.postings.remove(&term);
                    }
                }
            }
        }
    }

    fn parse(&self, query: &TextQuery) -> ParsedSearch {
        let language = query.language.unwrap_or(self.language);
        ParsedSearch::parse(&query.search, language, query.case_sensitive)
    }

    /// Number of postings a search would examine
    pub fn estimate(&self, query: &TextQuery) -> usize {
        let parsed = self.parse(query);
        parsed
            .terms
            .iter()
            .map(|t| t.to_lowercase())
            .collect::<BTreeSet<_>>()
            .iter()
            .filter_map(|t| self.postings.get(t))
            .map(BTreeMap::len)
            .sum()
    }

    fn contains_phrase(&self, id: RecordId, phrase: &str, case_sensitive: bool) -> bool {
        let Some(entry) = self.records.get(&id) else {
            return false;
        };
        if case_sensitive {
            entry.raw.iter().any(|text| text.contains(phrase))
        } else {
            let phrase = phrase.to_lowercase();
            entry
                .raw
                .iter()
                .any(|text| text.to_lowercase().contains(&phrase))
        }
    }

    fn case_sensitive_terms(&self, id: RecordId, language: TextLanguage) -> BTreeSet<String> {
        self.records
            .get(&id)
            .map(|entry| {
                entry
                    .raw
                    .iter()
                    .flat_map(|text| tokenize(text, language, true))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Matching records ordered by record id
    pub fn search(&self, query: &TextQuery) -> Vec<TextHit> {
        let parsed = self.parse(query);
        let language = query.language.unwrap_or(self.language);

        // term as searched, term as indexed
        let terms: Vec<(String, String)> = parsed
            .terms
            .iter()
            .map(|t| (t.clone(), t.to_lowercase()))
            .collect();

        let mut scores: BTreeMap<RecordId, f64> = BTreeMap::new();
        let mut counted: BTreeSet<(RecordId, String)> = BTreeSet::new();
        for (_, indexed) in &terms {
            if let Some(ids) = self.postings.get(indexed) {
                for (id, score) in ids {
                    if counted.insert((*id, indexed.clone())) {
                        *scores.entry(*id).or_default() += score;
                    }
                }
            }
        }

        let negated: BTreeSet<RecordId> = parsed
            .negated
            .iter()
            .filter_map(|t| self.postings.get(&t.to_lowercase()))
            .flat_map(|ids| ids.keys().copied())
            .collect();

        let mut hits = Vec::new();
        for (id, mut score) in scores {
            if negated.contains(&id) {
                continue;
            }
            if !parsed
                .phrases
                .iter()
                .all(|p| self.contains_phrase(id, p, query.case_sensitive))
            {
                continue;
            }
            if query.case_sensitive {
                let present = self.case_sensitive_terms(id, language);
                let matched: BTreeSet<&String> = terms
                    .iter()
                    .filter(|(exact, _)| present.contains(exact))
                    .map(|(_, indexed)| indexed)
                    .collect();
                if matched.is_empty() {
                    continue;
                }
                score = matched
                    .iter()
                    .filter_map(|t| self.postings.get(*t).and_then(|ids| ids.get(&id)))
                    .sum();
            }
            hits.push(TextHit { id, score });
        }
        hits
    }

    /// Number of indexed records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::spec::IndexOptions;
    use crate::value::document_from_json;
    use serde_json::json;

    fn doc(j: serde_json::Value) -> Document {
        document_from_json(&j).unwrap()
    }

    fn query(search: &str) -> TextQuery {
        TextQuery {
            search: search.to_string(),
            language: None,
            case_sensitive: false,
        }
    }

    fn products() -> TextIndex {
        let spec = IndexSpec::build(
            &doc(json!({"title": "text", "description": "text"})),
            &IndexOptions::default().weights(doc(json!({"title": 10}))),
            TextLanguage::English,
        )
        .unwrap();
        let mut index = TextIndex::new(&spec);
        index.insert(1, &doc(json!({"title": "A book", "description": "This is an awesome book"})));
        index.insert(2, &doc(json!({"title": "Red T-Shirt", "description": "This T-Shirt is red and it's pretty awesome"})));
        index.insert(3, &doc(json!({"title": "Awesome books", "description": "red book collection"})));
        index
    }

    #[test]
    fn test_any_term_matches() {
        let index = products();
        let ids: Vec<_> = index.search(&query("awesome")).iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_weights_raise_score() {
        let index = products();
        let hits = index.search(&query("awesome"));
        let score = |id| hits.iter().find(|h| h.id == id).map(|h| h.score).unwrap();
        assert!(score(3) > score(1));
    }

    #[test]
    fn test_negation_excludes() {
        let index = products();
        let ids: Vec<_> = index.search(&query("awesome -shirt")).iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_phrase_must_appear() {
        let index = products();
        let ids: Vec<_> = index.search(&query("\"red book\"")).iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn test_case_sensitive() {
        let index = products();
        let mut q = query("Red");
        q.case_sensitive = true;
        let ids: Vec<_> = index.search(&q).iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_remove_drops_postings() {
        let mut index = products();
        index.remove(2);
        assert!(index.search(&query("shirt")).is_empty());
        assert_eq!(index.len(), 2);
    }
}
