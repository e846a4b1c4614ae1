//! Leaf streams reading from a document source
//!
//! A collection scan remembers the last record id it returned and resumes
//! after it on every pull, so records inserted or deleted while the scan
//! is suspended may or may not be observed. An id list scan fixes its
//! candidate ids when it is built and skips ids deleted since.

use std::rc::Rc;

use crate::collection::DocumentSource;
use crate::errors::AggResult;
use crate::expr::Metadata;
use crate::index::RecordId;

use super::{ExecContext, Row, RowStream};

pub struct CollectionScan {
    source: Rc<dyn DocumentSource>,
    last: Option<RecordId>,
    done: bool,
}

impl CollectionScan {
    pub fn new(source: Rc<dyn DocumentSource>) -> Self {
        Self {
            source,
            last: None,
            done: false,
        }
    }
}

impl RowStream for CollectionScan {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        match self.source.next_after(self.last) {
            Some((id, doc)) => {
                self.last = Some(id);
                ctx.stats.docs_examined += 1;
                Ok(Some(Row::new(doc)))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

/// Fetches a fixed list of record ids, in list order
pub struct IdListScan {
    source: Rc<dyn DocumentSource>,
    ids: std::vec::IntoIter<(RecordId, Metadata)>,
}

impl IdListScan {
    pub fn new(source: Rc<dyn DocumentSource>, ids: Vec<RecordId>) -> Self {
        let ids = ids.into_iter().map(|id| (id, Metadata::default())).collect();
        Self::with_meta(source, ids)
    }

    /// Ids carrying row metadata such as a text score
    pub fn with_meta(source: Rc<dyn DocumentSource>, ids: Vec<(RecordId, Metadata)>) -> Self {
        Self {
            source,
            ids: ids.into_iter(),
        }
    }
}

impl RowStream for IdListScan {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        for (id, meta) in self.ids.by_ref() {
            if let Some(doc) = self.source.fetch(id) {
                ctx.stats.docs_examined += 1;
                return Ok(Some(Row::with_meta(doc, meta)));
            }
        }
        Ok(None)
    }
}
