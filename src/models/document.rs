use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Document identifier as assigned by its record store
pub type DocumentId = u64;

/// One document within one record store.
///
/// Ordering is `(document_id, store_id)`, which is the ordering key shared by
/// postings and result-set items.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub document_id: DocumentId,
    pub store_id: u32,
}

impl DocumentRef {
    pub fn new(document_id: DocumentId, store_id: u32) -> Self {
        Self {
            document_id,
            store_id,
        }
    }

    /// Fixed-width key used by the per-document side stores.
    pub fn store_key(&self) -> String {
        format!("{:010}|{:015}", self.store_id, self.document_id)
    }
}

/// Location of one occurrence of a term inside a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Structural element (paragraph, field, ...) the word belongs to
    pub element: u32,
    /// Word offset within the element
    pub word: u32,
    /// Character offset, present only for `ElementWordOffset` indexes
    #[serde(default)]
    pub offset: Option<u32>,
}

impl Position {
    pub fn new(element: u32, word: u32) -> Self {
        Self {
            element,
            word,
            offset: None,
        }
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Occurrences of one term in one document, as supplied by extraction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermOccurrences {
    pub occurrences: u32,
    #[serde(default)]
    pub positions: Vec<Position>,
}

impl TermOccurrences {
    pub fn count(occurrences: u32) -> Self {
        Self {
            occurrences,
            positions: Vec::new(),
        }
    }

    pub fn at(positions: Vec<Position>) -> Self {
        Self {
            occurrences: positions.len() as u32,
            positions,
        }
    }
}

/// Term text to occurrences for one document
pub type TermMap = BTreeMap<String, TermOccurrences>;
