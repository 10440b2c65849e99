use serde::{Deserialize, Serialize};

use crate::models::{DocumentRef, Position};

/// How many integers each occurrence contributes to the position runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionLayout {
    /// Occurrence counts only
    #[default]
    None,
    /// (element, word)
    ElementWord,
    /// (element, word, character offset)
    ElementWordOffset,
}

impl PositionLayout {
    pub fn ints(&self) -> usize {
        match self {
            PositionLayout::None => 0,
            PositionLayout::ElementWord => 2,
            PositionLayout::ElementWordOffset => 3,
        }
    }

    pub fn is_positional(&self) -> bool {
        !matches!(self, PositionLayout::None)
    }
}

/// One document's entry in a posting list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub document_id: u64,
    pub store_id: u32,
    pub occurrences: u32,
    pub positions: Vec<Position>,
}

impl Posting {
    pub fn new(document_id: u64, store_id: u32, occurrences: u32) -> Self {
        Self {
            document_id,
            store_id,
            occurrences,
            positions: Vec::new(),
        }
    }

    pub fn with_positions(document_id: u64, store_id: u32, positions: Vec<Position>) -> Self {
        Self {
            document_id,
            store_id,
            occurrences: positions.len() as u32,
            positions,
        }
    }

    pub fn key(&self) -> (u64, u32) {
        (self.document_id, self.store_id)
    }

    pub fn document(&self) -> DocumentRef {
        DocumentRef::new(self.document_id, self.store_id)
    }
}

/// Header counts of a stored posting list
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSummary {
    pub term_id: u32,
    pub doc_freq: u32,
    pub occ_freq: u32,
}

/// Every posting of one term, ordered by `(document_id, store_id)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingList {
    pub term_id: u32,
    pub doc_freq: u32,
    pub occ_freq: u32,
    pub postings: Vec<Posting>,
}

impl PostingList {
    pub fn summary(&self) -> TermSummary {
        TermSummary {
            term_id: self.term_id,
            doc_freq: self.doc_freq,
            occ_freq: self.occ_freq,
        }
    }
}

/// Merge semantics for [`crate::codec::TermCodec::merge`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOp {
    /// Substitute postings with matching (document, store) pairs, append the rest
    Replace,
    /// Union by (document, store), summing occurrences of shared pairs
    Add,
    /// Remove postings with matching (document, store) pairs
    Delete,
}
