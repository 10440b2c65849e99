//! Binary posting-list codec.
//!
//! Layout (all little-endian):
//!
//! ```text
//! header:  term_id u32 | doc_freq u32 | occ_freq u32
//! posting: document_id u64 | store_id u32 | occurrences u32 | positions...
//! ```
//!
//! Each occurrence contributes `layout.ints()` u32 values to the position run.
//! The header is independently addressable, so summaries and prefix decodes
//! never touch the whole value.

use std::collections::{BTreeMap, HashSet};

use crate::codec::{MergeOp, Posting, PositionLayout, PostingList, TermSummary};
use crate::error::TermdexError;
use crate::models::Position;
use crate::Result;

pub const HEADER_LEN: usize = 12;
const POSTING_FIXED_LEN: usize = 16;

/// Encodes, decodes and merges posting lists for one index.
#[derive(Clone, Copy, Debug)]
pub struct TermCodec {
    layout: PositionLayout,
}

impl TermCodec {
    pub fn new(layout: PositionLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> PositionLayout {
        self.layout
    }

    pub fn serialize(
        &self,
        term_id: u32,
        postings: &[Posting],
        doc_freq: u32,
        occ_freq: u32,
    ) -> Result<Vec<u8>> {
        if postings.is_empty() {
            return Err(TermdexError::Integrity(format!(
                "refusing to encode empty posting list for term id {term_id}"
            )));
        }
        let ints = self.layout.ints();
        let body: usize = postings
            .iter()
            .map(|p| POSTING_FIXED_LEN + 4 * ints * p.occurrences as usize)
            .sum();
        let mut buf = Vec::with_capacity(HEADER_LEN + body);
        buf.extend_from_slice(&term_id.to_le_bytes());
        buf.extend_from_slice(&doc_freq.to_le_bytes());
        buf.extend_from_slice(&occ_freq.to_le_bytes());

        for posting in postings {
            buf.extend_from_slice(&posting.document_id.to_le_bytes());
            buf.extend_from_slice(&posting.store_id.to_le_bytes());
            buf.extend_from_slice(&posting.occurrences.to_le_bytes());
            if ints == 0 {
                continue;
            }
            if posting.positions.len() != posting.occurrences as usize {
                return Err(TermdexError::Integrity(format!(
                    "document {} has {} occurrences but {} positions",
                    posting.document_id,
                    posting.occurrences,
                    posting.positions.len()
                )));
            }
            for position in &posting.positions {
                buf.extend_from_slice(&position.element.to_le_bytes());
                buf.extend_from_slice(&position.word.to_le_bytes());
                if ints == 3 {
                    let offset = position.offset.ok_or_else(|| {
                        TermdexError::Integrity(format!(
                            "document {} is missing character offsets",
                            posting.document_id
                        ))
                    })?;
                    buf.extend_from_slice(&offset.to_le_bytes());
                }
            }
        }
        Ok(buf)
    }

    /// Encode a list using its own header counts.
    pub fn encode(&self, list: &PostingList) -> Result<Vec<u8>> {
        self.serialize(list.term_id, &list.postings, list.doc_freq, list.occ_freq)
    }

    pub fn summary(&self, bytes: &[u8]) -> Result<TermSummary> {
        let mut reader = Reader::new(bytes);
        Ok(TermSummary {
            term_id: reader.u32()?,
            doc_freq: reader.u32()?,
            occ_freq: reader.u32()?,
        })
    }

    /// Decode a posting list. `max_docs` stops after that many postings;
    /// `with_positions = false` skips the position runs.
    pub fn deserialize(
        &self,
        bytes: &[u8],
        max_docs: Option<usize>,
        with_positions: bool,
    ) -> Result<PostingList> {
        let summary = self.summary(bytes)?;
        let mut reader = Reader::new(&bytes[HEADER_LEN..]);
        let ints = self.layout.ints();
        let wanted = match max_docs {
            Some(max) => max.min(summary.doc_freq as usize),
            None => summary.doc_freq as usize,
        };

        // Header counts are untrusted until the body backs them
        if wanted > reader.remaining() / POSTING_FIXED_LEN {
            return Err(TermdexError::Integrity(format!(
                "term id {} claims {} postings in {} body bytes",
                summary.term_id,
                summary.doc_freq,
                reader.remaining()
            )));
        }
        let mut postings = Vec::with_capacity(wanted);
        for _ in 0..wanted {
            let document_id = reader.u64()?;
            let store_id = reader.u32()?;
            let occurrences = reader.u32()?;
            let mut positions = Vec::new();
            if with_positions && ints > 0 {
                if occurrences as usize > reader.remaining() / (4 * ints) {
                    return Err(TermdexError::Integrity(format!(
                        "document {document_id} claims {occurrences} positions in {} bytes",
                        reader.remaining()
                    )));
                }
                positions.reserve(occurrences as usize);
                for _ in 0..occurrences {
                    let element = reader.u32()?;
                    let word = reader.u32()?;
                    let offset = if ints == 3 { Some(reader.u32()?) } else { None };
                    positions.push(Position {
                        element,
                        word,
                        offset,
                    });
                }
            } else {
                reader.skip(4 * ints * occurrences as usize)?;
            }
            postings.push(Posting {
                document_id,
                store_id,
                occurrences,
                positions,
            });
        }

        if max_docs.is_none() && !reader.is_empty() {
            return Err(TermdexError::Integrity(format!(
                "{} trailing bytes after {} postings of term id {}",
                reader.remaining(),
                summary.doc_freq,
                summary.term_id
            )));
        }

        Ok(PostingList {
            term_id: summary.term_id,
            doc_freq: summary.doc_freq,
            occ_freq: summary.occ_freq,
            postings,
        })
    }

    /// Merge `incoming` into `current`.
    ///
    /// `n_docs` and `n_occs` are the declared totals of `incoming` and must
    /// match it. Returns `None` when no postings remain, meaning the key
    /// should be deleted. Note that `Delete` drops whole postings, so it does
    /// not undo an `Add` that summed into an existing posting.
    pub fn merge(
        &self,
        current: PostingList,
        incoming: Vec<Posting>,
        op: MergeOp,
        n_docs: u32,
        n_occs: u32,
    ) -> Result<Option<PostingList>> {
        let declared_occs: u64 = incoming.iter().map(|p| u64::from(p.occurrences)).sum();
        if incoming.len() as u64 != u64::from(n_docs) || declared_occs != u64::from(n_occs) {
            return Err(TermdexError::Integrity(format!(
                "merge declared {n_docs} docs / {n_occs} occurrences but received {} / {declared_occs}",
                incoming.len()
            )));
        }

        let term_id = current.term_id;
        let postings = match op {
            MergeOp::Add => {
                let mut merged: BTreeMap<(u64, u32), Posting> = BTreeMap::new();
                for posting in current.postings.into_iter().chain(incoming) {
                    match merged.get_mut(&posting.key()) {
                        Some(existing) => {
                            existing.occurrences = existing
                                .occurrences
                                .checked_add(posting.occurrences)
                                .ok_or_else(|| {
                                    TermdexError::CodecOverflow(format!(
                                        "occurrences of document {} in term id {term_id}",
                                        posting.document_id
                                    ))
                                })?;
                            existing.positions.extend(posting.positions);
                            existing.positions.sort();
                        }
                        None => {
                            merged.insert(posting.key(), posting);
                        }
                    }
                }
                merged.into_values().collect()
            }
            MergeOp::Replace => {
                let mut merged: BTreeMap<(u64, u32), Posting> = current
                    .postings
                    .into_iter()
                    .map(|p| (p.key(), p))
                    .collect();
                for posting in incoming {
                    merged.insert(posting.key(), posting);
                }
                merged.into_values().collect()
            }
            MergeOp::Delete => {
                let doomed: HashSet<(u64, u32)> = incoming.iter().map(Posting::key).collect();
                current
                    .postings
                    .into_iter()
                    .filter(|p| !doomed.contains(&p.key()))
                    .collect::<Vec<_>>()
            }
        };

        if postings.is_empty() {
            return Ok(None);
        }
        let (doc_freq, occ_freq) = counts(term_id, &postings)?;
        Ok(Some(PostingList {
            term_id,
            doc_freq,
            occ_freq,
            postings,
        }))
    }
}

/// Document and occurrence totals of a posting run, checked against the
/// header width.
pub fn counts(term_id: u32, postings: &[Posting]) -> Result<(u32, u32)> {
    let doc_freq = u32::try_from(postings.len()).map_err(|_| {
        TermdexError::CodecOverflow(format!("document frequency of term id {term_id}"))
    })?;
    let mut occ_freq: u32 = 0;
    for posting in postings {
        occ_freq = occ_freq.checked_add(posting.occurrences).ok_or_else(|| {
            TermdexError::CodecOverflow(format!("occurrence frequency of term id {term_id}"))
        })?;
    }
    Ok((doc_freq, occ_freq))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(TermdexError::Integrity(format!(
                "posting list truncated: wanted {n} bytes at offset {}, have {}",
                self.pos,
                self.bytes.len()
            ))),
        }
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
