//! Read-side operations over committed indexes.

use std::collections::HashMap;

use crate::codec::{PostingList, TermCodec, TermSummary};
use crate::config::IndexSettings;
use crate::error::TermdexError;
use crate::index::store::IndexStore;
use crate::index::summary::{decode_ranked, rank_key, term_id_key, FreqTable, IndexSummary, RankedTerm};
use crate::index::vectors::{prox_key, vector_key, ProxVector, TermVector};
use crate::models::DocumentRef;
use crate::query::{CollectionStats, Hit, ResultSet, ResultSetItem, StaticCollectionStats};
use crate::Result;

/// Where a term scan starts relative to its start key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanRelation {
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl ScanRelation {
    pub fn is_forward(&self) -> bool {
        matches!(self, ScanRelation::Greater | ScanRelation::GreaterOrEqual)
    }
}

/// One row of a term scan
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TermEntry {
    pub term: String,
    pub summary: TermSummary,
}

impl IndexStore {
    /// Decode a term's posting list. A term with no list is `NotFound`.
    pub fn fetch_term(
        &self,
        settings: &IndexSettings,
        term: &str,
        max_docs: Option<usize>,
        with_positions: bool,
    ) -> Result<PostingList> {
        let files = self.files(settings)?;
        let bytes = files
            .postings
            .get(term)?
            .ok_or_else(|| TermdexError::NotFound(format!("term '{term}' in {}", settings.id)))?;
        TermCodec::new(settings.positions).deserialize(&bytes, max_docs, with_positions)
    }

    /// Header only: term id, document frequency, total occurrences.
    pub fn fetch_term_summary(&self, settings: &IndexSettings, term: &str) -> Result<Option<TermSummary>> {
        let files = self.files(settings)?;
        match files.postings.get(term)? {
            Some(bytes) => TermCodec::new(settings.positions).summary(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn fetch_term_by_id(&self, settings: &IndexSettings, term_id: u32) -> Result<Option<String>> {
        let files = self.files(settings)?;
        match files.term_ids()?.get(&term_id_key(term_id))? {
            Some(raw) => String::from_utf8(raw).map(Some).map_err(|_| {
                TermdexError::Integrity(format!("term id {term_id} maps to invalid UTF-8"))
            }),
            None => Ok(None),
        }
    }

    /// Up to `count` terms from `start` in the direction `relation` implies,
    /// stopping after `end` (inclusive) when given.
    pub fn scan_terms(
        &self,
        settings: &IndexSettings,
        start: &str,
        count: usize,
        relation: ScanRelation,
        end: Option<&str>,
    ) -> Result<Vec<TermEntry>> {
        let files = self.files(settings)?;
        let codec = TermCodec::new(settings.positions);
        let mut cursor = files.postings.cursor();
        let mut out = Vec::new();

        let mut entry = cursor.set_range(start)?;
        match relation {
            ScanRelation::Greater => {
                if entry.as_ref().is_some_and(|(key, _)| key == start) {
                    entry = cursor.next()?;
                }
            }
            ScanRelation::GreaterOrEqual => {}
            ScanRelation::LessOrEqual => {
                entry = match entry {
                    Some((key, value)) if key == start => Some((key, value)),
                    Some(_) => cursor.prev()?,
                    None => cursor.last()?,
                };
            }
            ScanRelation::Less => {
                entry = match entry {
                    Some(_) => cursor.prev()?,
                    None => cursor.last()?,
                };
            }
        }

        while let Some((term, bytes)) = entry {
            if out.len() >= count {
                break;
            }
            if let Some(end) = end {
                let past = if relation.is_forward() {
                    term.as_str() > end
                } else {
                    term.as_str() < end
                };
                if past {
                    break;
                }
            }
            out.push(TermEntry {
                summary: codec.summary(&bytes)?,
                term,
            });
            entry = if relation.is_forward() {
                cursor.next()?
            } else {
                cursor.prev()?
            };
        }
        Ok(out)
    }

    pub fn fetch_vector(&self, settings: &IndexSettings, document: DocumentRef) -> Result<Option<TermVector>> {
        let files = self.files(settings)?;
        match files.vectors()?.get(&vector_key(document))? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn fetch_prox_vector(
        &self,
        settings: &IndexSettings,
        document: DocumentRef,
        element: u32,
    ) -> Result<Option<ProxVector>> {
        let files = self.files(settings)?;
        match files.prox_vectors()?.get(&prox_key(document, element))? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Every element's proximity vector for one document, by element.
    pub fn fetch_prox_vectors(
        &self,
        settings: &IndexSettings,
        document: DocumentRef,
    ) -> Result<Vec<(u32, ProxVector)>> {
        let files = self.files(settings)?;
        let store = files.prox_vectors()?;
        let prefix = format!("{}|", vector_key(document));
        let mut cursor = store.cursor();
        let mut entry = cursor.set_range(&prefix)?;
        let mut out = Vec::new();
        while let Some((key, raw)) = entry {
            let Some(element) = key.strip_prefix(&prefix) else {
                break;
            };
            let element = element.parse::<u32>().map_err(|_| {
                TermdexError::Integrity(format!("bad proximity vector key {key:?}"))
            })?;
            out.push((element, bincode::deserialize(&raw)?));
            entry = cursor.next()?;
        }
        Ok(out)
    }

    /// Ranked rows from a frequency table. Ascending order starts at
    /// `start_rank`; descending order counts `start_rank` from the least
    /// frequent end.
    pub fn fetch_term_frequencies(
        &self,
        settings: &IndexSettings,
        table: FreqTable,
        start_rank: u64,
        count: usize,
        descending: bool,
    ) -> Result<Vec<RankedTerm>> {
        let files = self.files(settings)?;
        let store = match table {
            FreqTable::Records => files.freq_records.as_ref(),
            FreqTable::Occurrences => files.freq_occurrences.as_ref(),
        }
        .ok_or_else(|| {
            TermdexError::Configuration(format!(
                "index {} has no {table:?} frequency table",
                settings.id
            ))
        })?;

        let mut cursor = store.cursor();
        let mut out = Vec::new();
        if descending {
            let mut entry = cursor.last()?;
            let mut skipped = 1;
            while let Some((key, raw)) = entry {
                if out.len() >= count {
                    break;
                }
                if skipped >= start_rank.max(1) {
                    out.push(decode_ranked(&key, &raw)?);
                } else {
                    skipped += 1;
                }
                entry = cursor.prev()?;
            }
        } else {
            let mut entry = cursor.set_range(&rank_key(start_rank.max(1)))?;
            while let Some((key, raw)) = entry {
                if out.len() >= count {
                    break;
                }
                out.push(decode_ranked(&key, &raw)?);
                entry = cursor.next()?;
            }
        }
        Ok(out)
    }

    pub fn fetch_index_metadata(&self, index_id: &str) -> Result<IndexSummary> {
        self.metadata()
            .get(index_id)?
            .ok_or_else(|| TermdexError::NotFound(format!("index {index_id}")))
    }

    /// Lowest (or highest) term recorded for a document.
    pub fn fetch_sort_value(
        &self,
        settings: &IndexSettings,
        document: DocumentRef,
        highest: bool,
    ) -> Result<Option<String>> {
        let files = self.files(settings)?;
        let Some(raw) = files.sort_values()?.get(&document.store_key())? else {
            return Ok(None);
        };
        let text = String::from_utf8(raw).map_err(|_| {
            TermdexError::Integrity(format!("sort value of {document:?} is invalid UTF-8"))
        })?;
        let mut parts = text.splitn(2, '\0');
        let lowest = parts.next().unwrap_or_default().to_string();
        Ok(Some(if highest {
            parts.next().map_or(lowest, str::to_string)
        } else {
            lowest
        }))
    }

    /// Reorder a result set by each document's stored sort value. Documents
    /// without one go last.
    pub fn order_by_sort_value(
        &self,
        settings: &IndexSettings,
        set: &mut ResultSet,
        descending: bool,
    ) -> Result<()> {
        let mut values = HashMap::with_capacity(set.len());
        for item in set.iter() {
            let document = item.document();
            values.insert(document, self.fetch_sort_value(settings, document, descending)?);
        }
        set.items.sort_by(|a, b| {
            let (va, vb) = (&values[&a.document()], &values[&b.document()]);
            match (va, vb) {
                (Some(x), Some(y)) if descending => y.cmp(x),
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
        Ok(())
    }

    /// Resolve one query term to a result set. A term absent from the index
    /// gives an empty set; each stored position becomes a one-hit group.
    pub fn construct_result_set(
        &self,
        settings: &IndexSettings,
        term: &str,
        query_freq: u32,
    ) -> Result<ResultSet> {
        let positional = settings.positions.is_positional();
        let list = match self.fetch_term(settings, term, None, positional) {
            Ok(list) => list,
            Err(e) if e.recovers_to_empty() => {
                return Ok(ResultSet::for_term(term, None, query_freq).with_positions(positional))
            }
            Err(e) => return Err(e),
        };

        let mut set = ResultSet::for_term(term, Some(list.term_id), query_freq)
            .with_positions(positional);
        for posting in list.postings {
            let mut item = ResultSetItem::new(posting.document(), posting.occurrences);
            item.prox = posting
                .positions
                .iter()
                .map(|p| {
                    vec![Hit {
                        element: p.element,
                        word: p.word,
                        offset: p.offset,
                        term_id: Some(list.term_id),
                    }]
                })
                .collect();
            set.push(item);
        }
        Ok(set)
    }

    /// Document count and lengths from the index's term vectors, for ranking.
    pub fn collection_stats(&self, settings: &IndexSettings) -> Result<StaticCollectionStats> {
        let files = self.files(settings)?;
        let store = files.vectors()?;
        let mut lengths = HashMap::new();
        let mut cursor = store.cursor();
        let mut entry = cursor.first()?;
        while let Some((key, raw)) = entry {
            let vector: TermVector = bincode::deserialize(&raw)?;
            lengths.insert(parse_vector_key(&key)?, u64::from(vector.total_occurrences));
            entry = cursor.next()?;
        }
        let stats = StaticCollectionStats::from_lengths(lengths);
        tracing::debug!(
            index = %settings.id,
            documents = stats.total_documents(),
            "loaded collection stats"
        );
        Ok(stats)
    }
}

fn parse_vector_key(key: &str) -> Result<DocumentRef> {
    let bad = || TermdexError::Integrity(format!("bad vector key {key:?}"));
    let (store, doc) = key.split_once('|').ok_or_else(bad)?;
    Ok(DocumentRef::new(
        doc.parse().map_err(|_| bad())?,
        store.parse().map_err(|_| bad())?,
    ))
}
