//! Per-document term vectors and proximity vectors, built in a second pass
//! over the unsorted spool once every posting list has its final counts.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::TermCodec;
use crate::config::IndexSettings;
use crate::index::cache::SummaryCache;
use crate::index::files::IndexFiles;
use crate::index::spool::{SpoolReader, SpoolRecord};
use crate::models::DocumentRef;
use crate::{Result, TermdexError};

/// Inverse of a posting list for one document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermVector {
    pub total_terms: u32,
    pub total_occurrences: u32,
    /// (term id, occurrences), ascending by term id
    pub entries: Vec<(u32, u32)>,
}

impl TermVector {
    pub fn from_counts(terms: BTreeMap<u32, u32>) -> Result<Self> {
        let total_terms = u32::try_from(terms.len())
            .map_err(|_| TermdexError::CodecOverflow("vector term count".to_string()))?;
        let total_occurrences = terms
            .values()
            .try_fold(0u32, |sum, &n| sum.checked_add(n))
            .ok_or_else(|| TermdexError::CodecOverflow("vector occurrence total".to_string()))?;
        Ok(Self {
            total_terms,
            total_occurrences,
            entries: terms.into_iter().collect(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxEntry {
    pub word: u32,
    pub term_id: u32,
    pub offset: Option<u32>,
}

/// Word-ordered terms of one structural element of one document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxVector {
    pub entries: Vec<ProxEntry>,
}

pub fn vector_key(document: DocumentRef) -> String {
    document.store_key()
}

pub fn prox_key(document: DocumentRef, element: u32) -> String {
    format!("{}|{element:010}", document.store_key())
}

/// Counters reported by the vectors pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VectorStats {
    pub documents: u64,
    pub vectors_written: u64,
    pub prox_vectors_written: u64,
    pub cache_misses: u64,
}

pub(crate) fn build_vectors(
    files: &IndexFiles,
    settings: &IndexSettings,
    codec: &TermCodec,
    spool: &Path,
) -> Result<VectorStats> {
    let mut cache = SummaryCache::new(settings.max_vector_cache_size);
    let mut reader = SpoolReader::open(spool, settings.positions)?;
    let mut stats = VectorStats::default();
    let mut group: Vec<SpoolRecord> = Vec::new();

    while let Some(record) = reader.next_record()? {
        if group
            .last()
            .is_some_and(|last| last.document != record.document)
        {
            write_document(files, settings, codec, &mut cache, &group, &mut stats)?;
            group.clear();
        }
        group.push(record);
    }
    if !group.is_empty() {
        write_document(files, settings, codec, &mut cache, &group, &mut stats)?;
    }

    stats.cache_misses = cache.misses();
    tracing::debug!(
        documents = stats.documents,
        cache_hits = cache.hits(),
        cache_evictions = cache.evictions(),
        "vectors pass finished"
    );
    Ok(stats)
}

fn write_document(
    files: &IndexFiles,
    settings: &IndexSettings,
    codec: &TermCodec,
    cache: &mut SummaryCache,
    records: &[SpoolRecord],
    stats: &mut VectorStats,
) -> Result<()> {
    let document = records[0].document;
    let mut terms: BTreeMap<u32, u32> = BTreeMap::new();
    let mut elements: BTreeMap<u32, Vec<ProxEntry>> = BTreeMap::new();

    for record in records {
        let summary = cache.get_or_load(&record.term, |term| {
            files
                .postings
                .get(term)?
                .map(|bytes| codec.summary(&bytes))
                .transpose()
        })?;
        // Terms dropped by minimum support have no list
        let Some(summary) = summary else { continue };

        if settings.vectors && settings.vector_filter.accepts(&summary, record.occurrences) {
            let total = terms.entry(summary.term_id).or_insert(0);
            *total = total.checked_add(record.occurrences).ok_or_else(|| {
                TermdexError::CodecOverflow(format!(
                    "occurrences of term id {} in document {}",
                    summary.term_id, document.document_id
                ))
            })?;
        }
        if settings.prox_vectors {
            for position in &record.positions {
                elements.entry(position.element).or_default().push(ProxEntry {
                    word: position.word,
                    term_id: summary.term_id,
                    offset: position.offset,
                });
            }
        }
    }

    stats.documents += 1;
    if settings.vectors && !terms.is_empty() {
        let vector = TermVector::from_counts(terms)?;
        files
            .vectors()?
            .put(&vector_key(document), &bincode::serialize(&vector)?)?;
        stats.vectors_written += 1;
    }
    if settings.prox_vectors {
        for (element, mut entries) in elements {
            entries.sort();
            let vector = ProxVector { entries };
            files
                .prox_vectors()?
                .put(&prox_key(document, element), &bincode::serialize(&vector)?)?;
            stats.prox_vectors_written += 1;
        }
    }
    Ok(())
}
