//! The central commit: one sequential pass over a sorted spool that merges
//! every term group into the posting store, followed by summary, frequency
//! table, and vector maintenance.

use std::path::Path;
use std::sync::Arc;

use crate::codec::{counts, MergeOp, Posting, PostingList, TermCodec, TermSummary};
use crate::config::{FreqTables, IndexSettings};
use crate::error::TermdexError;
use crate::index::files::IndexFiles;
use crate::index::spool::{SpoolReader, SpoolRecord};
use crate::index::store::{IndexPhase, IndexStore, SpoolKind};
use crate::index::summary::{encode_ranked, rank_key, term_id_key, IndexSummary};
use crate::index::vectors::build_vectors;
use crate::sharded::ShardedStore;
use crate::Result;

/// Stores held for the duration of one commit. Dropping the scope releases
/// them and returns the index to `Idle`, whichever way the commit ends.
pub(crate) struct CommitScope<'a> {
    store: &'a IndexStore,
    index_id: String,
    files: Arc<IndexFiles>,
}

impl<'a> CommitScope<'a> {
    pub(crate) fn new(store: &'a IndexStore, index_id: String, files: Arc<IndexFiles>) -> Self {
        Self {
            store,
            index_id,
            files,
        }
    }

    pub(crate) fn files(&self) -> &IndexFiles {
        &self.files
    }
}

impl Drop for CommitScope<'_> {
    fn drop(&mut self) {
        self.store.release(&self.index_id);
        self.store.set_phase(&self.index_id, IndexPhase::Idle);
    }
}

/// Writes merged posting lists and keeps the index summary and term ids in step.
pub(crate) struct TermWriter<'a> {
    files: &'a IndexFiles,
    codec: TermCodec,
    summary: IndexSummary,
    next_term_id: u32,
    min_support: u32,
    pub(crate) terms_written: u64,
    pub(crate) terms_discarded: u64,
}

impl<'a> TermWriter<'a> {
    pub(crate) fn new(
        files: &'a IndexFiles,
        settings: &IndexSettings,
        summary: IndexSummary,
    ) -> Result<Self> {
        let codec = TermCodec::new(settings.positions);
        let next_term_id = match files.cached_next_term_id() {
            Some(next) => next,
            None => next_term_id(files, &codec)?,
        };
        Ok(Self {
            files,
            codec,
            summary,
            next_term_id,
            min_support: settings.min_support,
            terms_written: 0,
            terms_discarded: 0,
        })
    }

    /// Merge `postings` into the stored list for `term` under `op`. New terms
    /// below `min_support` documents are dropped when `apply_support` is set.
    pub(crate) fn write(
        &mut self,
        term: &str,
        mut postings: Vec<Posting>,
        op: MergeOp,
        apply_support: bool,
    ) -> Result<()> {
        if postings.is_empty() {
            return Ok(());
        }
        postings.sort_by_key(Posting::key);
        let (n_docs, n_occs) = counts(self.next_term_id, &postings)?;

        if let Some(current) = self.load(term)? {
            let before = current.summary();
            match self.codec.merge(current, postings, op, n_docs, n_occs)? {
                Some(merged) => {
                    self.files.postings.put(term, &self.codec.encode(&merged)?)?;
                    self.summary.apply(term, Some(before), Some(merged.summary()));
                }
                None => {
                    self.files.postings.delete(term)?;
                    if let Some(ids) = &self.files.term_ids {
                        ids.delete(&term_id_key(before.term_id))?;
                    }
                    self.summary.apply(term, Some(before), None);
                }
            }
            self.terms_written += 1;
            return Ok(());
        }

        if op == MergeOp::Delete {
            tracing::debug!(term, "delete of a term with no posting list");
            return Ok(());
        }
        // Discarded terms never reserve an id
        if apply_support && n_docs < self.min_support {
            self.terms_discarded += 1;
            return Ok(());
        }

        let term_id = self.next_term_id;
        if let Some(ids) = &self.files.term_ids {
            let key = term_id_key(term_id);
            if let Some(existing) = ids.get(&key)? {
                return Err(TermdexError::Integrity(format!(
                    "term id {term_id} for '{term}' already belongs to '{}'",
                    String::from_utf8_lossy(&existing)
                )));
            }
            ids.put(&key, term.as_bytes())?;
        }
        self.next_term_id = term_id.checked_add(1).ok_or_else(|| {
            TermdexError::CodecOverflow("term id space exhausted".to_string())
        })?;

        let bytes = self.codec.serialize(term_id, &postings, n_docs, n_occs)?;
        self.files.postings.put(term, &bytes)?;
        self.summary.apply(
            term,
            None,
            Some(TermSummary {
                term_id,
                doc_freq: n_docs,
                occ_freq: n_occs,
            }),
        );
        self.terms_written += 1;
        Ok(())
    }

    fn load(&self, term: &str) -> Result<Option<PostingList>> {
        match self.files.postings.get(term)? {
            Some(bytes) => self
                .codec
                .deserialize(&bytes, None, true)
                .map(Some)
                .map_err(|e| {
                    TermdexError::Integrity(format!(
                        "stored posting list for '{term}' is undecodable: {e}"
                    ))
                }),
            None => Ok(None),
        }
    }

    pub(crate) fn summary(&self) -> IndexSummary {
        self.summary
    }
}

impl Drop for TermWriter<'_> {
    fn drop(&mut self) {
        self.files.cache_next_term_id(self.next_term_id);
    }
}

/// Next unused term id: one past the last id in the term-id store, or one
/// past the largest id found in the posting store. Ids start at 1.
fn next_term_id(files: &IndexFiles, codec: &TermCodec) -> Result<u32> {
    let last = match &files.term_ids {
        Some(ids) => match ids.cursor().last()? {
            Some((key, _)) => Some(key.parse::<u32>().map_err(|_| {
                TermdexError::Integrity(format!("bad term id key {key:?}"))
            })?),
            None => None,
        },
        None => {
            let mut cursor = files.postings.cursor();
            let mut entry = cursor.first()?;
            let mut max = None;
            while let Some((_, bytes)) = entry {
                let id = codec.summary(&bytes)?.term_id;
                max = Some(max.map_or(id, |m: u32| m.max(id)));
                entry = cursor.next()?;
            }
            max
        }
    };
    match last {
        Some(id) => id
            .checked_add(1)
            .ok_or_else(|| TermdexError::CodecOverflow("term id space exhausted".to_string())),
        None => Ok(1),
    }
}

/// Postings of one contiguous term group of a sorted spool.
struct TermGroup {
    term: String,
    postings: Vec<Posting>,
}

impl TermGroup {
    fn start(record: SpoolRecord) -> Self {
        let mut group = Self {
            term: record.term.clone(),
            postings: Vec::new(),
        };
        group.postings.push(into_posting(record));
        group
    }

    /// Records for the same document arrive adjacent and are folded.
    fn push(&mut self, record: SpoolRecord) -> Result<()> {
        if let Some(last) = self.postings.last_mut() {
            if last.document() == record.document {
                last.occurrences = last
                    .occurrences
                    .checked_add(record.occurrences)
                    .ok_or_else(|| {
                        TermdexError::CodecOverflow(format!(
                            "occurrences of '{}' in document {}",
                            self.term, record.document.document_id
                        ))
                    })?;
                last.positions.extend(record.positions);
                last.positions.sort();
                return Ok(());
            }
        }
        self.postings.push(into_posting(record));
        Ok(())
    }
}

fn into_posting(record: SpoolRecord) -> Posting {
    Posting {
        document_id: record.document.document_id,
        store_id: record.document.store_id,
        occurrences: record.occurrences,
        positions: record.positions,
    }
}

impl IndexStore {
    /// Merge a sorted spool into the index and finalize it.
    ///
    /// Undecodable stored lists abort the commit with an integrity error; the
    /// spool files are left in place for a retry.
    pub fn commit_central_indexing(
        &self,
        settings: &IndexSettings,
        sorted: &Path,
    ) -> Result<IndexSummary> {
        settings.validate()?;
        let scope = self.begin_commit(settings)?;
        let files = scope.files();
        let codec = TermCodec::new(settings.positions);

        let existing = self.metadata().get(&settings.id)?.unwrap_or_default();
        let mut writer = TermWriter::new(files, settings, existing)?;
        let mut reader = SpoolReader::open(sorted, settings.positions)?;
        let mut group: Option<TermGroup> = None;

        while let Some(record) = reader.next_record()? {
            match group.as_mut() {
                Some(current) if current.term == record.term => current.push(record)?,
                _ => {
                    if let Some(done) = group.take() {
                        writer.write(&done.term, done.postings, MergeOp::Add, true)?;
                    }
                    group = Some(TermGroup::start(record));
                }
            }
        }
        if let Some(done) = group.take() {
            writer.write(&done.term, done.postings, MergeOp::Add, true)?;
        }

        let summary = writer.summary();
        self.metadata().put(&settings.id, &summary)?;
        tracing::info!(
            index = %settings.id,
            written = writer.terms_written,
            discarded = writer.terms_discarded,
            n_terms = summary.n_terms,
            "merged sorted spool"
        );

        if settings.freq_tables != FreqTables::None {
            rebuild_freq_tables(files, &codec)?;
        }

        let unsorted = self.spool_path(settings, None, SpoolKind::Unsorted);
        if settings.builds_vectors() {
            if unsorted.exists() {
                let stats = build_vectors(files, settings, &codec, &unsorted)?;
                tracing::info!(
                    index = %settings.id,
                    documents = stats.documents,
                    vectors = stats.vectors_written,
                    prox_vectors = stats.prox_vectors_written,
                    "built vectors"
                );
            } else {
                tracing::warn!(
                    index = %settings.id,
                    spool = %unsorted.display(),
                    "unsorted spool missing, vectors not built"
                );
            }
        }

        files.flush()?;
        remove_if_present(sorted)?;
        remove_if_present(&unsorted)?;
        Ok(summary)
    }
}

/// Rebuild both ranked tables from a header-only scan of every posting list.
pub(crate) fn rebuild_freq_tables(files: &IndexFiles, codec: &TermCodec) -> Result<()> {
    let mut rows: Vec<TermSummary> = Vec::new();
    let mut cursor = files.postings.cursor();
    let mut entry = cursor.first()?;
    while let Some((_, bytes)) = entry {
        rows.push(codec.summary(&bytes)?);
        entry = cursor.next()?;
    }

    if let Some(table) = &files.freq_records {
        rows.sort_by(|a, b| b.doc_freq.cmp(&a.doc_freq).then(a.term_id.cmp(&b.term_id)));
        write_ranked(table, rows.iter().map(|r| (r.term_id, r.doc_freq)))?;
    }
    if let Some(table) = &files.freq_occurrences {
        rows.sort_by(|a, b| b.occ_freq.cmp(&a.occ_freq).then(a.term_id.cmp(&b.term_id)));
        write_ranked(table, rows.iter().map(|r| (r.term_id, r.occ_freq)))?;
    }
    Ok(())
}

fn write_ranked(table: &ShardedStore, rows: impl Iterator<Item = (u32, u32)>) -> Result<()> {
    let mut written = 0u64;
    for (rank, (term_id, count)) in (1u64..).zip(rows) {
        table.put(&rank_key(rank), &encode_ranked(term_id, count))?;
        written = rank;
    }

    let mut stale = Vec::new();
    let mut cursor = table.cursor();
    let mut entry = cursor.set_range(&rank_key(written + 1))?;
    while let Some((key, _)) = entry {
        stale.push(key);
        entry = cursor.next()?;
    }
    for key in stale {
        table.delete(&key)?;
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
