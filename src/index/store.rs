use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::{MergeOp, Posting};
use crate::config::{FreqTables, IndexSettings, StoreConfig};
use crate::error::TermdexError;
use crate::index::commit::{rebuild_freq_tables, CommitScope, TermWriter};
use crate::index::files::IndexFiles;
use crate::index::sort::ExternalSorter;
use crate::index::spool::SpoolWriter;
use crate::index::summary::{IndexSummary, MetadataStore};
use crate::models::{DocumentRef, TermMap};
use crate::codec::TermCodec;
use crate::Result;

/// Indexing state of one index
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexPhase {
    Idle,
    Indexing,
    Finalizing,
}

/// What `commit_indexing` produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Non-distributed run: the index is committed
    Committed(IndexSummary),
    /// Worker run: the sorted spool awaiting the coordinator's merge
    Sorted(PathBuf),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpoolKind {
    Unsorted,
    Sorted,
}

struct IndexSession {
    phase: IndexPhase,
    spool: Option<SpoolWriter>,
    worker: Option<u32>,
}

impl Default for IndexSession {
    fn default() -> Self {
        Self {
            phase: IndexPhase::Idle,
            spool: None,
            worker: None,
        }
    }
}

/// Owner of every index of one store: spools, sharded stores, and metadata.
///
/// Writers to one index must be serialized by the caller. Readers may run
/// concurrently with each other but observe partial state during a commit.
pub struct IndexStore {
    config: StoreConfig,
    metadata: MetadataStore,
    sorter: ExternalSorter,
    open_files: Mutex<HashMap<String, Arc<IndexFiles>>>,
    sessions: Mutex<HashMap<String, IndexSession>>,
}

impl IndexStore {
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;
        let temp = config.temp_path();
        std::fs::create_dir_all(&temp)?;
        let metadata = MetadataStore::open(
            config
                .data_dir
                .join(format!("{}_METADATA", config.store_id)),
        )?;
        let sorter = ExternalSorter::new(temp, config.sort_chunk_lines);
        Ok(Self {
            config,
            metadata,
            sorter,
            open_files: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Resolve a record store name to the id used in postings.
    pub fn document_ref(&self, store_name: &str, document_id: u64) -> Result<DocumentRef> {
        let store_id = self
            .config
            .record_stores
            .iter()
            .position(|name| name == store_name)
            .ok_or_else(|| {
                TermdexError::Configuration(format!("unknown record store '{store_name}'"))
            })?;
        Ok(DocumentRef::new(document_id, store_id as u32))
    }

    pub fn create_index(&self, settings: &IndexSettings) -> Result<()> {
        settings.validate()?;
        self.files(settings)?;
        if self.metadata.get(&settings.id)?.is_none() {
            self.metadata.put(&settings.id, &IndexSummary::default())?;
        }
        Ok(())
    }

    pub fn contains_index(&self, index_id: &str) -> Result<bool> {
        Ok(self.metadata.get(index_id)?.is_some())
    }

    /// Drop every term, vector and table of an index, keeping it defined.
    pub fn clear_index(&self, settings: &IndexSettings) -> Result<()> {
        self.require_idle(&settings.id)?;
        self.release(&settings.id);
        IndexFiles::destroy(&self.config, &settings.id)?;
        self.metadata.put(&settings.id, &IndexSummary::default())?;
        tracing::info!(index = %settings.id, "cleared index");
        Ok(())
    }

    pub fn delete_index(&self, settings: &IndexSettings) -> Result<()> {
        self.require_idle(&settings.id)?;
        self.release(&settings.id);
        IndexFiles::destroy(&self.config, &settings.id)?;
        self.metadata.remove(&settings.id)?;
        self.sessions.lock().remove(&settings.id);
        tracing::info!(index = %settings.id, "deleted index");
        Ok(())
    }

    pub fn phase(&self, index_id: &str) -> IndexPhase {
        self.sessions
            .lock()
            .get(index_id)
            .map_or(IndexPhase::Idle, |session| session.phase)
    }

    /// Start a batch: open a fresh spool for this index (or this worker's
    /// share of it) and route `store_terms` into it.
    pub fn begin_indexing(&self, settings: &IndexSettings, worker: Option<u32>) -> Result<()> {
        settings.validate()?;
        if settings.sort_values {
            self.files(settings)?;
        }
        let path = self.spool_path(settings, worker, SpoolKind::Unsorted);

        let mut sessions = self.sessions.lock();
        let session = sessions.entry(settings.id.clone()).or_default();
        if session.phase != IndexPhase::Idle {
            return Err(TermdexError::InvalidState(format!(
                "index {} is already {:?}",
                settings.id, session.phase
            )));
        }
        session.spool = Some(SpoolWriter::create(&path, settings.positions)?);
        session.worker = worker;
        session.phase = IndexPhase::Indexing;
        tracing::debug!(index = %settings.id, spool = %path.display(), "began indexing");
        Ok(())
    }

    /// Record a document's terms. While indexing they go to the spool;
    /// otherwise they are merged straight into the posting store.
    pub fn store_terms(
        &self,
        settings: &IndexSettings,
        terms: &TermMap,
        document: DocumentRef,
    ) -> Result<()> {
        if terms.is_empty() {
            return Ok(());
        }
        let spooled = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(&settings.id) {
                Some(session) if session.phase == IndexPhase::Indexing => {
                    let spool = session.spool.as_mut().ok_or_else(|| {
                        TermdexError::InvalidState(format!("index {} has no spool", settings.id))
                    })?;
                    spool.write_document(document, terms)?;
                    true
                }
                Some(session) if session.phase == IndexPhase::Finalizing => {
                    return Err(TermdexError::InvalidState(format!(
                        "index {} is finalizing",
                        settings.id
                    )))
                }
                _ => false,
            }
        };

        let files = self.files(settings)?;
        if settings.sort_values {
            self.store_sort_value(&files, terms, document)?;
        }
        if spooled {
            return Ok(());
        }

        let summary = self.metadata.get(&settings.id)?.unwrap_or_default();
        let mut writer = TermWriter::new(&files, settings, summary)?;
        for (term, occurrences) in terms {
            let posting = Posting {
                document_id: document.document_id,
                store_id: document.store_id,
                occurrences: occurrences.occurrences,
                positions: occurrences.positions.clone(),
            };
            writer.write(term, vec![posting], MergeOp::Replace, false)?;
        }
        self.finish_direct_write(settings, writer.summary())
    }

    /// Remove a document's postings for the given terms. Lists left empty are
    /// deleted along with their term id.
    pub fn delete_terms(
        &self,
        settings: &IndexSettings,
        terms: &TermMap,
        document: DocumentRef,
    ) -> Result<()> {
        if self.phase(&settings.id) == IndexPhase::Finalizing {
            return Err(TermdexError::InvalidState(format!(
                "index {} is finalizing",
                settings.id
            )));
        }
        let files = self.files(settings)?;
        let summary = self.metadata.get(&settings.id)?.unwrap_or_default();
        let mut writer = TermWriter::new(&files, settings, summary)?;
        for (term, occurrences) in terms {
            let posting = Posting::new(
                document.document_id,
                document.store_id,
                occurrences.occurrences,
            );
            writer.write(term, vec![posting], MergeOp::Delete, false)?;
        }
        self.finish_direct_write(settings, writer.summary())
    }

    /// Close the spool and sort it. Worker runs hand back the sorted path;
    /// otherwise the sorted spool is committed immediately.
    ///
    /// A failed sort leaves the unsorted spool in place and the index idle.
    pub fn commit_indexing(&self, settings: &IndexSettings) -> Result<CommitOutcome> {
        let (spool, worker) = {
            let mut sessions = self.sessions.lock();
            let session = sessions
                .get_mut(&settings.id)
                .filter(|session| session.phase == IndexPhase::Indexing)
                .ok_or_else(|| {
                    TermdexError::InvalidState(format!(
                        "commit_indexing on index {} without begin_indexing",
                        settings.id
                    ))
                })?;
            session.phase = IndexPhase::Finalizing;
            let spool = session.spool.take().ok_or_else(|| {
                TermdexError::InvalidState(format!("index {} has no spool", settings.id))
            })?;
            (spool, session.worker.take())
        };
        let _idle = PhaseReset {
            store: self,
            index_id: &settings.id,
        };

        let records = spool.records();
        let unsorted = spool.finish()?;
        let sorted = self.spool_path(settings, worker, SpoolKind::Sorted);
        let lines = self.sorter.sort(&unsorted, &sorted).map_err(|e| {
            tracing::error!(
                index = %settings.id,
                spool = %unsorted.display(),
                error = %e,
                "sort failed, spool kept for retry"
            );
            e
        })?;
        tracing::info!(index = %settings.id, records, lines, "sorted spool");

        if !settings.builds_vectors() {
            std::fs::remove_file(&unsorted)?;
        }
        if worker.is_some() {
            return Ok(CommitOutcome::Sorted(sorted));
        }
        self.commit_central_indexing(settings, &sorted)
            .map(CommitOutcome::Committed)
    }

    /// Coordinator step of a distributed run: N-way merge the workers' sorted
    /// spools into this index's sorted spool, gathering their unsorted spools
    /// for the vectors pass. Returns the path to pass to
    /// [`IndexStore::commit_central_indexing`].
    pub fn merge_worker_spools(
        &self,
        settings: &IndexSettings,
        sorted: &[PathBuf],
    ) -> Result<PathBuf> {
        let output = self.spool_path(settings, None, SpoolKind::Sorted);
        let lines = self.sorter.merge(sorted, &output)?;

        if settings.builds_vectors() {
            let combined = self.spool_path(settings, None, SpoolKind::Unsorted);
            let mut out = std::fs::File::create(&combined)?;
            for path in sorted {
                let worker_spool = unsorted_sibling(path);
                if worker_spool.exists() {
                    let mut input = std::fs::File::open(&worker_spool)?;
                    std::io::copy(&mut input, &mut out)?;
                    std::fs::remove_file(&worker_spool)?;
                }
            }
            out.sync_all()?;
        }
        for path in sorted {
            std::fs::remove_file(path)?;
        }
        tracing::info!(index = %settings.id, workers = sorted.len(), lines, "merged worker spools");
        Ok(output)
    }

    /// Re-rank the frequency tables from the posting headers. Commits do
    /// this themselves; direct writes leave the tables as they were.
    pub fn rebuild_frequency_tables(&self, settings: &IndexSettings) -> Result<()> {
        if settings.freq_tables == FreqTables::None {
            return Err(TermdexError::Configuration(format!(
                "index {} keeps no frequency tables",
                settings.id
            )));
        }
        self.require_idle(&settings.id)?;
        let files = self.files(settings)?;
        rebuild_freq_tables(&files, &TermCodec::new(settings.positions))
    }

    pub fn spool_path(
        &self,
        settings: &IndexSettings,
        worker: Option<u32>,
        kind: SpoolKind,
    ) -> PathBuf {
        let worker = worker.map(|w| format!("-w{w}")).unwrap_or_default();
        let suffix = match kind {
            SpoolKind::Unsorted => "_TEMP",
            SpoolKind::Sorted => "_SORT",
        };
        self.config.temp_path().join(format!(
            "{}--{}{}{}",
            self.config.store_id, settings.id, worker, suffix
        ))
    }

    /// Open (or reuse) every store of an index.
    pub(crate) fn files(&self, settings: &IndexSettings) -> Result<Arc<IndexFiles>> {
        let mut open = self.open_files.lock();
        if let Some(files) = open.get(&settings.id) {
            return Ok(files.clone());
        }
        let files = Arc::new(IndexFiles::open(&self.config, settings)?);
        open.insert(settings.id.clone(), files.clone());
        Ok(files)
    }

    pub(crate) fn begin_commit(&self, settings: &IndexSettings) -> Result<CommitScope<'_>> {
        {
            let mut sessions = self.sessions.lock();
            let session = sessions.entry(settings.id.clone()).or_default();
            if session.phase == IndexPhase::Indexing {
                return Err(TermdexError::InvalidState(format!(
                    "index {} is still spooling; call commit_indexing",
                    settings.id
                )));
            }
            session.phase = IndexPhase::Finalizing;
        }
        let files = match self.files(settings) {
            Ok(files) => files,
            Err(e) => {
                self.set_phase(&settings.id, IndexPhase::Idle);
                return Err(e);
            }
        };
        Ok(CommitScope::new(self, settings.id.clone(), files))
    }

    /// Drop the cached stores of an index; they close once the last holder
    /// lets go.
    pub(crate) fn release(&self, index_id: &str) {
        self.open_files.lock().remove(index_id);
    }

    pub(crate) fn set_phase(&self, index_id: &str, phase: IndexPhase) {
        if let Some(session) = self.sessions.lock().get_mut(index_id) {
            session.phase = phase;
        }
    }

    fn require_idle(&self, index_id: &str) -> Result<()> {
        match self.phase(index_id) {
            IndexPhase::Idle => Ok(()),
            phase => Err(TermdexError::InvalidState(format!(
                "index {index_id} is {phase:?}"
            ))),
        }
    }

    fn store_sort_value(
        &self,
        files: &IndexFiles,
        terms: &TermMap,
        document: DocumentRef,
    ) -> Result<()> {
        let (Some((lowest, _)), Some((highest, _))) =
            (terms.first_key_value(), terms.last_key_value())
        else {
            return Ok(());
        };
        let store = files.sort_values()?;
        let key = document.store_key();
        let (mut lowest, mut highest) = (lowest.as_str(), highest.as_str());
        let existing = store.get(&key)?.map(String::from_utf8).transpose().map_err(|_| {
            TermdexError::Integrity(format!("sort value of {document:?} is invalid UTF-8"))
        })?;
        if let Some(existing) = &existing {
            if let Some((low, high)) = existing.split_once('\0') {
                lowest = lowest.min(low);
                highest = highest.max(high);
            }
        }
        let value = format!("{lowest}\0{highest}");
        store.put(&key, value.as_bytes())
    }

    /// Direct writes only update the summary; frequency tables catch up at
    /// the next commit or [`IndexStore::rebuild_frequency_tables`].
    fn finish_direct_write(&self, settings: &IndexSettings, summary: IndexSummary) -> Result<()> {
        self.metadata.put(&settings.id, &summary)
    }
}

/// Returns an index to `Idle` when the sort stage of a commit ends.
struct PhaseReset<'a> {
    store: &'a IndexStore,
    index_id: &'a str,
}

impl Drop for PhaseReset<'_> {
    fn drop(&mut self) {
        self.store.set_phase(self.index_id, IndexPhase::Idle);
    }
}

fn unsorted_sibling(sorted: &Path) -> PathBuf {
    let name = sorted
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let unsorted = match name.strip_suffix("_SORT") {
        Some(stem) => format!("{stem}_TEMP"),
        None => format!("{name}_TEMP"),
    };
    sorted.with_file_name(unsorted)
}
