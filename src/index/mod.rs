//! Index store and the batch indexing pipeline.
//!
//! Documents are spooled to a flat file while indexing, sorted externally,
//! then merged into the sharded posting store in one sequential pass.

pub mod cache;
pub mod commit;
pub mod fetch;
pub mod files;
pub mod sort;
pub mod spool;
pub mod store;
pub mod summary;
pub mod vectors;

pub use cache::SummaryCache;
pub use fetch::{ScanRelation, TermEntry};
pub use files::IndexFiles;
pub use sort::ExternalSorter;
pub use spool::{SpoolReader, SpoolRecord, SpoolWriter};
pub use store::{CommitOutcome, IndexPhase, IndexStore, SpoolKind};
pub use summary::{FreqTable, IndexSummary, MetadataStore, RankedTerm};
pub use vectors::{ProxEntry, ProxVector, TermVector, VectorStats};
