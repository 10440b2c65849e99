use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::config::{IndexSettings, StoreConfig};
use crate::error::TermdexError;
use crate::sharded::{BucketStrategy, ShardedStore};
use crate::Result;

pub const TERM_IDS_SUFFIX: &str = "_TERMIDS";
pub const VECTORS_SUFFIX: &str = "_VECTORS";
pub const PROX_VECTORS_SUFFIX: &str = "_PROXVECTORS";
pub const FREQ_REC_SUFFIX: &str = "_FREQ_REC";
pub const FREQ_OCC_SUFFIX: &str = "_FREQ_OCC";
pub const SORT_VALUES_SUFFIX: &str = "_VALUES";

const SIDE_SUFFIXES: [&str; 6] = [
    TERM_IDS_SUFFIX,
    VECTORS_SUFFIX,
    PROX_VECTORS_SUFFIX,
    FREQ_REC_SUFFIX,
    FREQ_OCC_SUFFIX,
    SORT_VALUES_SUFFIX,
];

/// Every sharded store making up one index, opened together.
pub struct IndexFiles {
    pub base: PathBuf,
    pub postings: ShardedStore,
    pub term_ids: Option<ShardedStore>,
    pub vectors: Option<ShardedStore>,
    pub prox_vectors: Option<ShardedStore>,
    pub freq_records: Option<ShardedStore>,
    pub freq_occurrences: Option<ShardedStore>,
    pub sort_values: Option<ShardedStore>,
    /// Next unused term id, once a writer has worked it out
    next_term_id: Mutex<Option<u32>>,
}

impl IndexFiles {
    pub fn base_path(config: &StoreConfig, index_id: &str) -> PathBuf {
        config
            .data_dir
            .join(format!("{}--{}", config.store_id, index_id))
    }

    pub fn open(config: &StoreConfig, settings: &IndexSettings) -> Result<Self> {
        let base = Self::base_path(config, &settings.id);
        let postings_strategy = settings
            .posting_buckets
            .as_ref()
            .unwrap_or(&config.posting_buckets)
            .resolve()?;
        let vector_strategy = config.vector_buckets.resolve()?;

        let side = |enabled: bool, suffix: &str, strategy: BucketStrategy| -> Result<Option<ShardedStore>> {
            if enabled {
                Ok(Some(ShardedStore::open(sibling(&base, suffix), strategy)?))
            } else {
                Ok(None)
            }
        };

        Ok(Self {
            postings: ShardedStore::open(&base, postings_strategy)?,
            term_ids: side(settings.term_ids, TERM_IDS_SUFFIX, config.term_id_buckets.resolve()?)?,
            vectors: side(settings.vectors, VECTORS_SUFFIX, vector_strategy.clone())?,
            prox_vectors: side(settings.prox_vectors, PROX_VECTORS_SUFFIX, vector_strategy.clone())?,
            freq_records: side(settings.freq_tables.records(), FREQ_REC_SUFFIX, BucketStrategy::Single)?,
            freq_occurrences: side(
                settings.freq_tables.occurrences(),
                FREQ_OCC_SUFFIX,
                BucketStrategy::Single,
            )?,
            sort_values: side(settings.sort_values, SORT_VALUES_SUFFIX, vector_strategy)?,
            next_term_id: Mutex::new(None),
            base,
        })
    }

    /// Remove every store of an index, enabled or not.
    pub fn destroy(config: &StoreConfig, index_id: &str) -> Result<()> {
        let base = Self::base_path(config, index_id);
        ShardedStore::destroy(&base)?;
        for suffix in SIDE_SUFFIXES {
            ShardedStore::destroy(&sibling(&base, suffix))?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.postings.flush()?;
        for store in [
            &self.term_ids,
            &self.vectors,
            &self.prox_vectors,
            &self.freq_records,
            &self.freq_occurrences,
            &self.sort_values,
        ]
        .into_iter()
        .flatten()
        {
            store.flush()?;
        }
        Ok(())
    }

    pub(crate) fn cached_next_term_id(&self) -> Option<u32> {
        *self.next_term_id.lock()
    }

    pub(crate) fn cache_next_term_id(&self, next: u32) {
        let mut cached = self.next_term_id.lock();
        *cached = Some(cached.map_or(next, |current| current.max(next)));
    }

    pub fn term_ids(&self) -> Result<&ShardedStore> {
        require(&self.term_ids, "term id")
    }

    pub fn vectors(&self) -> Result<&ShardedStore> {
        require(&self.vectors, "term vector")
    }

    pub fn prox_vectors(&self) -> Result<&ShardedStore> {
        require(&self.prox_vectors, "proximity vector")
    }

    pub fn sort_values(&self) -> Result<&ShardedStore> {
        require(&self.sort_values, "sort value")
    }
}

fn sibling(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn require<'a>(store: &'a Option<ShardedStore>, what: &str) -> Result<&'a ShardedStore> {
    store.as_ref().ok_or_else(|| {
        TermdexError::Configuration(format!("index has no {what} store configured"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FreqTables;
    use tempfile::TempDir;

    #[test]
    fn test_open_only_enabled_stores() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::new(tmp.path()).with_store_id("st");
        let settings = IndexSettings::new("words")
            .with_term_ids()
            .with_freq_tables(FreqTables::Occurrences);

        let files = IndexFiles::open(&config, &settings).unwrap();
        assert!(files.term_ids.is_some());
        assert!(files.freq_occurrences.is_some());
        assert!(files.freq_records.is_none());
        assert!(matches!(files.vectors(), Err(TermdexError::Configuration(_))));
        assert!(tmp.path().join("st--words").exists());
        assert!(tmp.path().join("st--words_TERMIDS").exists());

        drop(files);
        IndexFiles::destroy(&config, "words").unwrap();
        assert!(!tmp.path().join("st--words").exists());
        assert!(!tmp.path().join("st--words_TERMIDS").exists());
    }
}
