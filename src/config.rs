use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::codec::{PositionLayout, TermSummary};
use crate::error::TermdexError;
use crate::sharded::BucketStrategy;
use crate::Result;

/// Named bucketing scheme plus its parameters, resolved once into a
/// [`BucketStrategy`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// One of `term1`, `term2`, `term-1`, `term-2`, `hash`, `int`, `single`
    pub scheme: String,
    #[serde(default)]
    pub max_buckets: Option<u32>,
    #[serde(default)]
    pub max_items_per_bucket: Option<u64>,
}

impl BucketConfig {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            max_buckets: None,
            max_items_per_bucket: None,
        }
    }

    pub fn single() -> Self {
        Self::new("single")
    }

    pub fn hash(max_buckets: u32) -> Self {
        Self::new("hash").with_max_buckets(max_buckets)
    }

    pub fn int_range(max_items_per_bucket: u64, max_buckets: u32) -> Self {
        let mut config = Self::new("int").with_max_buckets(max_buckets);
        config.max_items_per_bucket = Some(max_items_per_bucket);
        config
    }

    pub fn with_max_buckets(mut self, max_buckets: u32) -> Self {
        self.max_buckets = Some(max_buckets);
        self
    }

    pub fn resolve(&self) -> Result<BucketStrategy> {
        BucketStrategy::from_config(self)
    }
}

/// Index-store level configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub store_id: String,
    pub data_dir: PathBuf,
    /// Spool and sort scratch directory, `data_dir/temp` when unset
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Record store names; a store's id is its position in this list
    #[serde(default)]
    pub record_stores: Vec<String>,
    pub sort_chunk_lines: usize,
    pub posting_buckets: BucketConfig,
    pub vector_buckets: BucketConfig,
    pub term_id_buckets: BucketConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_id: "indexStore".to_string(),
            data_dir: PathBuf::from("./data"),
            temp_dir: None,
            record_stores: vec!["recordStore".to_string()],
            sort_chunk_lines: 100_000,
            posting_buckets: BucketConfig::new("term1"),
            vector_buckets: BucketConfig::hash(16),
            term_id_buckets: BucketConfig::int_range(100_000, 1024),
        }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_store_id(mut self, store_id: impl Into<String>) -> Self {
        self.store_id = store_id.into();
        self
    }

    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    pub fn with_record_stores(mut self, stores: Vec<String>) -> Self {
        self.record_stores = stores;
        self
    }

    pub fn with_posting_buckets(mut self, buckets: BucketConfig) -> Self {
        self.posting_buckets = buckets;
        self
    }

    pub fn with_sort_chunk_lines(mut self, lines: usize) -> Self {
        self.sort_chunk_lines = lines;
        self
    }

    pub fn temp_path(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("temp"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_id.is_empty() {
            return Err(TermdexError::Configuration(
                "store_id must not be empty".to_string(),
            ));
        }
        if self.sort_chunk_lines == 0 {
            return Err(TermdexError::Configuration(
                "sort_chunk_lines must be positive".to_string(),
            ));
        }
        self.posting_buckets.resolve()?;
        self.vector_buckets.resolve()?;
        self.term_id_buckets.resolve()?;
        Ok(())
    }
}

/// Which ranked term-frequency tables a commit maintains
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreqTables {
    #[default]
    None,
    Records,
    Occurrences,
    Both,
}

impl FreqTables {
    pub fn records(&self) -> bool {
        matches!(self, FreqTables::Records | FreqTables::Both)
    }

    pub fn occurrences(&self) -> bool {
        matches!(self, FreqTables::Occurrences | FreqTables::Both)
    }
}

/// Bounds on which terms make it into per-document term vectors
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorFilter {
    #[serde(default)]
    pub min_global_freq: u32,
    #[serde(default)]
    pub max_global_freq: Option<u32>,
    #[serde(default)]
    pub min_global_occs: u32,
    #[serde(default)]
    pub max_global_occs: Option<u32>,
    #[serde(default)]
    pub min_local_freq: u32,
    #[serde(default)]
    pub max_local_freq: Option<u32>,
}

impl VectorFilter {
    pub fn accepts(&self, summary: &TermSummary, local_occurrences: u32) -> bool {
        within(summary.doc_freq, self.min_global_freq, self.max_global_freq)
            && within(summary.occ_freq, self.min_global_occs, self.max_global_occs)
            && within(local_occurrences, self.min_local_freq, self.max_local_freq)
    }

    fn validate(&self) -> Result<()> {
        let pairs = [
            ("global_freq", self.min_global_freq, self.max_global_freq),
            ("global_occs", self.min_global_occs, self.max_global_occs),
            ("local_freq", self.min_local_freq, self.max_local_freq),
        ];
        for (name, min, max) in pairs {
            if let Some(max) = max {
                if min > max {
                    return Err(TermdexError::Configuration(format!(
                        "vector filter min_{name} {min} exceeds max_{name} {max}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn within(value: u32, min: u32, max: Option<u32>) -> bool {
    value >= min && max.map_or(true, |max| value <= max)
}

/// Per-index settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexSettings {
    pub id: String,
    #[serde(default)]
    pub positions: PositionLayout,
    #[serde(default)]
    pub term_ids: bool,
    #[serde(default)]
    pub vectors: bool,
    #[serde(default)]
    pub prox_vectors: bool,
    #[serde(default)]
    pub sort_values: bool,
    /// Minimum document frequency for a new term to be kept; 0 disables
    #[serde(default)]
    pub min_support: u32,
    #[serde(default)]
    pub freq_tables: FreqTables,
    #[serde(default)]
    pub vector_filter: VectorFilter,
    #[serde(default = "default_vector_cache_size")]
    pub max_vector_cache_size: usize,
    #[serde(default)]
    pub posting_buckets: Option<BucketConfig>,
    #[serde(default)]
    pub lr_coefficients: Option<[f64; 7]>,
}

fn default_vector_cache_size() -> usize {
    50_000
}

impl IndexSettings {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            positions: PositionLayout::None,
            term_ids: false,
            vectors: false,
            prox_vectors: false,
            sort_values: false,
            min_support: 0,
            freq_tables: FreqTables::None,
            vector_filter: VectorFilter::default(),
            max_vector_cache_size: default_vector_cache_size(),
            posting_buckets: None,
            lr_coefficients: None,
        }
    }

    pub fn with_positions(mut self, layout: PositionLayout) -> Self {
        self.positions = layout;
        self
    }

    pub fn with_term_ids(mut self) -> Self {
        self.term_ids = true;
        self
    }

    pub fn with_vectors(mut self) -> Self {
        self.vectors = true;
        self
    }

    pub fn with_prox_vectors(mut self) -> Self {
        self.prox_vectors = true;
        self
    }

    pub fn with_sort_values(mut self) -> Self {
        self.sort_values = true;
        self
    }

    pub fn with_min_support(mut self, min_support: u32) -> Self {
        self.min_support = min_support;
        self
    }

    pub fn with_freq_tables(mut self, tables: FreqTables) -> Self {
        self.freq_tables = tables;
        self
    }

    pub fn with_vector_filter(mut self, filter: VectorFilter) -> Self {
        self.vector_filter = filter;
        self
    }

    pub fn with_max_vector_cache_size(mut self, size: usize) -> Self {
        self.max_vector_cache_size = size;
        self
    }

    pub fn with_posting_buckets(mut self, buckets: BucketConfig) -> Self {
        self.posting_buckets = Some(buckets);
        self
    }

    /// Whether the commit runs the vectors pass at all.
    pub fn builds_vectors(&self) -> bool {
        self.vectors || self.prox_vectors
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(TermdexError::Configuration(
                "index id must not be empty".to_string(),
            ));
        }
        if self.prox_vectors && !self.positions.is_positional() {
            return Err(TermdexError::Configuration(format!(
                "index {} requests proximity vectors without positions",
                self.id
            )));
        }
        if self.builds_vectors() && self.max_vector_cache_size == 0 {
            return Err(TermdexError::Configuration(format!(
                "index {} has a zero vector cache size",
                self.id
            )));
        }
        if let Some(buckets) = &self.posting_buckets {
            buckets.resolve()?;
        }
        self.vector_filter.validate()
    }
}

/// Full configuration file consumed by the `termdex` binary
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub store: StoreConfig,
    #[serde(default)]
    pub indexes: Vec<IndexSettings>,
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.store.validate()?;
        for index in &config.indexes {
            index.validate()?;
        }
        Ok(config)
    }

    pub fn index(&self, id: &str) -> Result<&IndexSettings> {
        self.indexes
            .iter()
            .find(|index| index.id == id)
            .ok_or_else(|| TermdexError::Configuration(format!("unknown index {id}")))
    }
}
