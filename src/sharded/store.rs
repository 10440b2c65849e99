use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fjall::{Database, Keyspace, KeyspaceCreateOptions, PersistMode};
use parking_lot::RwLock;

use crate::error::TermdexError;
use crate::sharded::{BucketStrategy, ShardedCursor};
use crate::Result;

const REGISTRY_CF: &str = "buckets";
const META_CF: &str = "meta";
const STRATEGY_KEY: &[u8] = b"strategy";

/// One logical ordered key-value store spread over lazily created buckets.
///
/// Every bucket is a fjall keyspace named after its bucket. A registry
/// keyspace records which buckets have been written, so existence is the
/// subset of the strategy's candidates found in the registry.
pub struct ShardedStore {
    path: PathBuf,
    strategy: BucketStrategy,
    db: Database,
    registry: Keyspace,
    buckets: RwLock<HashMap<String, Keyspace>>,
}

fn open_keyspace(db: &Database, name: &str) -> Result<Keyspace> {
    db.keyspace(name, || KeyspaceCreateOptions::default())
        .map_err(|e| TermdexError::Storage(format!("failed to open keyspace {name}: {e}")))
}

fn keyspace_name(bucket: &str) -> String {
    format!("b_{bucket}")
}

impl ShardedStore {
    pub fn open(path: impl Into<PathBuf>, strategy: BucketStrategy) -> Result<Self> {
        let path = path.into();
        std::fs::create_dir_all(&path)?;
        let db = Database::builder(&path).open().map_err(|e| {
            TermdexError::Storage(format!(
                "failed to open sharded store {}: {}",
                path.display(),
                e
            ))
        })?;

        let meta = open_keyspace(&db, META_CF)?;
        let registry = open_keyspace(&db, REGISTRY_CF)?;

        match meta.get(STRATEGY_KEY).map_err(TermdexError::storage)? {
            Some(raw) => {
                let stored: BucketStrategy = bincode::deserialize(raw.as_ref())?;
                if stored != strategy {
                    return Err(TermdexError::Configuration(format!(
                        "store {} was created with {:?}, not {:?}",
                        path.display(),
                        stored,
                        strategy
                    )));
                }
            }
            None => {
                let encoded = bincode::serialize(&strategy)?;
                meta.insert(STRATEGY_KEY, encoded)
                    .map_err(TermdexError::storage)?;
            }
        }

        let mut buckets = HashMap::new();
        for name in strategy.candidates() {
            if registry
                .get(name.as_bytes())
                .map_err(TermdexError::storage)?
                .is_some()
            {
                let keyspace = open_keyspace(&db, &keyspace_name(&name))?;
                buckets.insert(name, keyspace);
            }
        }

        Ok(Self {
            path,
            strategy,
            db,
            registry,
            buckets: RwLock::new(buckets),
        })
    }

    /// Remove a store and all of its buckets from disk.
    pub fn destroy(path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn strategy(&self) -> &BucketStrategy {
        &self.strategy
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(bucket) = self.existing_bucket_for(key)? else {
            return Ok(None);
        };
        Ok(bucket
            .get(key.as_bytes())
            .map_err(TermdexError::storage)?
            .map(|value| value.as_ref().to_vec()))
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let bucket = self.bucket_for_write(key)?;
        bucket
            .insert(key.as_bytes(), value)
            .map_err(TermdexError::storage)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        if let Some(bucket) = self.existing_bucket_for(key)? {
            bucket
                .remove(key.as_bytes())
                .map_err(TermdexError::storage)?;
        }
        Ok(())
    }

    pub fn cursor(&self) -> ShardedCursor<'_> {
        ShardedCursor::new(self)
    }

    /// Buckets that exist, in candidate order.
    pub fn existing_buckets(&self) -> Vec<String> {
        let buckets = self.buckets.read();
        self.strategy
            .candidates()
            .into_iter()
            .filter(|name| buckets.contains_key(name))
            .collect()
    }

    /// Number of keys stored in one bucket; zero for a bucket never written.
    pub fn bucket_len(&self, name: &str) -> Result<usize> {
        let Some(bucket) = self.buckets.read().get(name).cloned() else {
            return Ok(0);
        };
        let mut count = 0;
        for kv in bucket.iter() {
            kv.key().map_err(TermdexError::storage)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn len(&self) -> Result<usize> {
        let mut total = 0;
        for name in self.existing_buckets() {
            total += self.bucket_len(&name)?;
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.cursor().first()?.is_none())
    }

    /// Make every write so far durable.
    pub fn flush(&self) -> Result<()> {
        self.db
            .persist(PersistMode::SyncAll)
            .map_err(TermdexError::storage)
    }

    pub(crate) fn bucket_handles(&self) -> Vec<Keyspace> {
        self.buckets.read().values().cloned().collect()
    }

    fn existing_bucket_for(&self, key: &str) -> Result<Option<Keyspace>> {
        let name = self.strategy.bucket_for(key)?;
        Ok(self.buckets.read().get(&name).cloned())
    }

    fn bucket_for_write(&self, key: &str) -> Result<Keyspace> {
        let name = self.strategy.bucket_for(key)?;
        if let Some(bucket) = self.buckets.read().get(&name) {
            return Ok(bucket.clone());
        }

        let mut buckets = self.buckets.write();
        if let Some(bucket) = buckets.get(&name) {
            return Ok(bucket.clone());
        }
        let bucket = open_keyspace(&self.db, &keyspace_name(&name))?;
        self.registry
            .insert(name.as_bytes(), [1u8])
            .map_err(TermdexError::storage)?;
        tracing::debug!(store = %self.path.display(), bucket = %name, "created bucket");
        buckets.insert(name, bucket.clone());
        Ok(bucket)
    }
}
