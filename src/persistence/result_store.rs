use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fjall::{Database, Keyspace, KeyspaceCreateOptions, PersistMode};
use parking_lot::Mutex;

use crate::error::TermdexError;
use crate::query::ResultSet;
use crate::Result;

const RESULT_SETS_CF: &str = "result_sets";
const EXPIRY_CF: &str = "expiry";
const META_CF: &str = "meta";
const NEXT_ID_KEY: &[u8] = b"next_id";

pub type ResultSetId = String;

/// Fjall-backed store of serialized result sets, each with an optional
/// expiry time. Expired sets are invisible to `fetch` and removed lazily.
pub struct ResultSetStore {
    base_dir: PathBuf,
    db: Database,
    result_sets: Keyspace,
    expiry: Keyspace,
    meta: Keyspace,
    next_id: Mutex<u64>,
}

impl ResultSetStore {
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        let db = Database::builder(&base_dir).open().map_err(|e| {
            TermdexError::Storage(format!("failed to open result set store: {e}"))
        })?;

        let result_sets = db
            .keyspace(RESULT_SETS_CF, || KeyspaceCreateOptions::default())
            .map_err(TermdexError::storage)?;
        let expiry = db
            .keyspace(EXPIRY_CF, || KeyspaceCreateOptions::default())
            .map_err(TermdexError::storage)?;
        let meta = db
            .keyspace(META_CF, || KeyspaceCreateOptions::default())
            .map_err(TermdexError::storage)?;

        let next_id = match meta.get(NEXT_ID_KEY).map_err(TermdexError::storage)? {
            Some(raw) => decode_u64(raw.as_ref())?,
            None => 1,
        };

        Ok(Self {
            base_dir,
            db,
            result_sets,
            expiry,
            meta,
            next_id: Mutex::new(next_id),
        })
    }

    pub fn path(&self) -> &Path {
        &self.base_dir
    }

    /// Persist a set, returning its new id.
    pub fn store(&self, set: &ResultSet, expires_in: Option<Duration>) -> Result<ResultSetId> {
        let id = {
            let mut next = self.next_id.lock();
            let id = *next;
            *next += 1;
            self.meta
                .insert(NEXT_ID_KEY, next.to_le_bytes())
                .map_err(TermdexError::storage)?;
            format!("rs{id:012}")
        };

        let payload = bincode::serialize(set)?;
        self.result_sets
            .insert(id.as_bytes(), payload)
            .map_err(TermdexError::storage)?;
        if let Some(ttl) = expires_in {
            let at = unix_now().saturating_add(ttl.as_secs().max(1));
            self.expiry
                .insert(id.as_bytes(), at.to_le_bytes())
                .map_err(TermdexError::storage)?;
        }
        self.db
            .persist(PersistMode::SyncAll)
            .map_err(TermdexError::storage)?;
        tracing::debug!(id = %id, items = set.len(), "stored result set");
        Ok(id)
    }

    pub fn fetch(&self, id: &str) -> Result<Option<ResultSet>> {
        if self.is_expired(id, unix_now())? {
            tracing::debug!(id, "result set expired");
            self.delete(id)?;
            return Ok(None);
        }
        let Some(raw) = self
            .result_sets
            .get(id.as_bytes())
            .map_err(TermdexError::storage)?
        else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(raw.as_ref())?))
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.result_sets
            .remove(id.as_bytes())
            .map_err(TermdexError::storage)?;
        self.expiry
            .remove(id.as_bytes())
            .map_err(TermdexError::storage)?;
        Ok(())
    }

    /// Remove every expired set, returning how many went.
    pub fn purge_expired(&self) -> Result<usize> {
        self.purge_expired_at(unix_now())
    }

    fn purge_expired_at(&self, now: u64) -> Result<usize> {
        let mut expired = Vec::new();
        for kv in self.expiry.iter() {
            let key = kv.key().map_err(TermdexError::storage)?;
            let id = String::from_utf8_lossy(key.as_ref()).into_owned();
            if self.is_expired(&id, now)? {
                expired.push(id);
            }
        }
        for id in &expired {
            self.delete(id)?;
        }
        if !expired.is_empty() {
            tracing::info!(purged = expired.len(), "purged expired result sets");
        }
        Ok(expired.len())
    }

    fn is_expired(&self, id: &str, now: u64) -> Result<bool> {
        match self
            .expiry
            .get(id.as_bytes())
            .map_err(TermdexError::storage)?
        {
            Some(raw) => Ok(decode_u64(raw.as_ref())? <= now),
            None => Ok(false),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn decode_u64(raw: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| TermdexError::Integrity(format!("expected 8 bytes, found {}", raw.len())))?;
    Ok(u64::from_le_bytes(bytes))
}
