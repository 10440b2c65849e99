use std::path::PathBuf;

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use serde::{Deserialize, Serialize};

use crate::codec::TermSummary;
use crate::error::TermdexError;
use crate::Result;

const INDEX_META_CF: &str = "index_meta";

/// Index-level statistics, persisted as six little-endian u64 values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub n_terms: u64,
    pub n_recs: u64,
    pub n_occs: u64,
    pub max_recs: u64,
    pub max_occs: u64,
    pub total_chars: u64,
}

impl IndexSummary {
    pub const ENCODED_LEN: usize = 48;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        for value in [
            self.n_terms,
            self.n_recs,
            self.n_occs,
            self.max_recs,
            self.max_occs,
            self.total_chars,
        ] {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        buf
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() != Self::ENCODED_LEN {
            return Err(TermdexError::Integrity(format!(
                "index summary has {} bytes, expected {}",
                raw.len(),
                Self::ENCODED_LEN
            )));
        }
        let mut values = [0u64; 6];
        for (value, chunk) in values.iter_mut().zip(raw.chunks_exact(8)) {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            *value = u64::from_le_bytes(bytes);
        }
        let [n_terms, n_recs, n_occs, max_recs, max_occs, total_chars] = values;
        Ok(Self {
            n_terms,
            n_recs,
            n_occs,
            max_recs,
            max_occs,
            total_chars,
        })
    }

    /// Account for one term's list changing from `before` to `after`.
    ///
    /// Maxima only ever grow; shrinking a list does not lower them.
    pub fn apply(&mut self, term: &str, before: Option<TermSummary>, after: Option<TermSummary>) {
        let chars = term.chars().count() as u64;
        if let Some(before) = before {
            self.n_recs = self.n_recs.saturating_sub(u64::from(before.doc_freq));
            self.n_occs = self.n_occs.saturating_sub(u64::from(before.occ_freq));
        }
        if let Some(after) = after {
            self.n_recs += u64::from(after.doc_freq);
            self.n_occs += u64::from(after.occ_freq);
            self.max_recs = self.max_recs.max(u64::from(after.doc_freq));
            self.max_occs = self.max_occs.max(u64::from(after.occ_freq));
        }
        match (before.is_some(), after.is_some()) {
            (false, true) => {
                self.n_terms += 1;
                self.total_chars += chars;
            }
            (true, false) => {
                self.n_terms = self.n_terms.saturating_sub(1);
                self.total_chars = self.total_chars.saturating_sub(chars);
            }
            _ => {}
        }
    }
}

/// Fjall-backed per-index summary records, keyed by index id.
pub struct MetadataStore {
    _db: Database,
    index_meta: Keyspace,
}

impl MetadataStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&path)?;
        let db = Database::builder(&path).open().map_err(|e| {
            TermdexError::Storage(format!("failed to open metadata store: {}", e))
        })?;
        let index_meta = db
            .keyspace(INDEX_META_CF, || KeyspaceCreateOptions::default())
            .map_err(|e| TermdexError::Storage(format!("failed to open index_meta cf: {}", e)))?;
        Ok(Self {
            _db: db,
            index_meta,
        })
    }

    pub fn get(&self, index_id: &str) -> Result<Option<IndexSummary>> {
        match self
            .index_meta
            .get(index_id.as_bytes())
            .map_err(TermdexError::storage)?
        {
            Some(raw) => Ok(Some(IndexSummary::from_bytes(raw.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, index_id: &str, summary: &IndexSummary) -> Result<()> {
        self.index_meta
            .insert(index_id.as_bytes(), summary.to_bytes())
            .map_err(TermdexError::storage)
    }

    pub fn remove(&self, index_id: &str) -> Result<()> {
        self.index_meta
            .remove(index_id.as_bytes())
            .map_err(TermdexError::storage)
    }
}

/// Ranked frequency tables
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreqTable {
    /// Ranked by document frequency
    Records,
    /// Ranked by total occurrences
    Occurrences,
}

/// One row of a frequency table; rank 1 is the most frequent term.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedTerm {
    pub rank: u64,
    pub term_id: u32,
    pub count: u32,
}

pub fn rank_key(rank: u64) -> String {
    format!("{rank:012}")
}

pub fn term_id_key(term_id: u32) -> String {
    format!("{term_id:012}")
}

pub(crate) fn encode_ranked(term_id: u32, count: u32) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[..4].copy_from_slice(&term_id.to_le_bytes());
    buf[4..].copy_from_slice(&count.to_le_bytes());
    buf
}

pub(crate) fn decode_ranked(key: &str, raw: &[u8]) -> Result<RankedTerm> {
    let rank = key
        .parse()
        .map_err(|_| TermdexError::Integrity(format!("bad frequency rank key {key:?}")))?;
    if raw.len() != 8 {
        return Err(TermdexError::Integrity(format!(
            "frequency row {key} has {} bytes",
            raw.len()
        )));
    }
    let mut term_id = [0u8; 4];
    let mut count = [0u8; 4];
    term_id.copy_from_slice(&raw[..4]);
    count.copy_from_slice(&raw[4..]);
    Ok(RankedTerm {
        rank,
        term_id: u32::from_le_bytes(term_id),
        count: u32::from_le_bytes(count),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn summary(term_id: u32, doc_freq: u32, occ_freq: u32) -> TermSummary {
        TermSummary {
            term_id,
            doc_freq,
            occ_freq,
        }
    }

    #[test]
    fn test_summary_bytes() {
        let s = IndexSummary {
            n_terms: 1,
            n_recs: 2,
            n_occs: 3,
            max_recs: 4,
            max_occs: 5,
            total_chars: 6,
        };
        let bytes = s.to_bytes();
        assert_eq!(bytes.len(), IndexSummary::ENCODED_LEN);
        assert_eq!(IndexSummary::from_bytes(&bytes).unwrap(), s);
        assert!(IndexSummary::from_bytes(&bytes[..40]).is_err());
    }

    #[test]
    fn test_apply_tracks_terms() {
        let mut s = IndexSummary::default();
        s.apply("cat", None, Some(summary(1, 2, 3)));
        s.apply("dog", None, Some(summary(2, 1, 1)));
        assert_eq!(s.n_terms, 2);
        assert_eq!(s.n_recs, 3);
        assert_eq!(s.total_chars, 6);
        assert_eq!(s.max_occs, 3);

        s.apply("cat", Some(summary(1, 2, 3)), Some(summary(1, 4, 9)));
        assert_eq!(s.n_terms, 2);
        assert_eq!(s.n_recs, 5);
        assert_eq!(s.n_occs, 10);
        assert_eq!(s.max_recs, 4);

        s.apply("dog", Some(summary(2, 1, 1)), None);
        assert_eq!(s.n_terms, 1);
        assert_eq!(s.total_chars, 3);
        assert_eq!(s.n_recs, 4);
    }

    #[test]
    fn test_metadata_store() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::open(tmp.path().join("meta")).unwrap();
        assert_eq!(store.get("idx").unwrap(), None);
        let s = IndexSummary {
            n_terms: 9,
            ..IndexSummary::default()
        };
        store.put("idx", &s).unwrap();
        assert_eq!(store.get("idx").unwrap(), Some(s));
        store.remove("idx").unwrap();
        assert_eq!(store.get("idx").unwrap(), None);
    }

    #[test]
    fn test_ranked_rows() {
        let raw = encode_ranked(7, 42);
        let row = decode_ranked(&rank_key(3), &raw).unwrap();
        assert_eq!(
            row,
            RankedTerm {
                rank: 3,
                term_id: 7,
                count: 42
            }
        );
        assert!(decode_ranked("x", &raw).is_err());
    }
}
