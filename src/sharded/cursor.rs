use std::ops::Bound;

use fjall::Keyspace;

use crate::error::TermdexError;
use crate::sharded::ShardedStore;
use crate::Result;

/// A key and its value.
pub type Entry = (String, Vec<u8>);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Ordered cursor over every bucket of a [`ShardedStore`].
///
/// Each step picks the nearest key across all existing buckets, so a walk is
/// strictly ascending (or descending) with no duplicate and no omission
/// whatever the bucket distribution. The bucket list is read on every step,
/// so buckets created after the cursor are visible.
pub struct ShardedCursor<'a> {
    store: &'a ShardedStore,
    current: Option<String>,
}

impl<'a> ShardedCursor<'a> {
    pub(crate) fn new(store: &'a ShardedStore) -> Self {
        Self {
            store,
            current: None,
        }
    }

    pub fn current_key(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn first(&mut self) -> Result<Option<Entry>> {
        self.seek(Bound::Unbounded, Direction::Forward)
    }

    pub fn last(&mut self) -> Result<Option<Entry>> {
        self.seek(Bound::Unbounded, Direction::Backward)
    }

    /// Step forward. An unpositioned cursor starts at the first key; at the
    /// end `None` is returned and the position is kept.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Entry>> {
        match self.current.clone() {
            None => self.first(),
            Some(key) => self.seek(Bound::Excluded(key), Direction::Forward),
        }
    }

    pub fn prev(&mut self) -> Result<Option<Entry>> {
        match self.current.clone() {
            None => self.last(),
            Some(key) => self.seek(Bound::Excluded(key), Direction::Backward),
        }
    }

    /// Position at the first key `>= key`, in whichever bucket holds it.
    pub fn set_range(&mut self, key: &str) -> Result<Option<Entry>> {
        self.seek(Bound::Included(key.to_string()), Direction::Forward)
    }

    fn seek(&mut self, from: Bound<String>, direction: Direction) -> Result<Option<Entry>> {
        let from = match from {
            Bound::Included(key) => Bound::Included(key.into_bytes()),
            Bound::Excluded(key) => Bound::Excluded(key.into_bytes()),
            Bound::Unbounded => Bound::Unbounded,
        };

        let mut best: Option<(Vec<u8>, Keyspace)> = None;
        for bucket in self.store.bucket_handles() {
            let nearest = match direction {
                Direction::Forward => first_from(&bucket, from.clone())?,
                Direction::Backward => last_before(&bucket, from.clone())?,
            };
            let Some(key) = nearest else { continue };
            let closer = match &best {
                None => true,
                Some((best_key, _)) => match direction {
                    Direction::Forward => key < *best_key,
                    Direction::Backward => key > *best_key,
                },
            };
            if closer {
                best = Some((key, bucket));
            }
        }

        let Some((key, bucket)) = best else {
            return Ok(None);
        };
        let value = bucket
            .get(&key)
            .map_err(TermdexError::storage)?
            .ok_or_else(|| {
                TermdexError::Integrity(format!(
                    "key {:?} disappeared during a cursor step",
                    String::from_utf8_lossy(&key)
                ))
            })?;
        let key = String::from_utf8(key)
            .map_err(|e| TermdexError::Integrity(format!("non UTF-8 key in store: {e}")))?;
        self.current = Some(key.clone());
        Ok(Some((key, value.as_ref().to_vec())))
    }
}

fn first_from(bucket: &Keyspace, lower: Bound<Vec<u8>>) -> Result<Option<Vec<u8>>> {
    let range: (Bound<Vec<u8>>, Bound<Vec<u8>>) = (lower, Bound::Unbounded);
    match bucket.range(range).next() {
        Some(kv) => Ok(Some(
            kv.key().map_err(TermdexError::storage)?.as_ref().to_vec(),
        )),
        None => Ok(None),
    }
}

fn last_before(bucket: &Keyspace, upper: Bound<Vec<u8>>) -> Result<Option<Vec<u8>>> {
    let range: (Bound<Vec<u8>>, Bound<Vec<u8>>) = (Bound::Unbounded, upper);
    match bucket.range(range).next_back() {
        Some(kv) => Ok(Some(
            kv.key().map_err(TermdexError::storage)?.as_ref().to_vec(),
        )),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharded::BucketStrategy;
    use tempfile::TempDir;

    fn walk_forward(store: &ShardedStore) -> Vec<String> {
        let mut cursor = store.cursor();
        let mut keys = Vec::new();
        let mut entry = cursor.first().unwrap();
        while let Some((key, _)) = entry {
            keys.push(key);
            entry = cursor.next().unwrap();
        }
        keys
    }

    #[test]
    fn test_walk_crosses_buckets_in_order() {
        let tmp = TempDir::new().unwrap();
        let store = ShardedStore::open(tmp.path().join("s"), BucketStrategy::LastChar).unwrap();
        // Suffix bucketing scatters prefix-ordered keys
        for key in ["zoo", "abc", "abz", "mid", "ab", "b"] {
            store.put(key, key.as_bytes()).unwrap();
        }
        assert_eq!(walk_forward(&store), vec!["ab", "abc", "abz", "b", "mid", "zoo"]);
    }

    #[test]
    fn test_backward_walk_and_ends() {
        let tmp = TempDir::new().unwrap();
        let store = ShardedStore::open(tmp.path().join("s"), BucketStrategy::FirstChar).unwrap();
        for key in ["apple", "banana", "cherry"] {
            store.put(key, b"").unwrap();
        }
        let mut cursor = store.cursor();
        assert_eq!(cursor.last().unwrap().unwrap().0, "cherry");
        assert_eq!(cursor.prev().unwrap().unwrap().0, "banana");
        assert_eq!(cursor.prev().unwrap().unwrap().0, "apple");
        assert!(cursor.prev().unwrap().is_none());
        assert_eq!(cursor.current_key(), Some("apple"));
        assert_eq!(cursor.next().unwrap().unwrap().0, "banana");
    }

    #[test]
    fn test_set_range_falls_through_to_next_bucket() {
        let tmp = TempDir::new().unwrap();
        let store = ShardedStore::open(tmp.path().join("s"), BucketStrategy::FirstChar).unwrap();
        store.put("apple", b"1").unwrap();
        store.put("dog", b"2").unwrap();

        let mut cursor = store.cursor();
        let (key, value) = cursor.set_range("azz").unwrap().unwrap();
        assert_eq!(key, "dog");
        assert_eq!(value, b"2".to_vec());
        assert_eq!(cursor.set_range("apple").unwrap().unwrap().0, "apple");
        assert!(cursor.set_range("e").unwrap().is_none());
    }

    #[test]
    fn test_empty_store_cursor() {
        let tmp = TempDir::new().unwrap();
        let store = ShardedStore::open(tmp.path().join("s"), BucketStrategy::Single).unwrap();
        let mut cursor = store.cursor();
        assert!(cursor.first().unwrap().is_none());
        assert!(cursor.next().unwrap().is_none());
        assert!(cursor.last().unwrap().is_none());
    }
}
