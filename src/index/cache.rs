use std::collections::HashMap;

use crate::codec::TermSummary;
use crate::Result;

/// Bounded term -> summary cache used by the vectors pass.
///
/// When full, an arbitrary entry is evicted: whichever key the map's
/// randomized iteration order yields first. Lookups that found no term are
/// cached too.
pub struct SummaryCache {
    capacity: usize,
    entries: HashMap<String, Option<TermSummary>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl SummaryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn get_or_load<F>(&mut self, term: &str, load: F) -> Result<Option<TermSummary>>
    where
        F: FnOnce(&str) -> Result<Option<TermSummary>>,
    {
        if let Some(cached) = self.entries.get(term) {
            self.hits += 1;
            return Ok(*cached);
        }
        self.misses += 1;
        let loaded = load(term)?;
        if self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.entries.insert(term.to_string(), loaded);
        Ok(loaded)
    }

    fn evict_one(&mut self) {
        if let Some(victim) = self.entries.keys().next().cloned() {
            self.entries.remove(&victim);
            self.evictions += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}
