//! Result sets: ordered matches for a (sub)query plus the metadata needed to
//! combine and rank them.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};

use crate::models::DocumentRef;

/// Weight carried by items that were never scored
pub const DEFAULT_WEIGHT: f64 = 0.5;

/// One matched location: the position plus the term id it matched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    pub element: u32,
    pub word: u32,
    pub offset: Option<u32>,
    pub term_id: Option<u32>,
}

impl Hit {
    pub fn new(element: u32, word: u32) -> Self {
        Self {
            element,
            word,
            offset: None,
            term_id: None,
        }
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_term_id(mut self, term_id: u32) -> Self {
        self.term_id = Some(term_id);
        self
    }

    /// Same place in the document, whatever term matched there.
    pub fn same_location(&self, other: &Hit) -> bool {
        self.element == other.element && self.word == other.word && self.offset == other.offset
    }
}

/// Hits satisfying one chain of proximity constraints, in query order
pub type HitGroup = Vec<Hit>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultSetItem {
    pub document_id: u64,
    pub store_id: u32,
    pub occurrences: u32,
    pub weight: f64,
    pub prox: Vec<HitGroup>,
    /// Index into the owning set's `origins`
    pub origin: usize,
}

impl ResultSetItem {
    pub fn new(document: DocumentRef, occurrences: u32) -> Self {
        Self {
            document_id: document.document_id,
            store_id: document.store_id,
            occurrences,
            weight: DEFAULT_WEIGHT,
            prox: Vec::new(),
            origin: 0,
        }
    }

    pub fn document(&self) -> DocumentRef {
        DocumentRef::new(self.document_id, self.store_id)
    }

    pub fn key(&self) -> (u64, u32) {
        (self.document_id, self.store_id)
    }
}

/// The term (or sub-clause) a set of items came from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OriginInfo {
    pub term: Option<String>,
    pub term_id: Option<u32>,
    pub query_freq: u32,
    pub min_weight: f64,
    pub max_weight: f64,
}

/// Ordered match collection for one (sub)query.
///
/// Items are kept in ascending `(document_id, store_id)` order unless the set
/// has been explicitly reordered; [`ResultSet::restore_key_order`] undoes that.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub items: Vec<ResultSetItem>,
    pub term: Option<String>,
    pub query_freq: u32,
    pub term_id: Option<u32>,
    pub total_records: u32,
    pub total_occurrences: u32,
    pub relevancy: bool,
    pub min_weight: f64,
    pub max_weight: f64,
    /// Every item carries position hits
    pub has_positions: bool,
    pub origins: Vec<OriginInfo>,
}

impl Default for ResultSet {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            term: None,
            query_freq: 1,
            term_id: None,
            total_records: 0,
            total_occurrences: 0,
            relevancy: false,
            min_weight: 0.0,
            max_weight: 0.0,
            has_positions: false,
            origins: Vec::new(),
        }
    }
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty set for one query term; items are pushed by the caller.
    pub fn for_term(term: impl Into<String>, term_id: Option<u32>, query_freq: u32) -> Self {
        let term = term.into();
        Self {
            origins: vec![OriginInfo {
                term: Some(term.clone()),
                term_id,
                query_freq,
                min_weight: 0.0,
                max_weight: 0.0,
            }],
            term: Some(term),
            term_id,
            query_freq,
            ..Self::default()
        }
    }

    /// Give a set without origin entries one describing itself, so every
    /// item's `origin` indexes a real entry.
    pub fn ensure_origin(&mut self) {
        if self.origins.is_empty() {
            self.origins.push(OriginInfo {
                term: self.term.clone(),
                term_id: self.term_id,
                query_freq: self.query_freq,
                min_weight: self.min_weight,
                max_weight: self.max_weight,
            });
        }
    }

    pub fn with_positions(mut self, has_positions: bool) -> Self {
        self.has_positions = has_positions;
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append an item, keeping the record and occurrence totals current.
    pub fn push(&mut self, item: ResultSetItem) {
        debug_assert!(
            self.items.last().map_or(true, |last| last.key() < item.key()),
            "result set items must be pushed in key order"
        );
        self.total_records = self.total_records.saturating_add(1);
        self.total_occurrences = self.total_occurrences.saturating_add(item.occurrences);
        self.items.push(item);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultSetItem> {
        self.items.iter()
    }

    pub fn documents(&self) -> Vec<DocumentRef> {
        self.items.iter().map(ResultSetItem::document).collect()
    }

    /// Look an item up by document. Requires key order.
    pub fn get_item(&self, document: DocumentRef) -> Option<&ResultSetItem> {
        let key = (document.document_id, document.store_id);
        self.items
            .binary_search_by(|item| item.key().cmp(&key))
            .ok()
            .map(|i| &self.items[i])
    }

    pub fn is_key_ordered(&self) -> bool {
        self.items.windows(2).all(|w| w[0].key() < w[1].key())
    }

    pub fn restore_key_order(&mut self) {
        self.items.sort_by_key(ResultSetItem::key);
    }

    pub fn order_by_weight(&mut self, descending: bool) {
        self.items.sort_by(|a, b| {
            let ord = OrderedFloat(a.weight).cmp(&OrderedFloat(b.weight));
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    /// Reorder by an arbitrary key. The sort is stable, so ties keep their
    /// current relative order.
    pub fn order_by<K, F>(&mut self, mut key: F, descending: bool)
    where
        K: Ord,
        F: FnMut(&ResultSetItem) -> K,
    {
        self.items.sort_by(|a, b| {
            let ord = key(a).cmp(&key(b));
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    /// Rescale weights into 0..=1 using the set's recorded min and max.
    pub fn scale_weights(&mut self) {
        if self.items.is_empty() {
            return;
        }
        let (min, max) = (self.min_weight, self.max_weight);
        let span = max - min;
        for item in &mut self.items {
            item.weight = if span > 0.0 {
                (item.weight - min) / span
            } else {
                1.0
            };
        }
        self.min_weight = 0.0;
        self.max_weight = 1.0;
    }

    /// Recompute min and max weight from the items.
    pub fn refresh_weight_bounds(&mut self) {
        let mut weights = self.items.iter().map(|item| OrderedFloat(item.weight));
        if let Some(first) = weights.next() {
            let (min, max) = weights.fold((first, first), |(lo, hi), w| (lo.min(w), hi.max(w)));
            self.min_weight = min.0;
            self.max_weight = max.0;
        }
        let (min_weight, max_weight) = (self.min_weight, self.max_weight);
        if let [origin] = self.origins.as_mut_slice() {
            origin.min_weight = min_weight;
            origin.max_weight = max_weight;
        }
    }

    pub fn to_bitmap(&self) -> BitmapResultSet {
        let mut bitmap = BitmapResultSet::new();
        for item in &self.items {
            bitmap.insert(item.document());
        }
        bitmap
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a ResultSetItem;
    type IntoIter = std::slice::Iter<'a, ResultSetItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Membership-only result set: one bitmap of document ids per record store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BitmapResultSet {
    pub stores: BTreeMap<u32, RoaringTreemap>,
}

impl BitmapResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, document: DocumentRef) -> bool {
        self.stores
            .entry(document.store_id)
            .or_default()
            .insert(document.document_id)
    }

    pub fn contains(&self, document: DocumentRef) -> bool {
        self.stores
            .get(&document.store_id)
            .is_some_and(|bitmap| bitmap.contains(document.document_id))
    }

    pub fn len(&self) -> u64 {
        self.stores.values().map(RoaringTreemap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.values().all(RoaringTreemap::is_empty)
    }

    pub fn intersection(&self, other: &BitmapResultSet) -> BitmapResultSet {
        let mut stores = BTreeMap::new();
        for (store_id, bitmap) in &self.stores {
            if let Some(theirs) = other.stores.get(store_id) {
                let both = bitmap & theirs;
                if !both.is_empty() {
                    stores.insert(*store_id, both);
                }
            }
        }
        BitmapResultSet { stores }
    }

    pub fn union(&self, other: &BitmapResultSet) -> BitmapResultSet {
        let mut stores = self.stores.clone();
        for (store_id, bitmap) in &other.stores {
            *stores.entry(*store_id).or_default() |= bitmap;
        }
        BitmapResultSet { stores }
    }

    pub fn difference(&self, other: &BitmapResultSet) -> BitmapResultSet {
        let mut stores = BTreeMap::new();
        for (store_id, bitmap) in &self.stores {
            let rest = match other.stores.get(store_id) {
                Some(theirs) => bitmap - theirs,
                None => bitmap.clone(),
            };
            if !rest.is_empty() {
                stores.insert(*store_id, rest);
            }
        }
        BitmapResultSet { stores }
    }

    /// Expand into key-ordered list form with unit occurrences.
    pub fn to_result_set(&self) -> ResultSet {
        let mut documents: Vec<DocumentRef> = self
            .stores
            .iter()
            .flat_map(|(store_id, bitmap)| {
                bitmap.iter().map(move |doc| DocumentRef::new(doc, *store_id))
            })
            .collect();
        documents.sort();

        let mut set = ResultSet::new();
        set.ensure_origin();
        for document in documents {
            set.push(ResultSetItem::new(document, 1));
        }
        set
    }
}

/// Either representation of a result set.
#[derive(Clone, Debug, PartialEq)]
pub enum Matches {
    List(ResultSet),
    Bitmap(BitmapResultSet),
}

impl Matches {
    pub fn len(&self) -> usize {
        match self {
            Matches::List(set) => set.len(),
            Matches::Bitmap(bitmap) => bitmap.len() as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Matches::List(set) => set.is_empty(),
            Matches::Bitmap(bitmap) => bitmap.is_empty(),
        }
    }

    pub fn is_bitmap(&self) -> bool {
        matches!(self, Matches::Bitmap(_))
    }

    pub fn into_result_set(self) -> ResultSet {
        match self {
            Matches::List(set) => set,
            Matches::Bitmap(bitmap) => bitmap.to_result_set(),
        }
    }

    /// Member documents in key order.
    pub fn documents(&self) -> Vec<DocumentRef> {
        match self {
            Matches::List(set) => {
                let mut docs = set.documents();
                docs.sort();
                docs
            }
            Matches::Bitmap(bitmap) => bitmap.to_result_set().documents(),
        }
    }
}

impl From<ResultSet> for Matches {
    fn from(set: ResultSet) -> Self {
        Matches::List(set)
    }
}

impl From<BitmapResultSet> for Matches {
    fn from(bitmap: BitmapResultSet) -> Self {
        Matches::Bitmap(bitmap)
    }
}
