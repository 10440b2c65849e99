//! Merge-join evaluation of clause trees.
//!
//! Operand sets are walked together, one cursor each. At every step the sets
//! whose current item carries the smallest `(document_id, store_id)` key
//! contribute that item and only their cursors advance, so every input stays
//! in key order and so does the output.

use crate::error::TermdexError;
use crate::query::operator::{DistanceUnit, Operator, Proximity, ProximityKind};
use crate::query::relevance::{
    document_length, logistic_weight, total_documents, CollectionStats, MatchedTerm, QueryTotals,
    Relevance, RelevanceAlgorithm,
};
use crate::query::result_set::{
    BitmapResultSet, Hit, HitGroup, Matches, ResultSet, ResultSetItem,
};
use crate::query::weights::{Contribution, WeightPolicy};
use crate::Result;

/// Boolean/proximity clause tree with resolved leaves.
#[derive(Clone, Debug, PartialEq)]
pub enum Clause {
    Leaf(Matches),
    Node {
        op: Operator,
        left: Box<Clause>,
        right: Box<Clause>,
        relevance: Option<Relevance>,
    },
}

impl Clause {
    pub fn leaf(matches: impl Into<Matches>) -> Self {
        Clause::Leaf(matches.into())
    }

    pub fn node(op: Operator, left: Clause, right: Clause) -> Self {
        Clause::Node {
            op,
            left: Box::new(left),
            right: Box::new(right),
            relevance: None,
        }
    }

    /// Rank this node's result. No effect on a leaf.
    pub fn with_relevance(mut self, ranking: Relevance) -> Self {
        if let Clause::Node { relevance, .. } = &mut self {
            *relevance = Some(ranking);
        }
        self
    }
}

/// Evaluates clauses, drawing on collection statistics when ranking.
#[derive(Clone, Copy, Default)]
pub struct Combiner<'a> {
    stats: Option<&'a dyn CollectionStats>,
}

impl<'a> Combiner<'a> {
    pub fn new() -> Self {
        Self { stats: None }
    }

    pub fn with_stats(stats: &'a dyn CollectionStats) -> Self {
        Self { stats: Some(stats) }
    }

    pub fn evaluate(&self, clause: Clause) -> Result<Matches> {
        match clause {
            Clause::Leaf(matches) => Ok(matches),
            Clause::Node {
                op,
                left,
                right,
                relevance,
            } => {
                let left = self.evaluate(*left)?;
                let right = self.evaluate(*right)?;
                self.combine(vec![left, right], &op, relevance.as_ref())
            }
        }
    }

    /// Combine operand sets under `op`, ranking with `relevance` if given.
    ///
    /// Bitmap operands stay bitmaps when every operand is one and no ranking
    /// is asked for; otherwise they are expanded to lists. Proximity needs
    /// positions, so a bitmap operand or a set without positions is a
    /// `MissingProximityData` error.
    pub fn combine(
        &self,
        sets: Vec<Matches>,
        op: &Operator,
        relevance: Option<&Relevance>,
    ) -> Result<Matches> {
        if sets.is_empty() {
            return Ok(Matches::List(ResultSet::new()));
        }
        if op.proximity().is_some() && sets.iter().any(Matches::is_bitmap) {
            return Err(TermdexError::MissingProximityData(
                "proximity operand is a bitmap result set".to_string(),
            ));
        }
        if relevance.is_none() && sets.iter().all(Matches::is_bitmap) {
            let bitmaps: Vec<BitmapResultSet> = sets
                .into_iter()
                .filter_map(|set| match set {
                    Matches::Bitmap(bitmap) => Some(bitmap),
                    Matches::List(_) => None,
                })
                .collect();
            return Ok(Matches::Bitmap(combine_bitmaps(bitmaps, op)));
        }

        let mut lists: Vec<ResultSet> = sets.into_iter().map(Matches::into_result_set).collect();
        for set in &mut lists {
            if !set.is_key_ordered() {
                set.restore_key_order();
            }
        }
        if op.proximity().is_some() {
            if let Some(set) = lists.iter().find(|set| !set.has_positions) {
                return Err(TermdexError::MissingProximityData(format!(
                    "operand {} carries no positions",
                    set.term.as_deref().unwrap_or("(clause)")
                )));
            }
        }
        self.combine_lists(lists, op, relevance).map(Matches::List)
    }

    fn stats(&self) -> Result<&'a dyn CollectionStats> {
        self.stats.ok_or_else(|| {
            TermdexError::Configuration(
                "relevance ranking requires collection statistics".to_string(),
            )
        })
    }

    fn combine_lists(
        &self,
        mut sets: Vec<ResultSet>,
        op: &Operator,
        relevance: Option<&Relevance>,
    ) -> Result<ResultSet> {
        for set in &mut sets {
            set.ensure_origin();
        }
        let relevancy = relevance.is_some() || sets.iter().any(|set| set.relevancy);
        let policy = relevance.map_or(WeightPolicy::Mean, |r| r.combine);
        let coefficients = match relevance.map(|r| r.algorithm) {
            Some(RelevanceAlgorithm::LogisticRegression { coefficients }) => Some(coefficients),
            _ => None,
        };

        if let Some(ranking) = relevance {
            if !ranking.algorithm.is_per_document() {
                let stats = self.stats()?;
                for set in &mut sets {
                    ranking.algorithm.assign(set, stats)?;
                }
            }
        }

        if sets.len() == 1 && coefficients.is_none() {
            let mut only = sets.remove(0);
            only.relevancy |= relevancy;
            return Ok(only);
        }

        let lens: Vec<usize> = sets.iter().map(ResultSet::len).collect();
        let total: usize = lens.iter().sum();
        if (op.requires_all() && lens.contains(&0)) || total == 0 {
            return Ok(empty_result(&sets, relevancy));
        }
        if *op == Operator::Or && sets.len() == 2 && lens.contains(&0) && coefficients.is_none() {
            let mut other = sets.remove(usize::from(lens[0] == 0));
            other.relevancy |= relevancy;
            return Ok(other);
        }

        if !op.preserves_order() {
            sets.sort_by_key(ResultSet::len);
        }

        let lr = match coefficients {
            Some(coefficients) => Some(LogisticContext::new(coefficients, &sets, self.stats()?)?),
            None => None,
        };

        let mut origin_offsets = Vec::with_capacity(sets.len());
        let mut offset = 0;
        for set in &sets {
            origin_offsets.push(offset);
            offset += set.origins.len();
        }

        let mut out = empty_result(&sets, relevancy);
        let n = sets.len();
        let mut cursors = vec![0usize; n];

        loop {
            if op.requires_all() && (0..n).any(|i| cursors[i] >= sets[i].len()) {
                break;
            }
            if *op == Operator::Not && cursors[0] >= sets[0].len() {
                break;
            }
            let Some(min) = (0..n)
                .filter_map(|i| sets[i].items.get(cursors[i]).map(ResultSetItem::key))
                .min()
            else {
                break;
            };

            let contributors: Vec<usize> = (0..n)
                .filter(|&i| {
                    sets[i]
                        .items
                        .get(cursors[i])
                        .is_some_and(|item| item.key() == min)
                })
                .collect();
            let items: Vec<&ResultSetItem> = contributors
                .iter()
                .map(|&i| &sets[i].items[cursors[i]])
                .collect();
            for &i in &contributors {
                cursors[i] += 1;
            }

            let accepted = match op {
                Operator::And | Operator::Prox(_) => contributors.len() == n,
                Operator::Or => true,
                Operator::Not => contributors == [0],
            };
            if !accepted {
                continue;
            }

            let groups = match op.proximity() {
                Some(prox) => match match_proximity(prox, &items)? {
                    Some(groups) => Some(groups),
                    None => continue,
                },
                None => None,
            };

            let mut item = items[0].clone();
            item.origin = origin_offsets[contributors[0]] + items[0].origin;
            item.occurrences = items
                .iter()
                .try_fold(0u32, |acc, it| acc.checked_add(it.occurrences))
                .ok_or_else(|| {
                    TermdexError::CodecOverflow(format!(
                        "occurrences of document {} across operands",
                        item.document_id
                    ))
                })?;
            item.prox = match groups {
                Some(groups) => groups,
                None => items.iter().flat_map(|it| it.prox.iter().cloned()).collect(),
            };

            if let Some(lr) = &lr {
                item.weight = lr.weight(&contributors, &items)?;
            } else if relevancy {
                let contributions: Vec<Contribution> = contributors
                    .iter()
                    .zip(&items)
                    .map(|(&i, it)| Contribution {
                        weight: it.weight,
                        min_weight: sets[i].min_weight,
                        max_weight: sets[i].max_weight,
                    })
                    .collect();
                item.weight = policy.combine(&contributions, n);
            }
            out.push(item);
        }

        if relevancy {
            out.refresh_weight_bounds();
        }
        tracing::debug!(operands = n, matched = out.len(), "combined result sets");
        Ok(out)
    }
}

/// Per-query figures for logistic regression.
struct LogisticContext<'s> {
    coefficients: [f64; 7],
    totals: QueryTotals,
    idf: Vec<f64>,
    stats: &'s dyn CollectionStats,
    mean: f64,
}

impl<'s> LogisticContext<'s> {
    fn new(
        coefficients: [f64; 7],
        sets: &[ResultSet],
        stats: &'s dyn CollectionStats,
    ) -> Result<Self> {
        let total = total_documents(stats)? as f64;
        let mut totals = QueryTotals::default();
        let mut idf = Vec::with_capacity(sets.len());
        for set in sets {
            let qf = f64::from(set.query_freq.max(1));
            totals.sum_log_query_freq += qf.ln();
            totals.sum_query_freq += qf;
            idf.push(if set.is_empty() {
                0.0
            } else {
                (total / set.len() as f64).ln()
            });
        }
        Ok(Self {
            coefficients,
            totals,
            idf,
            stats,
            mean: stats.mean_document_length(),
        })
    }

    fn weight(&self, contributors: &[usize], items: &[&ResultSetItem]) -> Result<f64> {
        let matched: Vec<MatchedTerm> = contributors
            .iter()
            .zip(items)
            .map(|(&i, item)| MatchedTerm {
                occurrences: item.occurrences,
                idf: self.idf[i],
            })
            .collect();
        let length = document_length(self.stats, items[0].document(), self.mean);
        Ok(logistic_weight(&self.coefficients, self.totals, &matched, length))
    }
}

fn empty_result(sets: &[ResultSet], relevancy: bool) -> ResultSet {
    let mut out = ResultSet::new();
    out.relevancy = relevancy;
    out.has_positions = sets.iter().all(|set| set.has_positions);
    out.origins = sets.iter().flat_map(|set| set.origins.iter().cloned()).collect();
    out
}

fn combine_bitmaps(mut bitmaps: Vec<BitmapResultSet>, op: &Operator) -> BitmapResultSet {
    let first = bitmaps.remove(0);
    match op {
        Operator::And | Operator::Prox(_) => bitmaps
            .iter()
            .fold(first, |acc, bitmap| acc.intersection(bitmap)),
        Operator::Or => bitmaps.iter().fold(first, |acc, bitmap| acc.union(bitmap)),
        Operator::Not => {
            let excluded = bitmaps
                .iter()
                .fold(BitmapResultSet::new(), |acc, bitmap| acc.union(bitmap));
            first.difference(&excluded)
        }
    }
}

/// Chain hit groups left to right: each surviving group is a left group
/// extended by a right group whose last hit satisfies the constraint
/// against the left group's last hit. `None` when some link fails.
fn match_proximity(prox: &Proximity, items: &[&ResultSetItem]) -> Result<Option<Vec<HitGroup>>> {
    let Some((first, rest)) = items.split_first() else {
        return Ok(None);
    };
    let mut left: Vec<HitGroup> = first.prox.clone();

    for right in rest {
        let mut matched = Vec::new();
        for right_group in &right.prox {
            let Some(r) = right_group.last() else {
                continue;
            };
            for left_group in &left {
                let Some(l) = left_group.last() else {
                    continue;
                };
                if !within(prox, l, r)? {
                    continue;
                }
                if prox.kind == ProximityKind::Window && left_group.len() > 1 {
                    let mut all_within = true;
                    for hit in left_group {
                        if !within(prox, hit, r)? {
                            all_within = false;
                            break;
                        }
                    }
                    if !all_within {
                        continue;
                    }
                }
                let mut group = left_group.clone();
                for hit in right_group {
                    if group.last().is_some_and(|last| last.same_location(hit)) {
                        continue;
                    }
                    group.push(*hit);
                }
                matched.push(group);
            }
        }
        if matched.is_empty() {
            return Ok(None);
        }
        left = matched;
    }
    Ok(Some(left))
}

fn within(prox: &Proximity, left: &Hit, right: &Hit) -> Result<bool> {
    let distance = match prox.unit {
        DistanceUnit::Element => i64::from(right.element) - i64::from(left.element),
        DistanceUnit::Word => {
            if left.element != right.element {
                return Ok(false);
            }
            i64::from(right.word) - i64::from(left.word)
        }
        DistanceUnit::Character => {
            if left.element != right.element {
                return Ok(false);
            }
            match (left.offset, right.offset) {
                (Some(l), Some(r)) => i64::from(r) - i64::from(l),
                _ => {
                    return Err(TermdexError::MissingProximityData(
                        "character proximity needs offsets".to_string(),
                    ))
                }
            }
        }
    };
    Ok(prox.accepts(distance))
}
