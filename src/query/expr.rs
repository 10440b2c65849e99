//! JSON query expressions, resolved against an [`IndexStore`] into clauses.
//!
//! ```json
//! {"clause": {
//!     "op": "prox", "distance": 3, "comparator": "<=", "ordered": true,
//!     "left":  {"term": {"index": "body", "term": "rust"}},
//!     "right": {"term": {"index": "body", "term": "borrow"}},
//!     "relevance": {"algorithm": "okapi", "combine": "sum"}
//! }}
//! ```

use serde::{Deserialize, Serialize};

use crate::config::IndexSettings;
use crate::error::TermdexError;
use crate::index::IndexStore;
use crate::query::combine::Clause;
use crate::query::operator::{Comparator, DistanceUnit, Operator};
use crate::query::relevance::{Relevance, RelevanceAlgorithm, LARSON_COEFFICIENTS};
use crate::query::result_set::Matches;
use crate::query::weights::WeightPolicy;
use crate::Result;

fn default_query_freq() -> u32 {
    1
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryExpr {
    Term {
        index: String,
        term: String,
        #[serde(default = "default_query_freq")]
        query_freq: u32,
        /// Resolve to a membership-only bitmap
        #[serde(default)]
        bitmap: bool,
    },
    Clause {
        op: String,
        left: Box<QueryExpr>,
        right: Box<QueryExpr>,
        #[serde(default)]
        distance: Option<u32>,
        #[serde(default)]
        comparator: Option<String>,
        #[serde(default)]
        unit: Option<String>,
        #[serde(default)]
        ordered: Option<bool>,
        #[serde(default)]
        relevance: Option<RelevanceSpec>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelevanceSpec {
    pub algorithm: String,
    #[serde(default)]
    pub combine: Option<String>,
    /// Logistic regression coefficient overrides
    #[serde(default)]
    pub coefficients: Option<[f64; 7]>,
    /// Okapi tuning overrides
    #[serde(default)]
    pub b: Option<f64>,
    #[serde(default)]
    pub k1: Option<f64>,
    #[serde(default)]
    pub k3: Option<f64>,
}

impl QueryExpr {
    pub fn term(index: impl Into<String>, term: impl Into<String>) -> Self {
        QueryExpr::Term {
            index: index.into(),
            term: term.into(),
            query_freq: 1,
            bitmap: false,
        }
    }

    pub fn clause(op: impl Into<String>, left: QueryExpr, right: QueryExpr) -> Self {
        QueryExpr::Clause {
            op: op.into(),
            left: Box::new(left),
            right: Box::new(right),
            distance: None,
            comparator: None,
            unit: None,
            ordered: None,
            relevance: None,
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Index of the leftmost term.
    pub fn first_index(&self) -> &str {
        match self {
            QueryExpr::Term { index, .. } => index,
            QueryExpr::Clause { left, .. } => left.first_index(),
        }
    }

    /// Fetch every term's result set and bind operators and ranking.
    pub fn resolve(&self, store: &IndexStore, indexes: &[IndexSettings]) -> Result<Clause> {
        match self {
            QueryExpr::Term {
                index,
                term,
                query_freq,
                bitmap,
            } => {
                let settings = find_index(indexes, index)?;
                let set = store.construct_result_set(settings, term, *query_freq)?;
                Ok(Clause::Leaf(if *bitmap {
                    Matches::Bitmap(set.to_bitmap())
                } else {
                    Matches::List(set)
                }))
            }
            QueryExpr::Clause {
                op,
                left,
                right,
                distance,
                comparator,
                unit,
                ordered,
                relevance,
            } => {
                let mut operator = Operator::from_name(op)?;
                let has_modifiers =
                    distance.is_some() || comparator.is_some() || unit.is_some() || ordered.is_some();
                match &mut operator {
                    Operator::Prox(prox) => {
                        if let Some(distance) = distance {
                            prox.distance = *distance;
                        }
                        if let Some(comparator) = comparator {
                            prox.comparator = Comparator::from_symbol(comparator)?;
                        }
                        if let Some(unit) = unit {
                            prox.unit = DistanceUnit::from_name(unit)?;
                        }
                        if let Some(ordered) = ordered {
                            prox.ordered = *ordered;
                        }
                    }
                    _ if has_modifiers => {
                        return Err(TermdexError::Configuration(format!(
                            "proximity modifiers given to '{op}'"
                        )))
                    }
                    _ => {}
                }

                let ranking = match relevance {
                    Some(relevance) => Some(relevance.resolve(find_index(indexes, self.first_index())?)?),
                    None => None,
                };
                let clause = Clause::node(
                    operator,
                    left.resolve(store, indexes)?,
                    right.resolve(store, indexes)?,
                );
                Ok(match ranking {
                    Some(ranking) => clause.with_relevance(ranking),
                    None => clause,
                })
            }
        }
    }
}

impl RelevanceSpec {
    /// Query overrides win over index settings, which win over defaults.
    pub fn resolve(&self, settings: &IndexSettings) -> Result<Relevance> {
        let algorithm = match RelevanceAlgorithm::from_name(&self.algorithm)? {
            RelevanceAlgorithm::Okapi { b, k1, k3 } => RelevanceAlgorithm::Okapi {
                b: self.b.unwrap_or(b),
                k1: self.k1.unwrap_or(k1),
                k3: self.k3.unwrap_or(k3),
            },
            RelevanceAlgorithm::LogisticRegression { .. } => RelevanceAlgorithm::LogisticRegression {
                coefficients: self
                    .coefficients
                    .or(settings.lr_coefficients)
                    .unwrap_or(LARSON_COEFFICIENTS),
            },
            other => other,
        };
        let combine = match &self.combine {
            Some(name) => WeightPolicy::from_name(name)?,
            None => WeightPolicy::Mean,
        };
        Ok(Relevance { algorithm, combine })
    }
}

fn find_index<'a>(indexes: &'a [IndexSettings], id: &str) -> Result<&'a IndexSettings> {
    indexes
        .iter()
        .find(|settings| settings.id == id)
        .ok_or_else(|| TermdexError::Configuration(format!("query names unknown index '{id}'")))
}
