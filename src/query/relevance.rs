//! Relevance scoring strategies.
//!
//! TF-IDF, Okapi and CORI weight each operand set independently before the
//! merge-join. Logistic regression instead scores each joined document from
//! all of its matched terms at once.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::TermdexError;
use crate::models::DocumentRef;
use crate::query::result_set::ResultSet;
use crate::query::weights::WeightPolicy;
use crate::Result;

/// Ray R. Larson's coefficients
pub const LARSON_COEFFICIENTS: [f64; 7] = [-3.7, 1.269, -0.31, 0.679, -0.021, 0.223, 4.01];
/// William S. Cooper's coefficients
pub const COOPER_COEFFICIENTS: [f64; 7] = [-3.7, 1.269, -0.31, 0.679, -0.0674, 0.223, 2.01];

/// Collection-level figures consumed by the scoring strategies.
pub trait CollectionStats {
    fn total_documents(&self) -> u64;

    fn mean_document_length(&self) -> f64;

    /// Length in words; `None` when the collection does not know it.
    fn document_length(&self, document: DocumentRef) -> Option<u64>;
}

/// Map-backed [`CollectionStats`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StaticCollectionStats {
    pub total_documents: u64,
    pub mean_document_length: f64,
    pub lengths: HashMap<DocumentRef, u64>,
}

impl StaticCollectionStats {
    pub fn new(total_documents: u64, mean_document_length: f64) -> Self {
        Self {
            total_documents,
            mean_document_length,
            lengths: HashMap::new(),
        }
    }

    pub fn with_length(mut self, document: DocumentRef, length: u64) -> Self {
        self.lengths.insert(document, length);
        self
    }

    /// Build from per-document lengths, deriving the total and the mean.
    pub fn from_lengths(lengths: HashMap<DocumentRef, u64>) -> Self {
        let total_documents = lengths.len() as u64;
        let mean_document_length = if total_documents == 0 {
            0.0
        } else {
            lengths.values().sum::<u64>() as f64 / total_documents as f64
        };
        Self {
            total_documents,
            mean_document_length,
            lengths,
        }
    }
}

impl CollectionStats for StaticCollectionStats {
    fn total_documents(&self) -> u64 {
        self.total_documents
    }

    fn mean_document_length(&self) -> f64 {
        self.mean_document_length
    }

    fn document_length(&self, document: DocumentRef) -> Option<u64> {
        self.lengths.get(&document).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "name")]
pub enum RelevanceAlgorithm {
    TfIdf,
    Okapi { b: f64, k1: f64, k3: f64 },
    Cori,
    LogisticRegression { coefficients: [f64; 7] },
}

impl RelevanceAlgorithm {
    pub fn okapi() -> Self {
        RelevanceAlgorithm::Okapi {
            b: 0.75,
            k1: 1.5,
            k3: 1.5,
        }
    }

    pub fn logistic_regression() -> Self {
        RelevanceAlgorithm::LogisticRegression {
            coefficients: LARSON_COEFFICIENTS,
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "tfidf" => Ok(RelevanceAlgorithm::TfIdf),
            "okapi" | "bm25" => Ok(Self::okapi()),
            "cori" => Ok(RelevanceAlgorithm::Cori),
            "lr" => Ok(Self::logistic_regression()),
            other => Err(TermdexError::Configuration(format!(
                "unknown relevance algorithm '{other}'"
            ))),
        }
    }

    pub fn is_per_document(&self) -> bool {
        matches!(self, RelevanceAlgorithm::LogisticRegression { .. })
    }

    /// Weight every item of one operand set and record the set's bounds.
    /// Does nothing for logistic regression.
    pub fn assign(&self, set: &mut ResultSet, stats: &dyn CollectionStats) -> Result<()> {
        if self.is_per_document() {
            return Ok(());
        }
        set.relevancy = true;
        if set.is_empty() {
            return Ok(());
        }
        let total = total_documents(stats)? as f64;
        let matches = set.len() as f64;

        match *self {
            RelevanceAlgorithm::TfIdf => {
                let idf = (total / matches).ln();
                for item in &mut set.items {
                    item.weight = f64::from(item.occurrences) * idf;
                }
            }
            RelevanceAlgorithm::Okapi { b, k1, k3 } => {
                let mean = mean_length(stats)?;
                let idf = (total / matches).ln();
                let qf = f64::from(set.query_freq);
                let qtw = ((k3 + 1.0) * qf) / (k3 + qf);
                for item in &mut set.items {
                    let tf = f64::from(item.occurrences);
                    let length = document_length(stats, item.document(), mean);
                    let t = ((k1 + 1.0) * tf) / (k1 * ((1.0 - b) + b * (length / mean)) + tf);
                    item.weight = idf * t * qtw;
                }
            }
            RelevanceAlgorithm::Cori => {
                let mean = mean_length(stats)?;
                let i = ((total + 0.5) / matches).ln() / (total + 1.0).ln();
                for item in &mut set.items {
                    let df = f64::from(item.occurrences);
                    let length = document_length(stats, item.document(), mean);
                    let t = df / (df + 50.0 + (150.0 * length) / mean);
                    item.weight = 0.4 + 0.6 * t * i;
                }
            }
            RelevanceAlgorithm::LogisticRegression { .. } => {}
        }
        set.refresh_weight_bounds();
        Ok(())
    }
}

/// A scoring strategy plus the policy used to merge weights of one document.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relevance {
    pub algorithm: RelevanceAlgorithm,
    #[serde(default)]
    pub combine: WeightPolicy,
}

impl Default for Relevance {
    fn default() -> Self {
        Self {
            algorithm: RelevanceAlgorithm::Cori,
            combine: WeightPolicy::Mean,
        }
    }
}

impl Relevance {
    pub fn new(algorithm: RelevanceAlgorithm) -> Self {
        Self {
            algorithm,
            combine: WeightPolicy::Mean,
        }
    }

    pub fn with_combine(mut self, combine: WeightPolicy) -> Self {
        self.combine = combine;
        self
    }
}

/// Query-wide sums over every operand set, for logistic regression.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct QueryTotals {
    pub sum_log_query_freq: f64,
    pub sum_query_freq: f64,
}

/// One matched term of a joined document, for logistic regression.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct MatchedTerm {
    pub occurrences: u32,
    pub idf: f64,
}

/// `0.75 * sigmoid(logodds)` over the six clue variables, with `n` the
/// number of matched terms.
pub(crate) fn logistic_weight(
    coefficients: &[f64; 7],
    totals: QueryTotals,
    matched: &[MatchedTerm],
    document_length: f64,
) -> f64 {
    let n = matched.len().max(1) as f64;
    let x1 = totals.sum_log_query_freq / n;
    let x2 = totals.sum_query_freq.sqrt();
    let x3 = matched
        .iter()
        .map(|m| f64::from(m.occurrences.max(1)).ln())
        .sum::<f64>()
        / n;
    let x4 = document_length.sqrt();
    let x5 = matched.iter().map(|m| m.idf).sum::<f64>() / n;
    let x6 = n.ln();
    let logodds = coefficients[0]
        + coefficients[1] * x1
        + coefficients[2] * x2
        + coefficients[3] * x3
        + coefficients[4] * x4
        + coefficients[5] * x5
        + coefficients[6] * x6;
    0.75 * (logodds.exp() / (1.0 + logodds.exp()))
}

pub(crate) fn total_documents(stats: &dyn CollectionStats) -> Result<u64> {
    match stats.total_documents() {
        0 => Err(TermdexError::Configuration(
            "relevance ranking over a collection with no documents".to_string(),
        )),
        n => Ok(n),
    }
}

pub(crate) fn document_length(stats: &dyn CollectionStats, document: DocumentRef, mean: f64) -> f64 {
    stats
        .document_length(document)
        .map_or(mean, |length| length as f64)
}

fn mean_length(stats: &dyn CollectionStats) -> Result<f64> {
    let mean = stats.mean_document_length();
    if mean > 0.0 {
        Ok(mean)
    } else {
        Err(TermdexError::Configuration(
            "relevance ranking needs a positive mean document length".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::result_set::ResultSetItem;

    fn term_set(matches: u64, occurrences: u32) -> ResultSet {
        let mut set = ResultSet::for_term("cat", Some(1), 1);
        for doc in 0..matches {
            set.push(ResultSetItem::new(DocumentRef::new(doc, 0), occurrences));
        }
        set
    }

    #[test]
    fn test_tfidf_weight() {
        let stats = StaticCollectionStats::new(100, 10.0);
        let mut set = term_set(10, 5);
        RelevanceAlgorithm::TfIdf.assign(&mut set, &stats).unwrap();
        let expected = 5.0 * 10f64.ln();
        assert!((set.items[0].weight - expected).abs() < 1e-9);
        assert!(set.relevancy);
        assert!((set.max_weight - expected).abs() < 1e-9);
        assert!((set.origins[0].max_weight - expected).abs() < 1e-9);
    }

    #[test]
    fn test_okapi_prefers_short_documents() {
        let stats = StaticCollectionStats::new(100, 10.0)
            .with_length(DocumentRef::new(0, 0), 5)
            .with_length(DocumentRef::new(1, 0), 40);
        let mut set = term_set(2, 3);
        RelevanceAlgorithm::okapi().assign(&mut set, &stats).unwrap();
        assert!(set.items[0].weight > set.items[1].weight);
        assert_eq!(set.max_weight, set.items[0].weight);
        assert_eq!(set.min_weight, set.items[1].weight);
    }

    #[test]
    fn test_cori_weight() {
        let stats = StaticCollectionStats::new(99, 20.0);
        let mut set = term_set(1, 10);
        RelevanceAlgorithm::Cori.assign(&mut set, &stats).unwrap();
        let i = (99.5f64).ln() / 100f64.ln();
        let t = 10.0 / (10.0 + 50.0 + 150.0);
        assert!((set.items[0].weight - (0.4 + 0.6 * t * i)).abs() < 1e-9);
    }

    #[test]
    fn test_empty_collection_is_configuration_error() {
        let stats = StaticCollectionStats::new(0, 0.0);
        let mut set = term_set(1, 1);
        assert!(matches!(
            RelevanceAlgorithm::TfIdf.assign(&mut set, &stats),
            Err(TermdexError::Configuration(_))
        ));
    }

    #[test]
    fn test_logistic_weight_is_bounded() {
        let totals = QueryTotals {
            sum_log_query_freq: 0.0,
            sum_query_freq: 2.0,
        };
        let matched = [
            MatchedTerm {
                occurrences: 3,
                idf: 2.0,
            },
            MatchedTerm {
                occurrences: 1,
                idf: 1.0,
            },
        ];
        let weight = logistic_weight(&LARSON_COEFFICIENTS, totals, &matched, 100.0);
        assert!(weight > 0.0 && weight < 0.75);
        let fewer = logistic_weight(&LARSON_COEFFICIENTS, totals, &matched[..1], 100.0);
        assert_ne!(weight, fewer);
    }

    #[test]
    fn test_from_lengths() {
        let mut lengths = HashMap::new();
        lengths.insert(DocumentRef::new(1, 0), 10);
        lengths.insert(DocumentRef::new(2, 0), 30);
        let stats = StaticCollectionStats::from_lengths(lengths);
        assert_eq!(stats.total_documents(), 2);
        assert_eq!(stats.mean_document_length(), 20.0);
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(
            RelevanceAlgorithm::from_name("lr").unwrap(),
            RelevanceAlgorithm::LogisticRegression {
                coefficients: LARSON_COEFFICIENTS
            }
        );
        assert!(RelevanceAlgorithm::from_name("pagerank").is_err());
    }
}
