//! Result-set combination engine: boolean and proximity merge-joins with
//! pluggable relevance ranking.

pub mod combine;
pub mod expr;
pub mod operator;
pub mod relevance;
pub mod result_set;
pub mod weights;

pub use combine::{Clause, Combiner};
pub use expr::{QueryExpr, RelevanceSpec};
pub use operator::{Comparator, DistanceUnit, Operator, Proximity, ProximityKind};
pub use relevance::{
    CollectionStats, Relevance, RelevanceAlgorithm, StaticCollectionStats, COOPER_COEFFICIENTS,
    LARSON_COEFFICIENTS,
};
pub use result_set::{
    BitmapResultSet, Hit, HitGroup, Matches, OriginInfo, ResultSet, ResultSetItem, DEFAULT_WEIGHT,
};
pub use weights::{Contribution, WeightPolicy};
