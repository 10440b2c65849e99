//! termdex: a sharded inverted-index engine.
//!
//! Documents arrive as pre-extracted term maps and are spooled, externally
//! sorted, and merge-committed into per-term posting lists held in a sharded
//! Fjall store. Queries resolve terms to result sets and combine them with
//! boolean and proximity operators, optionally ranked.

pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod models;
pub mod persistence;
pub mod query;
pub mod sharded;

pub use config::{BucketConfig, EngineConfig, FreqTables, IndexSettings, StoreConfig, VectorFilter};
pub use error::{Result, TermdexError};
pub use index::{CommitOutcome, IndexPhase, IndexStore};
pub use models::*;
pub use query::{Clause, Combiner, Matches, Operator, QueryExpr, ResultSet};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
