//! Sharded key-value store: one logical ordered store over N bounded buckets.

pub mod cursor;
pub mod store;
pub mod strategy;

pub use cursor::{Entry, ShardedCursor};
pub use store::ShardedStore;
pub use strategy::BucketStrategy;
