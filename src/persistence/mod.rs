//! Persistence for query results: Fjall-backed result sets with expiry.

mod result_store;

pub use result_store::{ResultSetId, ResultSetStore};
