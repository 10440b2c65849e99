pub mod document;

pub use document::{DocumentId, DocumentRef, Position, TermMap, TermOccurrences};
