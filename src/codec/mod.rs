//! Term codec: posting-list types, their byte format, and merges.

pub mod posting;
pub mod term_codec;

pub use posting::{MergeOp, Posting, PositionLayout, PostingList, TermSummary};
pub use term_codec::{counts, TermCodec, HEADER_LEN};
