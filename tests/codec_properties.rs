//! Property tests for the posting-list codec and its merge operations.

use std::collections::BTreeMap;

use proptest::prelude::*;
use termdex::codec::{counts, MergeOp, PositionLayout, Posting, PostingList, TermCodec};
use termdex::Position;

/// Postings keyed by (document, store), each with 1..4 ascending positions.
fn postings(max_docs: usize) -> impl Strategy<Value = Vec<Posting>> {
    prop::collection::btree_map(
        (0u64..500, 0u32..3),
        prop::collection::btree_set((0u32..4, 0u32..200), 1..4),
        1..max_docs,
    )
    .prop_map(|docs| {
        docs.into_iter()
            .map(|((document_id, store_id), hits)| {
                let positions = hits
                    .into_iter()
                    .map(|(element, word)| Position::new(element, word))
                    .collect();
                Posting::with_positions(document_id, store_id, positions)
            })
            .collect()
    })
}

fn list(term_id: u32, postings: Vec<Posting>) -> PostingList {
    let (doc_freq, occ_freq) = counts(term_id, &postings).unwrap();
    PostingList {
        term_id,
        doc_freq,
        occ_freq,
        postings,
    }
}

fn merge(codec: &TermCodec, current: PostingList, incoming: Vec<Posting>, op: MergeOp) -> Option<PostingList> {
    let (n_docs, n_occs) = counts(current.term_id, &incoming).unwrap();
    codec.merge(current, incoming, op, n_docs, n_occs).unwrap()
}

proptest! {
    #[test]
    fn prop_encoding_preserves_list(term_id in 1u32..10_000, postings in postings(30)) {
        let codec = TermCodec::new(PositionLayout::ElementWord);
        let original = list(term_id, postings);
        let bytes = codec.encode(&original).unwrap();
        prop_assert_eq!(codec.summary(&bytes).unwrap(), original.summary());
        prop_assert_eq!(codec.deserialize(&bytes, None, true).unwrap(), original);
    }

    #[test]
    fn prop_truncated_decode_is_a_prefix(postings in postings(30), max_docs in 0usize..40) {
        let codec = TermCodec::new(PositionLayout::ElementWord);
        let original = list(7, postings);
        let bytes = codec.encode(&original).unwrap();
        let decoded = codec.deserialize(&bytes, Some(max_docs), false).unwrap();
        let kept = max_docs.min(original.postings.len());
        prop_assert_eq!(decoded.postings.len(), kept);
        for (got, want) in decoded.postings.iter().zip(&original.postings) {
            prop_assert_eq!(got.key(), want.key());
            prop_assert_eq!(got.occurrences, want.occurrences);
            prop_assert!(got.positions.is_empty());
        }
    }

    #[test]
    fn prop_add_is_a_union_summing_occurrences(a in postings(20), b in postings(20)) {
        let codec = TermCodec::new(PositionLayout::ElementWord);
        let merged = merge(&codec, list(3, a.clone()), b.clone(), MergeOp::Add).unwrap();

        let mut expected: BTreeMap<(u64, u32), u32> = BTreeMap::new();
        for posting in a.iter().chain(&b) {
            *expected.entry(posting.key()).or_default() += posting.occurrences;
        }
        let got: BTreeMap<(u64, u32), u32> = merged
            .postings
            .iter()
            .map(|p| (p.key(), p.occurrences))
            .collect();
        prop_assert_eq!(got, expected);
        prop_assert!(merged.postings.windows(2).all(|w| w[0].key() < w[1].key()));
        prop_assert_eq!(merged.doc_freq as usize, merged.postings.len());
        prop_assert_eq!(merged.term_id, 3);
        for posting in &merged.postings {
            prop_assert_eq!(posting.positions.len(), posting.occurrences as usize);
        }

        // Re-encoding the merge result yields a well-formed list
        let bytes = codec.encode(&merged).unwrap();
        prop_assert_eq!(codec.deserialize(&bytes, None, true).unwrap(), merged);
    }

    #[test]
    fn prop_replace_substitutes_matching_postings(a in postings(20), b in postings(20)) {
        let codec = TermCodec::new(PositionLayout::ElementWord);
        let merged = merge(&codec, list(3, a.clone()), b.clone(), MergeOp::Replace).unwrap();
        for posting in &b {
            let stored = merged.postings.iter().find(|p| p.key() == posting.key()).unwrap();
            prop_assert_eq!(stored, posting);
        }
        for posting in a.iter().filter(|p| !b.iter().any(|q| q.key() == p.key())) {
            prop_assert!(merged.postings.contains(posting));
        }
    }

    #[test]
    fn prop_delete_removes_only_named_documents(a in postings(20), b in postings(20)) {
        let codec = TermCodec::new(PositionLayout::ElementWord);
        let remaining = merge(&codec, list(3, a.clone()), b.clone(), MergeOp::Delete);
        let survivors: Vec<Posting> = a
            .into_iter()
            .filter(|p| !b.iter().any(|q| q.key() == p.key()))
            .collect();
        match remaining {
            Some(merged) => prop_assert_eq!(merged.postings, survivors),
            None => prop_assert!(survivors.is_empty()),
        }
    }
}

#[test]
fn test_delete_does_not_undo_add() {
    let codec = TermCodec::new(PositionLayout::None);
    let current = list(1, vec![Posting::new(1, 0, 2), Posting::new(2, 0, 1)]);
    let added = merge(&codec, current, vec![Posting::new(1, 0, 3)], MergeOp::Add).unwrap();
    assert_eq!(added.occ_freq, 6);

    // Deleting what was added removes document 1 entirely
    let after = merge(&codec, added, vec![Posting::new(1, 0, 3)], MergeOp::Delete).unwrap();
    assert_eq!(after.postings, vec![Posting::new(2, 0, 1)]);
    assert_eq!((after.doc_freq, after.occ_freq), (1, 1));
}

#[test]
fn test_merge_rejects_mismatched_totals() {
    let codec = TermCodec::new(PositionLayout::None);
    let current = list(1, vec![Posting::new(1, 0, 1)]);
    let err = codec
        .merge(current, vec![Posting::new(2, 0, 4)], MergeOp::Add, 1, 3)
        .unwrap_err();
    assert!(matches!(err, termdex::TermdexError::Integrity(_)));
}

#[test]
fn test_offsets_layout_requires_offsets() {
    let codec = TermCodec::new(PositionLayout::ElementWordOffset);
    let without = Posting::with_positions(1, 0, vec![Position::new(0, 1)]);
    assert!(codec.serialize(1, &[without], 1, 1).is_err());

    let with = Posting::with_positions(1, 0, vec![Position::new(0, 1).with_offset(12)]);
    let bytes = codec.serialize(1, &[with.clone()], 1, 1).unwrap();
    assert_eq!(codec.deserialize(&bytes, None, true).unwrap().postings, vec![with]);
}
