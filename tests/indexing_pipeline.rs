//! End-to-end indexing: spool, sort, commit, then fetch and query.

use tempfile::TempDir;
use termdex::codec::PositionLayout;
use termdex::index::FreqTable;
use termdex::{
    Combiner, CommitOutcome, DocumentRef, IndexPhase, IndexSettings, IndexStore, Position,
    QueryExpr, StoreConfig, TermMap, TermOccurrences, TermdexError,
};

fn open_store(tmp: &TempDir) -> IndexStore {
    let config = StoreConfig::new(tmp.path()).with_sort_chunk_lines(3);
    IndexStore::open(config).unwrap()
}

/// Terms at consecutive word positions of element 0.
fn phrase(words: &[(&str, u32)]) -> TermMap {
    let mut terms = TermMap::new();
    for (word, at) in words {
        terms
            .entry(word.to_string())
            .or_insert_with(TermOccurrences::default)
            .positions
            .push(Position::new(0, *at));
    }
    for occurrences in terms.values_mut() {
        occurrences.occurrences = occurrences.positions.len() as u32;
    }
    terms
}

fn counts(words: &[(&str, u32)]) -> TermMap {
    words
        .iter()
        .map(|(word, n)| (word.to_string(), TermOccurrences::count(*n)))
        .collect()
}

fn batch(store: &IndexStore, settings: &IndexSettings, docs: &[(u64, TermMap)]) -> CommitOutcome {
    store.begin_indexing(settings, None).unwrap();
    for (id, terms) in docs {
        store
            .store_terms(settings, terms, DocumentRef::new(*id, 0))
            .unwrap();
    }
    store.commit_indexing(settings).unwrap()
}

fn query(store: &IndexStore, settings: &IndexSettings, expr: QueryExpr) -> Vec<u64> {
    let clause = expr.resolve(store, std::slice::from_ref(settings)).unwrap();
    Combiner::new()
        .evaluate(clause)
        .unwrap()
        .documents()
        .iter()
        .map(|doc| doc.document_id)
        .collect()
}

fn pets() -> IndexSettings {
    IndexSettings::new("pets").with_positions(PositionLayout::ElementWord)
}

#[test]
fn test_boolean_queries_over_committed_index() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let settings = pets();
    batch(
        &store,
        &settings,
        &[
            (1, phrase(&[("cat", 0)])),
            (2, phrase(&[("cat", 0), ("dog", 1)])),
        ],
    );

    let term = |t: &str| QueryExpr::term("pets", t);
    assert_eq!(query(&store, &settings, term("cat")), vec![1, 2]);
    assert_eq!(query(&store, &settings, term("dog")), vec![2]);
    assert_eq!(
        query(&store, &settings, QueryExpr::clause("and", term("cat"), term("dog"))),
        vec![2]
    );
    assert_eq!(
        query(&store, &settings, QueryExpr::clause("or", term("cat"), term("dog"))),
        vec![1, 2]
    );
    assert_eq!(
        query(&store, &settings, QueryExpr::clause("not", term("cat"), term("dog"))),
        vec![1]
    );
    assert!(query(&store, &settings, term("ferret")).is_empty());
}

#[test]
fn test_adjacency_over_committed_index() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let settings = pets();
    batch(
        &store,
        &settings,
        &[
            (2, phrase(&[("cat", 0), ("dog", 1)])),
            (3, phrase(&[("cat", 0), ("dog", 5)])),
        ],
    );

    let adj = QueryExpr::clause(
        "adj",
        QueryExpr::term("pets", "cat"),
        QueryExpr::term("pets", "dog"),
    );
    assert_eq!(query(&store, &settings, adj), vec![2]);

    let reversed = QueryExpr::clause(
        "adj",
        QueryExpr::term("pets", "dog"),
        QueryExpr::term("pets", "cat"),
    );
    assert!(query(&store, &settings, reversed).is_empty());

    let near = QueryExpr::from_json(
        r#"{"clause": {"op": "prox", "distance": 5,
            "left": {"term": {"index": "pets", "term": "dog"}},
            "right": {"term": {"index": "pets", "term": "cat"}}}}"#,
    )
    .unwrap();
    assert_eq!(query(&store, &settings, near), vec![2, 3]);
}

#[test]
fn test_incremental_commits_accumulate() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let settings = IndexSettings::new("words").with_term_ids();

    let first = batch(&store, &settings, &[(1, counts(&[("cat", 2), ("dog", 1)]))]);
    let CommitOutcome::Committed(summary) = first else {
        panic!("expected a central commit");
    };
    assert_eq!(summary.n_terms, 2);

    batch(&store, &settings, &[(2, counts(&[("cat", 1), ("emu", 4)]))]);
    let cat = store.fetch_term(&settings, "cat", None, false).unwrap();
    assert_eq!(cat.term_id, 1);
    assert_eq!((cat.doc_freq, cat.occ_freq), (2, 3));
    assert_eq!(
        cat.postings.iter().map(|p| p.document_id).collect::<Vec<_>>(),
        vec![1, 2]
    );

    let emu = store.fetch_term_summary(&settings, "emu").unwrap().unwrap();
    assert_eq!(emu.term_id, 3);
    assert_eq!(store.fetch_term_by_id(&settings, 3).unwrap().as_deref(), Some("emu"));

    let meta = store.fetch_index_metadata("words").unwrap();
    assert_eq!(meta.n_terms, 3);
    assert_eq!(meta.n_recs, 4);
    assert_eq!(meta.n_occs, 8);
    assert_eq!(store.phase("words"), IndexPhase::Idle);
}

#[test]
fn test_min_support_discards_rare_new_terms() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let settings = IndexSettings::new("words").with_term_ids().with_min_support(2);

    batch(
        &store,
        &settings,
        &[
            (1, counts(&[("aardvark", 1), ("cat", 1)])),
            (2, counts(&[("cat", 1)])),
        ],
    );

    assert!(matches!(
        store.fetch_term(&settings, "aardvark", None, false),
        Err(TermdexError::NotFound(_))
    ));
    // The discarded term never reserved an id
    assert_eq!(store.fetch_term_summary(&settings, "cat").unwrap().unwrap().term_id, 1);

    // Existing terms grow regardless of support
    batch(&store, &settings, &[(3, counts(&[("cat", 1)]))]);
    assert_eq!(store.fetch_term_summary(&settings, "cat").unwrap().unwrap().doc_freq, 3);
}

#[test]
fn test_worker_merge_matches_single_run() {
    let docs = vec![
        (1, phrase(&[("owl", 0), ("bat", 1)])),
        (2, phrase(&[("bat", 0), ("owl", 1), ("bat", 2)])),
        (3, phrase(&[("cow", 0), ("owl", 4)])),
    ];
    let settings = IndexSettings::new("barn")
        .with_positions(PositionLayout::ElementWord)
        .with_term_ids()
        .with_vectors();

    let single_tmp = TempDir::new().unwrap();
    let single = open_store(&single_tmp);
    batch(&single, &settings, &docs);

    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let mut sorted = Vec::new();
    for (worker, share) in [(0u32, &docs[..2]), (1u32, &docs[2..])] {
        store.begin_indexing(&settings, Some(worker)).unwrap();
        for (id, terms) in share {
            store
                .store_terms(&settings, terms, DocumentRef::new(*id, 0))
                .unwrap();
        }
        match store.commit_indexing(&settings).unwrap() {
            CommitOutcome::Sorted(path) => sorted.push(path),
            other => panic!("worker commit returned {other:?}"),
        }
    }
    let merged = store.merge_worker_spools(&settings, &sorted).unwrap();
    let summary = store.commit_central_indexing(&settings, &merged).unwrap();
    assert!(sorted.iter().all(|path| !path.exists()));

    assert_eq!(summary, single.fetch_index_metadata("barn").unwrap());
    for term in ["bat", "cow", "owl"] {
        assert_eq!(
            store.fetch_term(&settings, term, None, true).unwrap(),
            single.fetch_term(&settings, term, None, true).unwrap(),
            "posting lists differ for {term}"
        );
    }
    for doc in 1..=3 {
        let doc = DocumentRef::new(doc, 0);
        let vector = store.fetch_vector(&settings, doc).unwrap();
        assert!(vector.is_some());
        assert_eq!(vector, single.fetch_vector(&settings, doc).unwrap());
    }
}

#[test]
fn test_frequency_tables_rank_terms() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let settings = IndexSettings::new("words")
        .with_term_ids()
        .with_freq_tables(termdex::FreqTables::Both);
    batch(
        &store,
        &settings,
        &[
            (1, counts(&[("a", 1), ("b", 9)])),
            (2, counts(&[("a", 1)])),
            (3, counts(&[("a", 1), ("c", 1)])),
        ],
    );

    let top = store
        .fetch_term_frequencies(&settings, FreqTable::Records, 1, 1, false)
        .unwrap();
    assert_eq!(top[0].rank, 1);
    assert_eq!(store.fetch_term_by_id(&settings, top[0].term_id).unwrap().as_deref(), Some("a"));
    assert_eq!(top[0].count, 3);

    let heavy = store
        .fetch_term_frequencies(&settings, FreqTable::Occurrences, 1, 1, false)
        .unwrap();
    assert_eq!(store.fetch_term_by_id(&settings, heavy[0].term_id).unwrap().as_deref(), Some("b"));
    assert_eq!(heavy[0].count, 9);
}

#[test]
fn test_direct_writes_and_deletes() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let settings = IndexSettings::new("live").with_term_ids();
    store.create_index(&settings).unwrap();

    let doc = DocumentRef::new(5, 0);
    store.store_terms(&settings, &counts(&[("cat", 1), ("dog", 2)]), doc).unwrap();
    store
        .store_terms(&settings, &counts(&[("cat", 1)]), DocumentRef::new(6, 0))
        .unwrap();
    // A rewrite of the same document replaces its posting
    store.store_terms(&settings, &counts(&[("cat", 4)]), doc).unwrap();

    let cat = store.fetch_term(&settings, "cat", None, false).unwrap();
    assert_eq!((cat.doc_freq, cat.occ_freq), (2, 5));

    store.delete_terms(&settings, &counts(&[("dog", 2)]), doc).unwrap();
    assert!(matches!(
        store.fetch_term(&settings, "dog", None, false),
        Err(TermdexError::NotFound(_))
    ));
    let dog_id = 2;
    assert_eq!(store.fetch_term_by_id(&settings, dog_id).unwrap(), None);

    let meta = store.fetch_index_metadata("live").unwrap();
    assert_eq!(meta.n_terms, 1);
    assert_eq!(meta.n_recs, 2);
    // Maxima are high-water marks
    assert_eq!(meta.max_occs, 5);

    store.clear_index(&settings).unwrap();
    assert!(store.fetch_term_summary(&settings, "cat").unwrap().is_none());
}

#[test]
fn test_phase_errors() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let settings = IndexSettings::new("words");

    assert!(matches!(
        store.commit_indexing(&settings),
        Err(TermdexError::InvalidState(_))
    ));

    store.begin_indexing(&settings, None).unwrap();
    assert_eq!(store.phase("words"), IndexPhase::Indexing);
    assert!(matches!(
        store.begin_indexing(&settings, None),
        Err(TermdexError::InvalidState(_))
    ));
    assert!(matches!(
        store.clear_index(&settings),
        Err(TermdexError::InvalidState(_))
    ));
    store.commit_indexing(&settings).unwrap();
    assert_eq!(store.phase("words"), IndexPhase::Idle);
}
