//! Operator algebra, ranking and result persistence on top of a real index.

use std::time::Duration;

use tempfile::TempDir;
use termdex::codec::PositionLayout;
use termdex::persistence::ResultSetStore;
use termdex::query::{
    Proximity, Relevance, RelevanceAlgorithm, ResultSetItem, StaticCollectionStats, WeightPolicy,
};
use termdex::{
    Clause, Combiner, DocumentRef, IndexSettings, IndexStore, Matches, Operator, Position,
    QueryExpr, ResultSet, StoreConfig, TermMap, TermOccurrences, TermdexError,
};

fn set(term: &str, docs: &[u64]) -> ResultSet {
    let mut set = ResultSet::for_term(term, None, 1);
    for doc in docs {
        set.push(ResultSetItem::new(DocumentRef::new(*doc, 0), 1));
    }
    set
}

fn docs(matches: &Matches) -> Vec<u64> {
    matches.documents().iter().map(|d| d.document_id).collect()
}

fn combine(op: Operator, sets: Vec<Matches>) -> Matches {
    Combiner::new().combine(sets, &op, None).unwrap()
}

#[test]
fn test_and_or_are_idempotent() {
    let a = set("a", &[1, 4, 9]);
    for op in [Operator::And, Operator::Or] {
        let out = combine(op, vec![a.clone().into(), a.clone().into()]);
        assert_eq!(docs(&out), vec![1, 4, 9]);
    }
    assert!(combine(Operator::Not, vec![a.clone().into(), a.into()]).is_empty());
}

#[test]
fn test_and_or_are_commutative() {
    let a = set("a", &[1, 2, 3, 7, 11]);
    let b = set("b", &[2, 7, 8]);
    for op in [Operator::And, Operator::Or] {
        let ab = combine(op, vec![a.clone().into(), b.clone().into()]);
        let ba = combine(op, vec![b.clone().into(), a.clone().into()]);
        assert_eq!(docs(&ab), docs(&ba));
    }
}

#[test]
fn test_bitmap_and_list_results_agree() {
    let a = set("a", &[1, 2, 3, 7]);
    let b = set("b", &[2, 7, 8]);
    for op in [Operator::And, Operator::Or, Operator::Not] {
        let lists = combine(op, vec![a.clone().into(), b.clone().into()]);
        let bitmaps = combine(op, vec![a.to_bitmap().into(), b.to_bitmap().into()]);
        assert!(bitmaps.is_bitmap());
        assert_eq!(docs(&lists), docs(&bitmaps), "{op:?}");
    }
}

#[test]
fn test_tfidf_weight_scales_with_occurrences() {
    let stats = StaticCollectionStats::new(100, 12.0);
    let mut term = ResultSet::for_term("rare", Some(1), 1);
    for doc in 0..10 {
        term.push(ResultSetItem::new(DocumentRef::new(doc, 0), 5));
    }
    let ranking = Relevance::new(RelevanceAlgorithm::TfIdf).with_combine(WeightPolicy::Sum);
    let out = Combiner::with_stats(&stats)
        .combine(
            vec![term.clone().into(), term.into()],
            &Operator::And,
            Some(&ranking),
        )
        .unwrap()
        .into_result_set();

    let single = 5.0 * 10f64.ln();
    assert_eq!(out.len(), 10);
    for item in &out {
        assert!((item.weight - 2.0 * single).abs() < 1e-9);
    }
}

#[test]
fn test_weight_ordering_and_restore() {
    let stats = StaticCollectionStats::new(20, 5.0);
    let mut common = set("common", &[1, 2, 3, 4]);
    common.items[2].occurrences = 6;
    let rare = set("rare", &[3]);
    let ranking = Relevance::new(RelevanceAlgorithm::TfIdf);
    let mut out = Combiner::with_stats(&stats)
        .combine(vec![common.into(), rare.into()], &Operator::Or, Some(&ranking))
        .unwrap()
        .into_result_set();

    out.order_by_weight(true);
    assert_eq!(out.items[0].document_id, 3);
    assert!(!out.is_key_ordered());
    out.scale_weights();
    assert!((out.items[0].weight - 1.0).abs() < 1e-9);

    // A reordered set still combines correctly
    let and = Combiner::new()
        .combine(vec![out.into(), set("x", &[2, 3]).into()], &Operator::And, None)
        .unwrap();
    assert_eq!(docs(&and), vec![2, 3]);
}

fn index_without_positions(tmp: &TempDir) -> (IndexStore, IndexSettings) {
    let store = IndexStore::open(StoreConfig::new(tmp.path())).unwrap();
    let settings = IndexSettings::new("flat");
    store.begin_indexing(&settings, None).unwrap();
    for doc in [1, 2] {
        let terms: TermMap = [("cat", 1), ("dog", 2)]
            .into_iter()
            .map(|(t, n)| (t.to_string(), TermOccurrences::count(n)))
            .collect();
        store
            .store_terms(&settings, &terms, DocumentRef::new(doc, 0))
            .unwrap();
    }
    store.commit_indexing(&settings).unwrap();
    (store, settings)
}

#[test]
fn test_proximity_over_count_only_index_fails() {
    let tmp = TempDir::new().unwrap();
    let (store, settings) = index_without_positions(&tmp);
    let expr = QueryExpr::clause(
        "adj",
        QueryExpr::term("flat", "cat"),
        QueryExpr::term("flat", "dog"),
    );
    let clause = expr.resolve(&store, &[settings.clone()]).unwrap();
    assert!(matches!(
        Combiner::new().evaluate(clause),
        Err(TermdexError::MissingProximityData(_))
    ));

    // Boolean operators are fine without positions
    let and = QueryExpr::clause("and", QueryExpr::term("flat", "cat"), QueryExpr::term("flat", "dog"));
    let clause = and.resolve(&store, &[settings]).unwrap();
    assert_eq!(docs(&Combiner::new().evaluate(clause).unwrap()), vec![1, 2]);
}

#[test]
fn test_ranked_query_against_index_vectors() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::open(StoreConfig::new(tmp.path())).unwrap();
    let settings = IndexSettings::new("body")
        .with_positions(PositionLayout::ElementWord)
        .with_term_ids()
        .with_vectors();
    store.begin_indexing(&settings, None).unwrap();
    let texts: [&[&str]; 3] = [
        &["rust", "borrow", "checker"],
        &["rust", "rust", "rust", "cargo"],
        &["python", "borrow"],
    ];
    for (doc, words) in texts.iter().enumerate() {
        let mut terms = TermMap::new();
        for (at, word) in words.iter().enumerate() {
            let entry = terms.entry(word.to_string()).or_default();
            entry.positions.push(Position::new(0, at as u32));
            entry.occurrences += 1;
        }
        store
            .store_terms(&settings, &terms, DocumentRef::new(doc as u64 + 1, 0))
            .unwrap();
    }
    store.commit_indexing(&settings).unwrap();

    let stats = store.collection_stats(&settings).unwrap();
    let expr = QueryExpr::from_json(
        r#"{"clause": {"op": "or",
            "left": {"term": {"index": "body", "term": "rust"}},
            "right": {"term": {"index": "body", "term": "borrow"}},
            "relevance": {"algorithm": "okapi"}}}"#,
    )
    .unwrap();
    let clause = expr.resolve(&store, &[settings]).unwrap();
    let mut out = Combiner::with_stats(&stats)
        .evaluate(clause)
        .unwrap()
        .into_result_set();
    assert!(out.relevancy);
    assert_eq!(out.len(), 3);
    out.order_by_weight(true);
    // Matching both terms outranks repeating one
    let order: Vec<u64> = out.iter().map(|item| item.document_id).collect();
    assert_eq!(order, vec![1, 2, 3]);
}

#[test]
fn test_saved_results_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let mut results = set("cat", &[3, 5]);
    results.items[1].weight = 0.75;

    let (forever, temporary) = {
        let saved = ResultSetStore::open(tmp.path().join("results")).unwrap();
        let forever = saved.store(&results, None).unwrap();
        let temporary = saved.store(&results, Some(Duration::from_secs(3600))).unwrap();
        assert_ne!(forever, temporary);
        (forever, temporary)
    };

    let saved = ResultSetStore::open(tmp.path().join("results")).unwrap();
    assert_eq!(saved.fetch(&forever).unwrap(), Some(results.clone()));
    assert_eq!(saved.fetch(&temporary).unwrap(), Some(results.clone()));
    assert_eq!(saved.purge_expired().unwrap(), 0);

    let next = saved.store(&results, None).unwrap();
    assert!(next > temporary);

    saved.delete(&forever).unwrap();
    assert_eq!(saved.fetch(&forever).unwrap(), None);
}

#[test]
fn test_phrase_clause_tree_with_bitmap_filter() {
    let mut cat = ResultSet::for_term("cat", Some(1), 1).with_positions(true);
    let mut dog = ResultSet::for_term("dog", Some(2), 1).with_positions(true);
    for (doc, cat_at, dog_at) in [(1u64, 0u32, 1u32), (2, 3, 4), (3, 0, 7)] {
        let mut item = ResultSetItem::new(DocumentRef::new(doc, 0), 1);
        item.prox = vec![vec![termdex::query::Hit::new(0, cat_at).with_term_id(1)]];
        cat.push(item);
        let mut item = ResultSetItem::new(DocumentRef::new(doc, 0), 1);
        item.prox = vec![vec![termdex::query::Hit::new(0, dog_at).with_term_id(2)]];
        dog.push(item);
    }
    let allowed = set("allowed", &[2, 3]).to_bitmap();

    let tree = Clause::node(
        Operator::And,
        Clause::node(
            Operator::Prox(Proximity::phrase()),
            Clause::leaf(cat),
            Clause::leaf(dog),
        ),
        Clause::leaf(allowed),
    );
    let out = Combiner::new().evaluate(tree).unwrap();
    assert_eq!(docs(&out), vec![2]);
}
