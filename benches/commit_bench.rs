use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::TempDir;

use termdex::codec::PositionLayout;
use termdex::{
    Combiner, DocumentRef, IndexSettings, IndexStore, Operator, Position, QueryExpr, StoreConfig,
    TermMap, TermOccurrences,
};

const VOCABULARY: &[&str] = &[
    "rust", "borrow", "checker", "lifetime", "trait", "cargo", "crate", "macro", "async",
    "future", "tokio", "serde", "vector", "slice", "string", "option", "result", "error",
];

fn settings() -> IndexSettings {
    IndexSettings::new("bench")
        .with_positions(PositionLayout::ElementWord)
        .with_term_ids()
}

fn document(id: u64) -> TermMap {
    let mut terms = TermMap::new();
    for word in 0..24u32 {
        let term = VOCABULARY[((id as usize) * 7 + word as usize * 3) % VOCABULARY.len()];
        let entry = terms
            .entry(term.to_string())
            .or_insert_with(TermOccurrences::default);
        entry.positions.push(Position::new(word / 8, word % 8));
        entry.occurrences += 1;
    }
    terms
}

fn index_documents(store: &IndexStore, settings: &IndexSettings, count: u64) {
    store.begin_indexing(settings, None).unwrap();
    for id in 1..=count {
        store
            .store_terms(settings, &document(id), DocumentRef::new(id, 0))
            .unwrap();
    }
    store.commit_indexing(settings).unwrap();
}

fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");
    group.sample_size(10);
    for count in [500u64, 2_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let tmp = TempDir::new().unwrap();
                let store = IndexStore::open(StoreConfig::new(tmp.path())).unwrap();
                index_documents(&store, &settings(), count);
                black_box(store.fetch_index_metadata("bench").unwrap());
            });
        });
    }
    group.finish();
}

fn bench_combine(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::open(StoreConfig::new(tmp.path())).unwrap();
    let settings = settings();
    index_documents(&store, &settings, 2_000);

    let rust = store.construct_result_set(&settings, "rust", 1).unwrap();
    let borrow = store.construct_result_set(&settings, "borrow", 1).unwrap();

    let mut group = c.benchmark_group("combine");
    for (name, op) in [
        ("and", Operator::And),
        ("or", Operator::Or),
        ("prox", Operator::from_name("prox").unwrap()),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let out = Combiner::new()
                    .combine(vec![rust.clone().into(), borrow.clone().into()], &op, None)
                    .unwrap();
                black_box(out.len());
            });
        });
    }
    group.bench_function("resolve_phrase", |b| {
        let expr = QueryExpr::clause(
            "adj",
            QueryExpr::term("bench", "borrow"),
            QueryExpr::term("bench", "checker"),
        );
        b.iter(|| {
            let clause = expr.resolve(&store, std::slice::from_ref(&settings)).unwrap();
            black_box(Combiner::new().evaluate(clause).unwrap().len());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_commit, bench_combine);
criterion_main!(benches);
