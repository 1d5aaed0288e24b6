//! Memoria Core Search Benchmarks
//!
//! Benchmarks for term extraction and hybrid search. Run with:
//! cargo bench -p memoria-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use memoria_core::{AddInput, CancellationToken, Engine, Filters};
use memoria_core::terms::{cosine_similarity, TermExtractor};

fn seeded_engine(note_count: usize) -> (Engine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(Some(dir.path().to_path_buf())).unwrap();
    let topics = [
        "Using Rust for the backend service with async Tokio runtime",
        "Preferring React with TypeScript for the frontend dashboard",
        "Writing integration tests against a real Postgres instance",
        "Debugging a flaky CI pipeline caused by a race condition",
        "Refactoring the graph builder to use community detection",
    ];
    for i in 0..note_count {
        engine
            .add(AddInput {
                content: format!("{} (note {i})", topics[i % topics.len()]),
                ..Default::default()
            })
            .unwrap();
    }
    engine.build_graph(&CancellationToken::new()).unwrap();
    (engine, dir)
}

fn bench_tokenize(c: &mut Criterion) {
    let extractor = TermExtractor::default();
    let text = "Refactoring the HybridSearcher to use graph_signal propagation and BM25 keyword scoring";
    c.bench_function("tokenize_mixed_case", |b| {
        b.iter(|| black_box(extractor.tokenize(black_box(text))));
    });
}

fn bench_top_terms_single(c: &mut Criterion) {
    let extractor = TermExtractor::default();
    let text = "Preferring React with TypeScript for the frontend dashboard and Rust for the backend";
    c.bench_function("top_terms_single_k10", |b| {
        b.iter(|| black_box(extractor.top_terms_single(black_box(text), 10)));
    });
}

fn bench_cosine_similarity(c: &mut Criterion) {
    let a: Vec<(String, f64)> = (0..20).map(|i| (format!("term{i}"), (i as f64).sin().abs())).collect();
    let b: Vec<(String, f64)> = (0..20).map(|i| (format!("term{i}"), (i as f64).cos().abs())).collect();
    c.bench_function("cosine_similarity_20_terms", |bench| {
        bench.iter(|| black_box(cosine_similarity(black_box(&a), black_box(&b))));
    });
}

fn bench_hybrid_search_small_corpus(c: &mut Criterion) {
    let (engine, _dir) = seeded_engine(50);
    c.bench_function("hybrid_search_50_notes", |b| {
        b.iter(|| {
            black_box(
                engine
                    .search(black_box("Rust backend service"), 10, 0.0, Filters::default())
                    .unwrap(),
            )
        });
    });
}

fn bench_hybrid_search_repeated_query_cache_hit(c: &mut Criterion) {
    let (engine, _dir) = seeded_engine(50);
    engine.search("Rust backend", 10, 0.0, Filters::default()).unwrap();
    c.bench_function("hybrid_search_cache_hit", |b| {
        b.iter(|| black_box(engine.search(black_box("Rust backend"), 10, 0.0, Filters::default()).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_tokenize,
    bench_top_terms_single,
    bench_cosine_similarity,
    bench_hybrid_search_small_corpus,
    bench_hybrid_search_repeated_query_cache_hit,
);
criterion_main!(benches);
