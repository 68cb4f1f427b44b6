use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use pilum::document::Document;
use pilum::segment::{MemorySegment, SegmentMerger};
use pilum::storage::MemoryStorage;
use std::hint::black_box;

const WORDS: &[&str] = &[
    "merge", "segment", "document", "field", "term", "posting", "norm",
    "vector", "storage", "index", "record", "offset", "delta", "queue",
];

/// Stage a segment of `count` documents with stored fields and postings.
fn staged_segment(count: u32, seed: u32) -> MemorySegment {
    let mut segment = MemorySegment::new();
    segment
        .schema_mut()
        .add("body", true, false, false, false, false, false, false);
    for i in 0..count {
        let tokens: Vec<&str> = (0..8)
            .map(|j| WORDS[((seed + i * 7 + j) as usize) % WORDS.len()])
            .collect();
        let mut doc = Document::new();
        doc.add_text("body", tokens.join(" "));
        segment.add_document(doc);
        for (position, token) in tokens.iter().enumerate() {
            segment.add_posting("body", token.as_bytes(), i, &[position as u32]);
        }
        segment.set_norm("body", i, tokens.len() as u8);
    }
    segment
}

fn bench_merge(c: &mut Criterion) {
    let a = staged_segment(1000, 1);
    let b = staged_segment(1000, 5);

    let mut group = c.benchmark_group("merge");
    group.throughput(Throughput::Elements(2000));

    group.bench_function("two_segments_1000_docs", |bench| {
        bench.iter(|| {
            let storage = MemoryStorage::new_default();
            let mut merger = SegmentMerger::new(&storage, "bench");
            merger.add_reader(&a);
            merger.add_reader(&b);
            black_box(merger.merge(true).unwrap());
        })
    });

    let mut deleted = staged_segment(1000, 3);
    for doc in (0..1000).step_by(3) {
        deleted.delete_document(doc);
    }
    group.bench_function("two_segments_with_deletions", |bench| {
        bench.iter(|| {
            let storage = MemoryStorage::new_default();
            let mut merger = SegmentMerger::new(&storage, "bench");
            merger.add_reader(&deleted);
            merger.add_reader(&b);
            black_box(merger.merge(true).unwrap());
        })
    });

    group.finish();
}

criterion_group!(benches, bench_merge);
criterion_main!(benches);
