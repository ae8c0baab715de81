// Throughput of training and encoding on a synthetic corpus shaped like
// tokenized music: short repeating motifs drawn from a small alphabet.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use scoretok_bpe::{CompressionModel, ModelKind, Symbol};

const ALPHABET: usize = 200;

fn synthetic_corpus(sequences: usize, len: usize) -> Vec<Vec<Symbol>> {
    // Deterministic LCG so runs are comparable.
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 33) as u32
    };
    (0..sequences)
        .map(|_| {
            let motif: Vec<Symbol> = (0..8).map(|_| next() % ALPHABET as u32).collect();
            (0..len)
                .map(|i| {
                    if next() % 4 == 0 {
                        next() % ALPHABET as u32
                    } else {
                        motif[i % motif.len()]
                    }
                })
                .collect()
        })
        .collect()
}

fn alphabet() -> Vec<char> {
    (0..ALPHABET as u32)
        .filter_map(|i| char::from_u32(i + 33))
        .collect()
}

fn bench_train(c: &mut Criterion) {
    let corpus = synthetic_corpus(200, 256);
    let mut group = c.benchmark_group("train");
    for kind in [ModelKind::Bpe, ModelKind::Unigram] {
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, &kind| {
            b.iter(|| {
                let mut model = CompressionModel::new(kind, alphabet()).unwrap();
                model.train_ids(black_box(&corpus), ALPHABET + 300).unwrap();
                model
            })
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let corpus = synthetic_corpus(200, 256);
    let mut group = c.benchmark_group("encode");
    for kind in [ModelKind::Bpe, ModelKind::Unigram] {
        let mut model = CompressionModel::new(kind, alphabet()).unwrap();
        model.train_ids(&corpus, ALPHABET + 300).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(kind), &model, |b, model| {
            b.iter(|| model.encode_batch(black_box(&corpus)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_train, bench_encode);
criterion_main!(benches);
