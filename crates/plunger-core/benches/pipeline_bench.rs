use criterion::{Criterion, black_box, criterion_group, criterion_main};
use plunger_core::pipeline::collate;
use plunger_core::{FEATURE_CHANNELS, SequencePair, TARGET_CHANNELS};

fn sequence(len: usize) -> SequencePair {
    SequencePair {
        features: vec![1.0; len * FEATURE_CHANNELS],
        targets: vec![1.0; len * TARGET_CHANNELS],
        len,
    }
}

fn bench_collate(c: &mut Criterion) {
    let pair = vec![sequence(1_440), sequence(2_880)];

    c.bench_function("collate_batch_2", |b| {
        b.iter(|| collate(black_box(pair.clone())).unwrap());
    });

    let wide: Vec<SequencePair> = (0..16).map(|i| sequence(500 + i * 100)).collect();
    c.bench_function("collate_batch_16", |b| {
        b.iter(|| collate(black_box(wide.clone())).unwrap());
    });
}

criterion_group!(benches, bench_collate);
criterion_main!(benches);
