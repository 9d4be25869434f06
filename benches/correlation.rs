use std::hint::black_box;
use criterion::{criterion_group, criterion_main, Criterion};
use cliprest::{
    correlation_matrix, join_and_correlate, masked_accuracy, zscore_columns, LabeledMatrix, LstmClassifier,
    PaddedSequenceBatch,
};
use ndarray::{Array2, Array3};

/// Deterministic pseudo-random fill, no RNG state needed.
fn fill(rows: usize, cols: usize, salt: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |(i, j)| (((i * 31 + j * 17 + salt) as f64) * 0.618).sin())
}

fn bench_zscore_correlate(c: &mut Criterion) {
    // one 19-TR window over 300 parcels
    let data = fill(19, 300, 1);
    let names: Vec<String> = (0..300).map(|i| format!("p{i}")).collect();
    c.bench_function("zscore + correlation [19×300]", |b| {
        b.iter(|| {
            let z = zscore_columns(black_box(&data), &names).unwrap();
            black_box(correlation_matrix(&z))
        })
    });
}

fn bench_join(c: &mut Criterion) {
    // activation vectors of 14 clips + 14 rest segments, 100 parcels
    let pairs = 100 * 99 / 2;
    let rows: Vec<String> = (0..pairs).map(|i| i.to_string()).collect();
    let cols = |prefix: &str| (0..14).map(|i| format!("{prefix}{i}")).collect::<Vec<_>>();
    let a = LabeledMatrix::new(rows.clone(), cols("c"), fill(pairs, 14, 2)).unwrap();
    let r = LabeledMatrix::new(rows, cols("r"), fill(pairs, 14, 3)).unwrap();
    c.bench_function("join_and_correlate [4950 × (14+14)]", |b| {
        b.iter(|| black_box(join_and_correlate(black_box(&a), black_box(&r)).unwrap()))
    });
}

fn bench_score(c: &mut Criterion) {
    let (n, t, f, k) = (32, 10, 300, 15);
    let features = Array3::from_shape_fn((n, t, f), |(a, b, c)| (((a * 7 + b * 3 + c) as f32) * 0.1).cos());
    let labels = Array2::from_shape_fn((n, t), |(a, _)| (a % k) as i64);
    let subjects = (0..n).map(|a| format!("s{}", a / 16)).collect();
    let batch = PaddedSequenceBatch::new(features, vec![t; n], labels, subjects).unwrap();
    let model = LstmClassifier::new(f, 150, 1, k, 330).unwrap();
    let clip_time = vec![t; k];
    c.bench_function("masked_accuracy [32×10×300, H=150]", |b| {
        b.iter(|| black_box(masked_accuracy(&model, black_box(&batch), t, &clip_time, 2).unwrap()))
    });
}

criterion_group!(benches, bench_zscore_correlate, bench_join, bench_score);
criterion_main!(benches);
