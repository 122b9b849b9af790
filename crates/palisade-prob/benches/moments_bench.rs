use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use palisade_ir::{Polynomial, VarId};
use palisade_prob::{expectation, NoiseDistribution};

const X1: VarId = VarId(0);
const X2: VarId = VarId(1);
const S1: VarId = VarId(2);
const S2: VarId = VarId(3);

/// `B(f(x, ς))` for a dense degree-6 template in two states and a linear
/// noisy update.
fn composed_template() -> Polynomial {
    let mut barrier = Polynomial::zero();
    for i in 0..=6u32 {
        for j in 0..=(6 - i) {
            let term = Polynomial::var(X1).pow(i) * Polynomial::var(X2).pow(j);
            barrier = barrier + term.scale(1.0 / (1 + i + j) as f64);
        }
    }
    let mut update = BTreeMap::new();
    update.insert(
        X1,
        Polynomial::var(X1).scale(0.9) + Polynomial::var(X2).scale(0.1) + Polynomial::var(S1),
    );
    update.insert(
        X2,
        Polynomial::var(X2).scale(0.8) + Polynomial::var(S2).scale(0.5),
    );
    barrier.compose(&update)
}

fn bench_normal(c: &mut Criterion) {
    let poly = composed_template();
    let dist = NoiseDistribution::Normal {
        sigma: vec![0.1, 0.2],
    };
    c.bench_function("expectation_normal_deg6", |b| {
        b.iter(|| expectation(black_box(&poly), &[S1, S2], &dist).unwrap())
    });
}

fn bench_uniform(c: &mut Criterion) {
    let poly = composed_template();
    let dist = NoiseDistribution::Uniform {
        lower: vec![-0.5, -0.5],
        upper: vec![0.5, 0.5],
    };
    c.bench_function("expectation_uniform_deg6", |b| {
        b.iter(|| expectation(black_box(&poly), &[S1, S2], &dist).unwrap())
    });
}

criterion_group!(benches, bench_normal, bench_uniform);
criterion_main!(benches);
