use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use qarma_quantum::collapse::{self, CollapseConfig, EvaluateFn, MultidimCriteria, TemporalHistory};
use qarma_quantum::CollapseStrategy;
use std::sync::Arc;

const RESULTS: usize = 64;

fn values() -> Vec<i64> {
    let mut rng = fastrand::Rng::with_seed(7);
    (0..RESULTS).map(|_| rng.i64(0..1000)).collect()
}

fn config() -> CollapseConfig<i64> {
    let score: EvaluateFn<i64> = Arc::new(|v: &i64| *v);
    let spread: EvaluateFn<i64> = Arc::new(|v: &i64| 1000 - *v);
    CollapseConfig::new()
        .with_evaluate(score.clone())
        .with_combine(Arc::new(|results: &[&i64], out: &mut i64| {
            *out = results.iter().map(|r| **r).sum();
        }))
        .with_multidim(MultidimCriteria {
            quality: Some(score),
            speed: Some(spread),
            resource: None,
            weights: [60, 40, 0],
        })
        .with_temporal(TemporalHistory::new(8, 50))
}

fn bench_strategies(c: &mut Criterion) {
    let values = values();
    let results: Vec<&i64> = values.iter().collect();

    let mut group = c.benchmark_group("collapse");
    for strategy in [
        CollapseStrategy::FirstWins,
        CollapseStrategy::Best,
        CollapseStrategy::Vote,
        CollapseStrategy::Combine,
        CollapseStrategy::Fuzzy,
        CollapseStrategy::Progressive,
        CollapseStrategy::Speculative,
        CollapseStrategy::Multidim,
        CollapseStrategy::Temporal,
    ] {
        group.bench_function(strategy.name(), |b| {
            b.iter_batched(
                config,
                |mut config| {
                    let mut output = 0i64;
                    // Vote has no majority here; only the selection cost matters
                    let _ =
                        collapse::collapse(strategy, black_box(&results), &mut config, &mut output);
                    output
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_strategies);
criterion_main!(benches);
