use criterion::{black_box, criterion_group, criterion_main, Criterion};
use estimators::ml::classic::multinomial_logit::{
    log_likelihood_gradient, negative_log_likelihood_hessian,
};
use estimators::ml::classic::{
    accuracy_sweep, kmeans, log_likelihood, simulate_conjoint, synthetic_boundary_dataset,
    ConjointEncoder, KMeansConfig, KnnSweepConfig, SimulationConfig,
};
use estimators::seeded_rng;
use rand::Rng;

fn bench_kmeans(c: &mut Criterion) {
    let mut group = c.benchmark_group("kmeans");

    let mut rng = seeded_rng(Some(42));
    let data: Vec<Vec<f64>> = (0..1000)
        .map(|_| (0..8).map(|_| rng.gen::<f64>()).collect())
        .collect();

    group.bench_function("n1000_d8_k5", |b| {
        b.iter(|| {
            let config = KMeansConfig::new(5).with_max_iterations(10).with_seed(42);
            kmeans(black_box(&data), &config).unwrap();
        })
    });

    group.finish();
}

fn bench_knn_sweep(c: &mut Criterion) {
    let (train_x, train_y) = synthetic_boundary_dataset(100, &mut seeded_rng(Some(42)));
    let (test_x, test_y) = synthetic_boundary_dataset(100, &mut seeded_rng(Some(20)));

    c.bench_function("knn_accuracy_sweep_k30", |b| {
        b.iter(|| {
            accuracy_sweep(
                black_box(&train_x),
                &train_y,
                &test_x,
                &test_y,
                &KnnSweepConfig::default(),
            )
            .unwrap();
        })
    });
}

fn bench_mnl(c: &mut Criterion) {
    let mut group = c.benchmark_group("mnl");

    let rows = simulate_conjoint(&SimulationConfig::default(), &mut seeded_rng(Some(123))).unwrap();
    let table = ConjointEncoder::fit(&rows).unwrap().encode(&rows).unwrap();
    let beta = [1.0, 0.5, -0.8, -0.1];

    group.bench_function("log_likelihood", |b| {
        b.iter(|| log_likelihood(black_box(&table), black_box(&beta)).unwrap())
    });
    group.bench_function("gradient", |b| {
        b.iter(|| log_likelihood_gradient(black_box(&table), black_box(&beta)).unwrap())
    });
    group.bench_function("hessian", |b| {
        b.iter(|| negative_log_likelihood_hessian(black_box(&table), black_box(&beta)).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_kmeans, bench_knn_sweep, bench_mnl);
criterion_main!(benches);
