use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Runtime;
use turnstile::{
    AdmissionGuard, BucketState, MemoryStore, RateLimiter, RatePolicy, RequestContext, TokenBucket,
};

fn benchmark_bucket_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucket_engine");
    group.throughput(Throughput::Elements(1));

    group.bench_function("fresh_bucket", |b| {
        let bucket = TokenBucket::new(10.0, 100);

        b.iter(|| black_box(bucket.evaluate(black_box(None), black_box(1_000.0), black_box(1))));
    });

    group.bench_function("refill_and_consume", |b| {
        let bucket = TokenBucket::new(10.0, 100);
        let mut state = BucketState::full(100);
        let mut now = 0.0;

        b.iter(|| {
            now += 0.05;
            let evaluation = bucket.evaluate(black_box(Some(state)), black_box(now), black_box(1));
            state = evaluation.state;
            black_box(evaluation.allowed)
        });
    });

    group.finish();
}

fn benchmark_memory_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_limiter");
    group.throughput(Throughput::Elements(1));
    group.measurement_time(Duration::from_secs(10));

    let runtime = Runtime::new().unwrap();

    group.bench_function("single_key", |b| {
        let limiter = RateLimiter::new(MemoryStore::new());

        b.to_async(&runtime).iter(|| async {
            black_box(
                limiter
                    .allow_at(
                        black_box("rl:bench:single"),
                        black_box(1000.0), // rate
                        black_box(10000),  // capacity
                        black_box(1),      // requested
                        black_box(SystemTime::now()),
                    )
                    .await,
            )
        });
    });

    // Test with growing number of unique keys
    for num_keys in [10u64, 1000, 10000] {
        group.bench_with_input(
            format!("unique_keys_{num_keys}"),
            &num_keys,
            |b, &num_keys| {
                let limiter = RateLimiter::new(
                    MemoryStore::builder()
                        .capacity(num_keys as usize)
                        .build(),
                );
                let mut counter = 0u64;

                b.to_async(&runtime).iter(|| {
                    let key = format!("rl:bench:{}", counter % num_keys);
                    counter += 1;
                    let limiter = &limiter;

                    async move {
                        black_box(
                            limiter
                                .allow_at(&key, 10.0, 100, 1, SystemTime::now())
                                .await,
                        )
                    }
                });
            },
        );
    }

    group.finish();
}

fn benchmark_admission_guard(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission_guard");
    group.throughput(Throughput::Elements(1));

    let runtime = Runtime::new().unwrap();

    group.bench_function("login_by_addr", |b| {
        let limiter = Arc::new(RateLimiter::new(MemoryStore::new()));
        let guard = AdmissionGuard::new(
            RatePolicy::per_minute("auth:login", 600_000, 1_000).unwrap(),
            limiter,
        );
        let ctx = RequestContext::new().with_addr("198.51.100.4".parse().unwrap());

        b.to_async(&runtime)
            .iter(|| async { black_box(guard.admit(black_box(&ctx)).await.is_ok()) });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_bucket_engine,
    benchmark_memory_limiter,
    benchmark_admission_guard
);
criterion_main!(benches);
