#[macro_use]
extern crate criterion;

use cairn::{Rule, Session, SessionConfig, Store};
use criterion::{BenchmarkId, Criterion};

criterion::criterion_group!(core, fib_cold, fib_warm_cache, fanout_tree);
criterion::criterion_main!(core);

fn fib_rule() -> Rule<i64, i64> {
    Rule::new("bench::fib", "v1", |n: i64| {
        Box::pin(async move {
            if n < 2 {
                return Ok(n);
            }
            let a = fib_rule().call(n - 1).await?;
            let b = fib_rule().call(n - 2).await?;
            Ok(a + b)
        })
    })
}

fn tree_rule() -> Rule<i64, i64> {
    Rule::new("bench::tree", "v1", |n: i64| {
        Box::pin(async move {
            if n == 0 {
                return Ok(1);
            }
            let left = tree_rule().call(n - 1);
            let right = tree_rule().call(n - 1);
            Ok(left.await? + right.await?)
        })
    })
}

/// A fresh in-memory session per iteration, so every `fib(n)` body runs for
/// real — the cost of scheduling and fingerprinting with nothing cached.
fn fib_cold(c: &mut Criterion) {
    let mut group = c.benchmark_group("fib_cold");
    for n in &[5, 10, 15] {
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, &n| {
            b.iter(|| {
                let session = Session::open(SessionConfig::default()).unwrap();
                session.run(|| fib_rule().call(n)).unwrap()
            });
        });
    }
    group.finish();
}

/// One session warms a store by computing `fib(20)` once; every iteration
/// after that re-demands it against the already-populated store, measuring
/// pure claim-check overhead with no rule body ever running again.
fn fib_warm_cache(c: &mut Criterion) {
    let store = Store::open_in_memory().unwrap();
    let warm = Session::open_with_store(SessionConfig::default(), store.clone()).unwrap();
    warm.run(|| fib_rule().call(20)).unwrap();
    drop(warm);

    c.bench_function("fib_warm_cache/20", |b| {
        b.iter(|| {
            let session = Session::open_with_store(SessionConfig::default(), store.clone()).unwrap();
            session.run(|| fib_rule().call(20)).unwrap()
        });
    });
}

/// `tree(n)` collapses `2^n` logical calls onto `n + 1` tasks by fingerprint;
/// this tracks how scheduling overhead scales with graph width rather than
/// wall-clock work per task.
fn fanout_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout_tree");
    for n in &[4, 8, 12] {
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, &n| {
            b.iter(|| {
                let session = Session::open(SessionConfig::default()).unwrap();
                session.run(|| tree_rule().call(n)).unwrap()
            });
        });
    }
    group.finish();
}
