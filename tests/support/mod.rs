//! Shared rule definitions used across the integration test suite. Each
//! rule is rebuilt fresh by its constructor function rather than shared as
//! a value, since a `Rule` is `Rc`-backed and two `Rule`s with the same id
//! and body fingerprint identically regardless of which `Rc` produced
//! them.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use cairn::{Error, Rule, TaskHandle};

/// `fib(n) = if n < 2 { n } else { total(fib(n-1), fib(n-2)) }`
pub fn fib_rule() -> Rule<i64, i64> {
    Rule::new("test::fib", "v1", |n: i64| {
        Box::pin(async move {
            if n < 2 {
                return Ok(n);
            }
            let a = fib_rule().call(n - 1);
            let b = fib_rule().call(n - 2);
            total_rule().call(vec![a, b]).await
        })
    })
}

/// `total(xs) = sum(xs)` — takes its dependencies as embedded futures in
/// its own argument composite, rather than awaiting them as side tasks.
pub fn total_rule() -> Rule<Vec<TaskHandle<i64>>, i64> {
    Rule::new("test::total", "v1", |handles: Vec<TaskHandle<i64>>| {
        Box::pin(async move {
            let mut total = 0i64;
            for h in handles {
                total += h.await?;
            }
            Ok(total)
        })
    })
}

/// `tree(n) = if n == 0 { 1 } else { tree(n-1) + tree(n-1) }` — calls the
/// same dependency twice with identical arguments as plain (not
/// rule-wrapped) side tasks, so both calls collapse onto one task by
/// fingerprint instead of branching into `2^n` tasks.
pub fn tree_rule() -> Rule<i64, i64> {
    Rule::new("test::tree", "v1", |n: i64| {
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

/// Always fails.
pub fn boom_rule() -> Rule<(), i64> {
    Rule::new("test::boom", "v1", |_: ()| {
        Box::pin(async move {
            Err::<i64, Error>(Error::RuleFailure { rule: "test::boom", message: "boom".to_string() })
        })
    })
}

/// `use() = boom() + 1` — demands a dependency that always fails.
pub fn use_rule() -> Rule<(), i64> {
    Rule::new("test::use", "v1", |_: ()| {
        Box::pin(async move {
            let v = boom_rule().call(()).await?;
            Ok(v + 1)
        })
    })
}

/// A rule whose body records one execution per distinct input before
/// returning `n * 2` — `fib`/`tree` already exercise dedup within a single
/// session; this isolates the cross-session, cross-worker case where the
/// only shared state is the persistent cache.
pub fn counting_rule(counts: Arc<Mutex<HashMap<i64, u32>>>) -> Rule<i64, i64> {
    Rule::new("test::counted", "v1", move |n: i64| {
        let counts = counts.clone();
        Box::pin(async move {
            *counts.lock().unwrap().entry(n).or_insert(0) += 1;
            Ok(n * 2)
        })
    })
}

/// Like `fib`, but records one execution per distinct `n` in `counts` —
/// used to check that two concurrent worker sessions racing the same
/// cache never both run the body for the same fingerprint.
pub fn counted_fib_rule(counts: Arc<Mutex<HashMap<i64, u32>>>) -> Rule<i64, i64> {
    Rule::new("test::counted_fib", "v1", move |n: i64| {
        let counts = counts.clone();
        Box::pin(async move {
            *counts.lock().unwrap().entry(n).or_insert(0) += 1;
            if n < 2 {
                return Ok(n);
            }
            let a = counted_fib_rule(counts.clone()).call(n - 1);
            let b = counted_fib_rule(counts.clone()).call(n - 2);
            total_rule().call(vec![a, b]).await
        })
    })
}

