mod support;

use std::{
    cell::RefCell,
    collections::HashMap,
    sync::{Arc, Mutex},
    thread,
};

use cairn::{
    builtin::{RecordedEvent, RecordingPlugin},
    Error, Session, SessionConfig, Store,
};

use support::{boom_rule, counted_fib_rule, counting_rule, fib_rule, tree_rule, use_rule};

fn session() -> Session {
    Session::open(SessionConfig::default()).unwrap()
}

fn rule_created_count(events: &[RecordedEvent], rule_name: &str) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, RecordedEvent::TaskCreated(_, rule) if rule.name == rule_name))
        .count()
}

/// S1: `fib(5)` resolves to 5, creating exactly 6 `fib` tasks (n = 0..=5)
/// and 4 `total` tasks, every call having been deduplicated by fingerprint.
#[test]
fn s1_fibonacci_is_memoised_and_correct() {
    let session = session();
    let recorder = RecordingPlugin::new();
    session.register_plugin(recorder.clone());

    let result = session.run(|| fib_rule().call(5)).unwrap();
    assert_eq!(result, 5);

    let events = recorder.events();
    assert_eq!(rule_created_count(&events, "test::fib"), 6);
    assert_eq!(rule_created_count(&events, "test::total"), 4);
}

/// S2: persistence — a fresh session against the same cache resolves
/// `fib(5)` without running any rule body.
#[test]
fn s2_persisted_result_skips_every_body() {
    let store = Store::open_in_memory().unwrap();
    let counts: Arc<Mutex<HashMap<i64, u32>>> = Arc::new(Mutex::new(HashMap::new()));

    let first = Session::open_with_store(SessionConfig::default(), store.clone()).unwrap();
    let counts_for_first = counts.clone();
    assert_eq!(first.run(|| counted_fib_rule(counts_for_first).call(5)).unwrap(), 5);
    drop(first);

    let executed_after_first_run = counts.lock().unwrap().len();
    assert_eq!(executed_after_first_run, 6, "n = 0..=5 each run exactly once");

    let second = Session::open_with_store(SessionConfig::default(), store).unwrap();
    let counts_for_second = counts.clone();
    assert_eq!(second.run(|| counted_fib_rule(counts_for_second).call(5)).unwrap(), 5);

    assert_eq!(counts.lock().unwrap().len(), executed_after_first_run, "no new body ran on re-demand");
}

/// Closing a session that never ran anything leaves the cache untouched;
/// a later session against the same store still produces the full result.
/// (The literal "close mid-flight" scenario isn't reachable through this
/// API: `Session::run` always drives a demand to completion or error, so
/// there is no handle to a session with tasks still pending to close.)
#[test]
fn s3_closing_an_idle_session_does_not_corrupt_the_cache() {
    let store = Store::open_in_memory().unwrap();

    let idle = Session::open_with_store(SessionConfig::default(), store.clone()).unwrap();
    idle.close().unwrap();

    let session = Session::open_with_store(SessionConfig::default(), store).unwrap();
    assert_eq!(session.run(|| fib_rule().call(5)).unwrap(), 5);
}

/// S4: two worker sessions simultaneously demanding `fib(20)` against the
/// same cache execute the body for each `k` in `0..=20` exactly once in
/// total, across both workers.
#[test]
fn s4_concurrent_workers_execute_each_fingerprint_once() {
    let store = Store::open_in_memory().unwrap();
    let counts: Arc<Mutex<HashMap<i64, u32>>> = Arc::new(Mutex::new(HashMap::new()));

    let workers: Vec<_> = ["w1", "w2"]
        .into_iter()
        .map(|worker_id| {
            let store = store.clone();
            let counts = counts.clone();
            thread::spawn(move || {
                let config = SessionConfig::builder().worker_id(worker_id).build();
                let session = Session::open_with_store(config, store).unwrap();
                session.run(|| counted_fib_rule(counts).call(20)).unwrap()
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), 6765, "fib(20) == 6765");
    }

    let counts = counts.lock().unwrap();
    for k in 0..=20 {
        assert_eq!(counts.get(&k).copied().unwrap_or(0), 1, "fib({k}) body ran more than once");
    }
}

/// S5: an error in a dependency surfaces at the root wrapped as
/// `dependency-failed`, preserving the original failure.
#[test]
fn s5_dependency_error_propagates_to_the_root() {
    let session = session();
    let err = session.run(|| use_rule().call(())).unwrap_err();

    match err {
        Error::DependencyFailed(inner) => match &*inner {
            Error::RuleFailure { rule, .. } => assert_eq!(*rule, "test::boom"),
            other => panic!("expected the wrapped error to be a rule failure, got {other:?}"),
        },
        other => panic!("expected DependencyFailed, got {other:?}"),
    }
}

/// A direct demand for the failing rule surfaces the rule failure itself,
/// unwrapped.
#[test]
fn boom_called_directly_surfaces_rule_failure() {
    let session = session();
    let err = session.run(|| boom_rule().call(())).unwrap_err();
    assert!(matches!(err, Error::RuleFailure { rule: "test::boom", .. }));
}

/// S6: `tree(5)` creates exactly 6 distinct tasks, not `2^5`, because both
/// recursive calls at each level share a fingerprint.
#[test]
fn s6_dynamic_graph_collapses_shared_subtrees() {
    let session = session();
    let recorder = RecordingPlugin::new();
    session.register_plugin(recorder.clone());

    assert_eq!(session.run(|| tree_rule().call(5)).unwrap(), 32);

    let events = recorder.events();
    assert_eq!(rule_created_count(&events, "test::tree"), 6);
}

/// Property: idempotent re-demand within the same session — calling the
/// same rule with the same arguments twice returns the same task (shares a
/// fingerprint) and runs the body only once.
#[test]
fn idempotent_redemand_within_one_session() {
    let session = session();
    let counts: Arc<Mutex<HashMap<i64, u32>>> = Arc::new(Mutex::new(HashMap::new()));
    let fingerprints = RefCell::new(None);

    let value = session
        .run(|| {
            let a = counting_rule(counts.clone()).call(7);
            let b = counting_rule(counts.clone()).call(7);
            *fingerprints.borrow_mut() = Some((a.fingerprint(), b.fingerprint()));
            a
        })
        .unwrap();

    assert_eq!(value, 14);
    let (fp_a, fp_b) = fingerprints.into_inner().unwrap();
    assert_eq!(fp_a, fp_b);
    assert_eq!(*counts.lock().unwrap().get(&7).unwrap(), 1);
}

/// Property: a future with zero children is created Ready, so a rule
/// taking no embedded futures in its arguments runs on the very first
/// scheduling pass — `task-ready` immediately follows `task-created`.
#[test]
fn zero_child_task_starts_ready() {
    let session = session();
    let recorder = RecordingPlugin::new();
    session.register_plugin(recorder.clone());

    session.run(|| counting_rule(Arc::new(Mutex::new(HashMap::new()))).call(1)).unwrap();

    let events = recorder.events();
    let created_at = events.iter().position(|e| matches!(e, RecordedEvent::TaskCreated(..))).unwrap();
    let ready_at = events.iter().position(|e| matches!(e, RecordedEvent::TaskReady(_))).unwrap();
    assert_eq!(ready_at, created_at + 1, "task-ready should immediately follow task-created for a leaf task");
}

/// Boundary: an empty-composite argument fingerprints stably and doesn't
/// change between calls.
#[test]
fn empty_composite_fingerprint_is_stable() {
    use cairn_hash::{fingerprint, HashedValue};

    let empty = HashedValue::Seq(Vec::new());
    assert_eq!(fingerprint(&empty).unwrap(), fingerprint(&empty).unwrap());
}
