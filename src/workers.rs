//! Multi-worker helper gated behind the `worker-pool` feature: runs several
//! independent [`Session`]s against one shared [`Store`], each on its own
//! thread of a [`futures::executor::ThreadPool`]. Workers never share a
//! graph — they coordinate only through the store's claim protocol, so
//! two workers racing to compute the same fingerprint still never both run
//! its body.

use std::sync::Arc;

use futures::executor::ThreadPool;

use crate::{Error, Result, Session, SessionConfig, Store};

/// Opens `worker_count` sessions against `store`, each with a distinct
/// worker id, and runs `job` on each from its own pool thread. Blocks
/// until every worker has returned.
///
/// A worker's `Error` never leaves the thread it occurred on — `Error`
/// wraps dependency failures in an `Rc`, which isn't `Send`, the same
/// reason a session itself isn't. Failures are reported back rendered as
/// strings instead.
pub fn run_workers<F>(store: Store, worker_count: usize, job: F) -> Result<Vec<std::result::Result<(), String>>>
where
    F: Fn(&Session) -> Result<()> + Send + Sync + 'static,
{
    let pool = ThreadPool::new()
        .map_err(|e| Error::PluginError { plugin: "worker-pool", event: "spawn", message: e.to_string() })?;
    let job = Arc::new(job);
    let (tx, rx) = std::sync::mpsc::channel();

    for worker_index in 0..worker_count {
        let store = store.clone();
        let job = job.clone();
        let tx = tx.clone();
        pool.spawn_ok(async move {
            let config = SessionConfig::builder().worker_id(format!("worker-{worker_index}")).build();
            let outcome =
                Session::open_with_store(config, store).and_then(|session| job(&session)).map_err(|e| e.to_string());
            let _ = tx.send(outcome);
        });
    }
    drop(tx);

    Ok(rx.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Rule;

    #[test]
    fn independent_workers_share_one_cache() {
        let store = Store::open_in_memory().unwrap();

        // Each worker thread builds its own `Rule` — a `Rule` is `Rc`-backed
        // and so can't cross threads itself, but two `Rule`s with the same
        // id and body still fingerprint identically and share the cache.
        let results = run_workers(store, 3, |session| {
            let echo = Rule::new("workers::echo", "v1", |n: i64| Box::pin(async move { Ok(n) }));
            let value = session.run(|| echo.call(7))?;
            assert_eq!(value, 7);
            Ok(())
        })
        .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_ok()));
    }
}
