//! The session: opens as the ambient context for rule calls, drives the
//! cooperative scheduler, dispatches plugin events, and bridges the graph
//! to the persistent cache.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use cairn_hash::{Canonical, Hash, HashedValue};
use cairn_store::{ClaimOutcome, Store};
use futures::{
    executor::{LocalPool, LocalSpawner},
    task::LocalSpawnExt,
};
use tracing::{debug, instrument, trace, warn};

use crate::{
    config::SessionConfig,
    error::{Error, Result},
    future::{FutureInner, FutureState, RawAwait, TaskHandle},
    graph::Graph,
    plugin::Plugin,
    rule::{BoxFuture, RuleId},
};

/// The value offered into the ambient environment for the duration of one
/// [`Session::run`] call. A thin wrapper rather than offering `Rc<SessionCore>`
/// directly so its `TypeId` can't collide with an unrelated ambient use of
/// the same underlying type.
struct SessionMarker(Rc<SessionCore>);

struct PendingExec {
    rule: RuleId,
    input_hash: Hash,
    run: Box<dyn FnOnce() -> BoxFuture<'static, Result<HashedValue>>>,
}

struct SessionCore {
    graph: RefCell<Graph>,
    pending: RefCell<HashMap<Hash, PendingExec>>,
    running_stack: RefCell<Vec<Hash>>,
    store: Option<Store>,
    config: SessionConfig,
    plugins: RefCell<Vec<Box<dyn Plugin>>>,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
    /// The first error a plugin raised from a context that can't itself
    /// return a `Result` (a task body runs detached on the executor). Once
    /// set, `drive` aborts the session with it at its next check instead of
    /// continuing to spawn and run tasks.
    poisoned: RefCell<Option<Error>>,
}

impl SessionCore {
    fn dispatch(&self, event: &'static str, mut f: impl FnMut(&mut dyn Plugin) -> crate::plugin::PluginResult) -> Result<()> {
        for plugin in self.plugins.borrow_mut().iter_mut() {
            if let Err(source) = f(plugin.as_mut()) {
                return Err(Error::PluginError { plugin: "plugin", event, message: source.to_string() });
            }
        }
        Ok(())
    }

    /// As [`dispatch`](Self::dispatch), for call sites with no `Result` to
    /// return the failure through. Records the first such failure as a
    /// poison rather than silently dropping it.
    fn dispatch_or_poison(&self, event: &'static str, f: impl FnMut(&mut dyn Plugin) -> crate::plugin::PluginResult) {
        if let Err(e) = self.dispatch(event, f) {
            self.poisoned.borrow_mut().get_or_insert(e);
        }
    }
}

/// The engine: captures task creation during rule evaluation, resolves
/// dependencies lazily, schedules cooperative execution, and coordinates
/// with the persistent cache. Not `Send`/`Sync` — it owns an `Rc`-based
/// graph and drives a single-threaded executor; run several independent
/// `Session`s (one per OS thread) against the same cache file for
/// multi-worker parallelism.
pub struct Session {
    core: Rc<SessionCore>,
    closed: Cell<bool>,
}

impl Session {
    /// Opens a session with no persistent cache: tasks are deduplicated for
    /// the lifetime of this session only, nothing survives a restart.
    pub fn open(config: SessionConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Opens a session backed by a durable cache, enabling memoization
    /// across sessions, restarts, and concurrent workers.
    pub fn open_with_store(config: SessionConfig, store: Store) -> Result<Self> {
        Self::build(config, Some(store))
    }

    fn build(config: SessionConfig, store: Option<Store>) -> Result<Self> {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        let core = Rc::new(SessionCore {
            graph: RefCell::new(Graph::new()),
            pending: RefCell::new(HashMap::new()),
            running_stack: RefCell::new(Vec::new()),
            store,
            config,
            plugins: RefCell::new(Vec::new()),
            pool: RefCell::new(pool),
            spawner,
            poisoned: RefCell::new(None),
        });
        core.dispatch("session-open", |p| p.session_open())?;
        Ok(Self { core, closed: Cell::new(false) })
    }

    /// Installs a plugin for the session's remaining lifetime.
    pub fn register_plugin(&self, plugin: impl Plugin + 'static) {
        self.core.plugins.borrow_mut().push(Box::new(plugin));
    }

    /// Installs this session as the ambient context, calls `root` to
    /// produce the demanded task (a rule call can only happen with an
    /// ambient session in scope, which is why `root` is a thunk rather
    /// than an already-built handle), and drives the graph until it
    /// resolves. Rejects if another session is already open (dynamically
    /// nested) on this thread.
    #[instrument(skip(self, root))]
    pub fn run<T: Canonical>(&self, root: impl FnOnce() -> TaskHandle<T>) -> Result<T> {
        if cairn_context::get::<SessionMarker>().is_ok() {
            return Err(Error::NestedSession);
        }
        let layer = cairn_context::Layer::new().offer(SessionMarker(self.core.clone()));
        layer.enter(|| {
            let handle = root();
            self.drive(&handle)
        })
    }

    fn drive<T: Canonical>(&self, handle: &TaskHandle<T>) -> Result<T> {
        self.core.dispatch("post-enter", |p| p.post_enter())?;

        loop {
            self.spawn_ready()?;
            if let Some(err) = self.core.poisoned.borrow_mut().take() {
                return Err(err);
            }

            if self.core.graph.borrow().running_count() == 0 {
                if handle.state().is_terminal() {
                    break;
                }
                let pending = self.core.graph.borrow().pending_count();
                warn!(pending, "scheduler deadlocked");
                return Err(Error::Deadlock { pending });
            }

            self.core.pool.borrow_mut().run_until_stalled();
            if let Some(err) = self.core.poisoned.borrow_mut().take() {
                return Err(err);
            }

            if handle.state().is_terminal() {
                break;
            }
        }

        self.core.dispatch("pre-exit", |p| p.pre_exit())?;

        match handle.peek().expect("terminal handle always carries a result or error") {
            Ok(value) => T::from_hashed(value).ok_or(Error::TypeMismatch),
            Err(err) => Err((*err).clone()),
        }
    }

    /// Pops every currently-ready fingerprint and spawns its body onto the
    /// local pool. New entries may become ready again once spawned tasks
    /// progress, so the driver calls this once per iteration.
    fn spawn_ready(&self) -> Result<()> {
        while let Some(fingerprint) = self.core.graph.borrow_mut().pop_ready() {
            if self.core.graph.borrow().is_running(&fingerprint) {
                continue;
            }
            let Some(exec) = self.core.pending.borrow_mut().remove(&fingerprint) else {
                continue;
            };
            self.core.graph.borrow_mut().mark_running(fingerprint);
            self.core.dispatch("task-run-start", |p| p.task_run_start(fingerprint))?;

            let core = self.core.clone();
            let future = async move { run_task(core, fingerprint, exec).await };
            self.core
                .spawner
                .spawn_local(future)
                .map_err(|e| Error::PluginError { plugin: "executor", event: "spawn", message: e.to_string() })?;
        }
        Ok(())
    }

    /// Closes the session: cancels pending tasks (not an error) and returns
    /// once every running task has reached its next suspension point.
    /// Dropping a `Session` without calling this does the same thing,
    /// best-effort.
    pub fn close(self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&self) -> Result<()> {
        if self.closed.replace(true) {
            return Ok(());
        }
        self.core.pool.borrow_mut().run_until_stalled();

        let cancelled: Vec<Hash> = self.core.pending.borrow_mut().drain().map(|(fingerprint, _)| fingerprint).collect();
        for fingerprint in cancelled {
            if let Some(inner) = self.core.graph.borrow().get(&fingerprint) {
                inner.borrow_mut().set_error(Error::Cancelled);
            }
            self.core.graph.borrow_mut().mark_done(fingerprint);
            let became_ready = self.core.graph.borrow_mut().propagate_completion(fingerprint);
            for ready in became_ready {
                self.core.dispatch_or_poison("task-ready", |p| p.task_ready(ready));
            }
        }

        self.core.dispatch("session-close", |p| p.session_close())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed.get() {
            let _ = self.close_inner();
        }
    }
}

/// Creates (or looks up) the task for `rule(args)` in the currently open
/// session, registering it in the graph and, if new, as pending execution.
/// Panics if called outside an open session — the same contract `illicit`
/// and `topo` place on their ambient accessors, since a rule can only ever
/// be invoked from within a running task's body.
pub(crate) fn call<A, O>(rule: RuleId, args: A, run_fn: impl Fn(A) -> BoxFuture<'static, Result<O>> + 'static) -> TaskHandle<O>
where
    A: Canonical + Clone + 'static,
    O: Canonical + 'static,
{
    let core = cairn_context::expect::<SessionMarker>().0.clone();

    let args_hashed = args.to_hashed();
    // `child_futures` can repeat a fingerprint (e.g. `total_rule().call(vec![a.clone(), a.clone()])`);
    // dedupe before it feeds either the initial unresolved-child count or
    // the graph edges, since `add_edge` registers at most one parent edge
    // per distinct child and a counter seeded from the raw, possibly
    // inflated count would never fully drain.
    let children = {
        let mut seen = std::collections::HashSet::new();
        args_hashed.child_futures().into_iter().filter(|h| seen.insert(*h)).collect::<Vec<_>>()
    };
    let input_hash = match cairn_hash::fingerprint_tagged(A::type_tag(), &args_hashed) {
        Ok(hash) => hash,
        Err(e) => return errored_handle(e.into()),
    };
    let fingerprint = Hash::combine(&rule.fingerprint(), &input_hash);

    let (inner, created) = core.graph.borrow_mut().get_or_insert(fingerprint, children.len());

    if created {
        {
            let mut graph = core.graph.borrow_mut();
            for child in &children {
                graph.add_edge(fingerprint, *child);
            }
        }
        core.dispatch_or_poison("task-created", |p| p.task_created(fingerprint, rule));
        if inner.borrow().state == FutureState::Ready {
            core.dispatch_or_poison("task-ready", |p| p.task_ready(fingerprint));
        }

        let args_for_run = args.clone();
        core.pending.borrow_mut().insert(
            fingerprint,
            PendingExec {
                rule,
                input_hash,
                run: Box::new(move || {
                    let fut = run_fn(args_for_run);
                    Box::pin(async move { fut.await.map(|out| out.to_hashed()) })
                }),
            },
        );
        trace!(rule = %rule, fingerprint = %fingerprint, "task created");
    }

    if let Some(&parent) = core.running_stack.borrow().last() {
        if parent != fingerprint {
            core.graph.borrow_mut().add_side_child(parent, fingerprint);
        }
    }

    TaskHandle::new(inner)
}

fn errored_handle<O>(error: Error) -> TaskHandle<O> {
    let inner = Rc::new(RefCell::new(FutureInner::new(cairn_hash::Hash::of_bytes(b"cairn::errored-handle"), 0)));
    inner.borrow_mut().set_error(error);
    TaskHandle::new(inner)
}

/// Runs one task's body to completion: consults the cache, runs the rule
/// (establishing it as "currently running" so any rules it calls are
/// captured as side tasks), resolves any futures embedded in its return
/// value, and publishes the result.
async fn run_task(core: Rc<SessionCore>, fingerprint: Hash, exec: PendingExec) {
    let outcome = execute(&core, fingerprint, exec).await;

    match outcome {
        Ok(value) => {
            if let Some(inner) = core.graph.borrow().get(&fingerprint) {
                inner.borrow_mut().set_result(value);
            }
            core.dispatch_or_poison("task-done", |p| p.task_done(fingerprint));
        }
        Err(e) => {
            core.dispatch_or_poison("task-error", |p| p.task_error(fingerprint, &e));
            if let Some(inner) = core.graph.borrow().get(&fingerprint) {
                inner.borrow_mut().set_error(e);
            }
        }
    }

    core.graph.borrow_mut().mark_done(fingerprint);
    let became_ready = core.graph.borrow_mut().propagate_completion(fingerprint);
    for ready in became_ready {
        core.dispatch_or_poison("task-ready", |p| p.task_ready(ready));
    }
    core.dispatch_or_poison("task-run-end", |p| p.task_run_end(fingerprint));
}

async fn execute(core: &Rc<SessionCore>, fingerprint: Hash, exec: PendingExec) -> Result<HashedValue> {
    let Some(store) = core.store.clone() else {
        return run_body(core, fingerprint, exec, None).await;
    };

    let rule_name = exec.rule.name;
    let input_hash = exec.input_hash;
    let worker_id = core.config.worker_id.clone();
    let mut attempt = 0u32;
    let mut claim = store.try_claim(&fingerprint, &worker_id)?;
    loop {
        match claim {
            ClaimOutcome::AlreadyResult(cached) => {
                debug!(fingerprint = %fingerprint, "cache hit, skipping body");
                return Ok(cached.value);
            }
            ClaimOutcome::Claimed => {
                let heartbeat = Some((store.clone(), worker_id.clone()));
                return match run_body(core, fingerprint, exec, heartbeat).await {
                    Ok(value) => {
                        store.put_result(&fingerprint, rule_name, &input_hash, &value)?;
                        Ok(value)
                    }
                    Err(e) => {
                        let _ = store.release_claim(&fingerprint, &worker_id);
                        Err(e)
                    }
                };
            }
            ClaimOutcome::HeldByOther { heartbeat, .. } => {
                let age = Duration::from_secs((now_secs() - heartbeat).max(0) as u64);
                if age >= core.config.backoff.stale_after {
                    warn!(fingerprint = %fingerprint, "reclaiming stale claim");
                    claim = store.reclaim_stale(&fingerprint, &worker_id, heartbeat)?;
                    continue;
                }
                let delay = core.config.backoff.delay_for_attempt(attempt);
                attempt = attempt.saturating_add(1);
                std::thread::sleep(delay);
                claim = store.try_claim(&fingerprint, &worker_id)?;
            }
        }
    }
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs() as i64
}

/// Wraps a running task's body future so every suspension point (every poll
/// that comes back `Pending`) refreshes the claim's heartbeat, if this task
/// is backed by a persistent store, and checks the task's time budget, if
/// one is configured — transitioning it to `Errored` with `Error::Timeout`
/// once exceeded rather than letting it run unbounded.
struct SuspendingBody {
    inner: BoxFuture<'static, Result<HashedValue>>,
    fingerprint: Hash,
    started_at: Instant,
    timeout: Option<Duration>,
    heartbeat: Option<(Store, String)>,
}

impl Future for SuspendingBody {
    type Output = Result<HashedValue>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.inner.as_mut().poll(cx) {
            Poll::Ready(out) => Poll::Ready(out),
            Poll::Pending => {
                if let Some((store, worker_id)) = &this.heartbeat {
                    let _ = store.heartbeat(&this.fingerprint, worker_id);
                }
                if let Some(timeout) = this.timeout {
                    if this.started_at.elapsed() >= timeout {
                        warn!(fingerprint = %this.fingerprint, "task exceeded its configured time budget");
                        return Poll::Ready(Err(Error::Timeout));
                    }
                }
                Poll::Pending
            }
        }
    }
}

async fn run_body(
    core: &Rc<SessionCore>,
    fingerprint: Hash,
    exec: PendingExec,
    heartbeat: Option<(Store, String)>,
) -> Result<HashedValue> {
    core.running_stack.borrow_mut().push(fingerprint);
    let ran = SuspendingBody {
        inner: (exec.run)(),
        fingerprint,
        started_at: Instant::now(),
        timeout: core.config.task_timeout,
        heartbeat,
    }
    .await;
    core.running_stack.borrow_mut().pop();

    let value = ran?;
    resolve_embedded_futures(core, value).await
}

/// Awaits every future leaf embedded in `value` (a task's freshly-produced
/// return value) and substitutes resolved values in, so a result written
/// to the cache or handed to a waiting parent never carries an unresolved
/// reference.
async fn resolve_embedded_futures(core: &Rc<SessionCore>, value: HashedValue) -> Result<HashedValue> {
    let futures_in_value = value.child_futures();
    if futures_in_value.is_empty() {
        return Ok(value);
    }

    let mut resolved = std::collections::BTreeMap::new();
    for hash in futures_in_value {
        if resolved.contains_key(&hash) {
            continue;
        }
        let inner = core.graph.borrow().get(&hash);
        let result = match inner {
            Some(inner) => RawAwait::new(inner).await?,
            None => return Err(Error::TypeMismatch),
        };
        resolved.insert(hash, result);
    }
    Ok(value.substitute(&resolved))
}
