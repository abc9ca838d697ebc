//! The unit of deferred value: states, dependency edges, completion
//! propagation, registered continuations — reimplemented as a genuine Rust
//! [`std::future::Future`] so that `await()` maps directly onto `.await`.

use std::{
    cell::RefCell,
    future::Future,
    marker::PhantomData,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use cairn_hash::{Canonical, Hash, HashedValue};

use crate::error::{Error, Result};

/// A future's position in its lifecycle. Transitions are monotonic: Pending
/// → Ready → Done, or (from any non-terminal state) → Errored. Once Done or
/// Errored, a future never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Ready,
    Done,
    Errored,
}

impl FutureState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FutureState::Done | FutureState::Errored)
    }
}

/// Shared, mutable state behind a future's handle. Lives in the graph under
/// its fingerprint, shared between the scheduler and every awaiter.
pub(crate) struct FutureInner {
    pub(crate) fingerprint: Hash,
    pub(crate) state: FutureState,
    pub(crate) unresolved_children: usize,
    pub(crate) parents: Vec<Hash>,
    pub(crate) result: Option<HashedValue>,
    pub(crate) error: Option<Rc<Error>>,
    wakers: Vec<Waker>,
}

impl FutureInner {
    pub(crate) fn new(fingerprint: Hash, child_count: usize) -> Self {
        let state = if child_count == 0 { FutureState::Ready } else { FutureState::Pending };
        Self {
            fingerprint,
            state,
            unresolved_children: child_count,
            parents: Vec::new(),
            result: None,
            error: None,
            wakers: Vec::new(),
        }
    }

    pub(crate) fn add_parent(&mut self, parent: Hash) {
        if !self.parents.contains(&parent) {
            self.parents.push(parent);
        }
    }

    pub(crate) fn register_waker(&mut self, waker: &Waker) {
        if !self.wakers.iter().any(|w| w.will_wake(waker)) {
            self.wakers.push(waker.clone());
        }
    }

    fn wake_all(&mut self) {
        for waker in self.wakers.drain(..) {
            waker.wake();
        }
    }

    /// Transitions Ready → Done, storing `value` and waking every awaiter.
    pub(crate) fn set_result(&mut self, value: HashedValue) {
        debug_assert!(!self.state.is_terminal(), "double-completion of {:?}", self.fingerprint);
        self.result = Some(value);
        self.state = FutureState::Done;
        self.wake_all();
    }

    /// Transitions any non-terminal state → Errored.
    pub(crate) fn set_error(&mut self, error: Error) {
        if self.state.is_terminal() {
            return;
        }
        self.error = Some(Rc::new(error));
        self.state = FutureState::Errored;
        self.wake_all();
    }

    /// Registers one more not-yet-done child this future must wait on, even
    /// after it has already left `Pending` — this is how a running task's
    /// side tasks keep it from completing early.
    pub(crate) fn add_pending_child(&mut self) {
        debug_assert!(!self.state.is_terminal());
        self.unresolved_children += 1;
    }

    /// Called when one of this future's children reaches a terminal state.
    /// Returns `true` if this was the last outstanding child and a Pending
    /// future should move to Ready.
    pub(crate) fn child_done(&mut self) -> bool {
        debug_assert!(self.unresolved_children > 0);
        self.unresolved_children -= 1;
        if self.unresolved_children == 0 && self.state == FutureState::Pending {
            self.state = FutureState::Ready;
            return true;
        }
        false
    }
}

/// The public, typed face of a future: a handle to a value that will become
/// available. Implements [`Future`] directly — polling it registers the
/// caller's waker and resolves once the underlying task is Done or Errored.
pub struct TaskHandle<T> {
    pub(crate) inner: Rc<RefCell<FutureInner>>,
    pub(crate) _marker: PhantomData<T>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), _marker: PhantomData }
    }
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(inner: Rc<RefCell<FutureInner>>) -> Self {
        Self { inner, _marker: PhantomData }
    }

    /// This handle's fingerprint, stable regardless of resolution state.
    pub fn fingerprint(&self) -> Hash {
        self.inner.borrow().fingerprint
    }

    pub fn state(&self) -> FutureState {
        self.inner.borrow().state
    }

    /// Reads out a terminal result without registering a waker — used by
    /// the driver once it already knows a handle has settled.
    pub(crate) fn peek(&self) -> Option<std::result::Result<HashedValue, Rc<Error>>> {
        let inner = self.inner.borrow();
        match inner.state {
            FutureState::Done => Some(Ok(inner.result.clone().expect("Done future carries a result"))),
            FutureState::Errored => Some(Err(inner.error.clone().expect("Errored future carries an error"))),
            _ => None,
        }
    }
}

/// An untyped await on a future by its raw inner cell, used internally to
/// resolve the future leaves embedded in a task's own return value — the
/// scheduler doesn't know their output type, only that they must reach a
/// terminal state before the task holding them can become Done.
pub(crate) struct RawAwait {
    inner: Rc<RefCell<FutureInner>>,
}

impl RawAwait {
    pub(crate) fn new(inner: Rc<RefCell<FutureInner>>) -> Self {
        Self { inner }
    }
}

impl Future for RawAwait {
    type Output = Result<HashedValue>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        match inner.state {
            FutureState::Done => Poll::Ready(Ok(inner.result.clone().expect("Done future carries a result"))),
            FutureState::Errored => {
                Poll::Ready(Err(Error::DependencyFailed(inner.error.clone().expect("Errored future carries an error"))))
            }
            FutureState::Pending | FutureState::Ready => {
                inner.register_waker(cx.waker());
                Poll::Pending
            }
        }
    }
}

/// A `TaskHandle` flattens to a bare future reference: the engine never
/// needs its value to compute a fingerprint, only its identity. Decoding
/// one back out of a `HashedValue` isn't supported — handles are always
/// constructed through [`crate::rule::Rule::call`], never reconstructed
/// from cache bytes.
impl<T> Canonical for TaskHandle<T> {
    fn type_tag() -> &'static str {
        "cairn::TaskHandle"
    }

    fn to_hashed(&self) -> HashedValue {
        HashedValue::Future(self.fingerprint())
    }

    fn from_hashed(_value: HashedValue) -> Option<Self> {
        None
    }
}

impl<T: Canonical> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        match inner.state {
            FutureState::Done => {
                let value = inner.result.clone().expect("Done future always carries a result");
                Poll::Ready(T::from_hashed(value).ok_or(Error::TypeMismatch))
            }
            FutureState::Errored => {
                let err = inner.error.clone().expect("Errored future always carries an error");
                Poll::Ready(Err(Error::DependencyFailed(err)))
            }
            FutureState::Pending | FutureState::Ready => {
                inner.register_waker(cx.waker());
                Poll::Pending
            }
        }
    }
}
