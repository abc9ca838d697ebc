//! In-memory index of futures by fingerprint, derived child/parent edges,
//! and the ready queue the scheduler drains. Created at session open,
//! discarded whole at session close — durable state lives in the cache.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
    rc::Rc,
};

use cairn_hash::Hash;

use crate::future::{FutureInner, FutureState};

#[derive(Default)]
pub(crate) struct Graph {
    futures: HashMap<Hash, Rc<RefCell<FutureInner>>>,
    ready: VecDeque<Hash>,
    running: HashSet<Hash>,
}

impl Graph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the existing future for `fingerprint`, or creates and
    /// registers one with `child_count` unresolved children. The second
    /// element of the tuple is `true` iff a new future was created.
    pub(crate) fn get_or_insert(&mut self, fingerprint: Hash, child_count: usize) -> (Rc<RefCell<FutureInner>>, bool) {
        if let Some(existing) = self.futures.get(&fingerprint) {
            return (existing.clone(), false);
        }
        let inner = Rc::new(RefCell::new(FutureInner::new(fingerprint, child_count)));
        self.futures.insert(fingerprint, inner.clone());
        if inner.borrow().state == FutureState::Ready {
            self.ready.push_back(fingerprint);
        }
        (inner, true)
    }

    pub(crate) fn get(&self, fingerprint: &Hash) -> Option<Rc<RefCell<FutureInner>>> {
        self.futures.get(fingerprint).cloned()
    }

    pub(crate) fn state_of(&self, fingerprint: &Hash) -> Option<FutureState> {
        self.futures.get(fingerprint).map(|f| f.borrow().state)
    }

    /// Registers `parent` as a future that should be notified when `child`
    /// completes. A no-op if `child` isn't (or is no longer) in the graph.
    pub(crate) fn add_edge(&mut self, parent: Hash, child: Hash) {
        if let Some(child_inner) = self.futures.get(&child) {
            child_inner.borrow_mut().add_parent(parent);
        }
    }

    /// Adds `child` as one more dependency `parent` must see resolve before
    /// it can be Done, even though `parent` has already left Pending. Used
    /// for side tasks discovered while a task's body is running.
    pub(crate) fn add_side_child(&mut self, parent: Hash, child: Hash) {
        let child_done = self.state_of(&child).map(FutureState::is_terminal).unwrap_or(true);
        if child_done {
            return;
        }
        if let Some(parent_inner) = self.futures.get(&parent) {
            parent_inner.borrow_mut().add_pending_child();
        }
        self.add_edge(parent, child);
    }

    pub(crate) fn push_ready(&mut self, fingerprint: Hash) {
        self.ready.push_back(fingerprint);
    }

    pub(crate) fn pop_ready(&mut self) -> Option<Hash> {
        self.ready.pop_front()
    }

    pub(crate) fn mark_running(&mut self, fingerprint: Hash) {
        self.running.insert(fingerprint);
    }

    pub(crate) fn mark_done(&mut self, fingerprint: Hash) {
        self.running.remove(&fingerprint);
    }

    pub(crate) fn is_running(&self, fingerprint: &Hash) -> bool {
        self.running.contains(fingerprint)
    }

    pub(crate) fn running_count(&self) -> usize {
        self.running.len()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.futures.values().filter(|f| f.borrow().state == FutureState::Pending).count()
    }

    /// Notifies every parent of `child` that it reached a terminal state,
    /// advancing any parent whose last outstanding child this was into the
    /// ready queue. Returns the parents that became ready, for plugin
    /// dispatch.
    pub(crate) fn propagate_completion(&mut self, child: Hash) -> Vec<Hash> {
        let parents = self.futures.get(&child).map(|inner| inner.borrow().parents.clone()).unwrap_or_default();
        let mut became_ready = Vec::new();
        for parent in parents {
            if let Some(parent_inner) = self.futures.get(&parent) {
                let ready = parent_inner.borrow_mut().child_done();
                if ready {
                    self.ready.push_back(parent);
                    became_ready.push(parent);
                }
            }
        }
        became_ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_child_future_starts_ready() {
        let mut graph = Graph::new();
        let f = Hash::of_bytes(b"f");
        let (inner, created) = graph.get_or_insert(f, 0);
        assert!(created);
        assert_eq!(inner.borrow().state, FutureState::Ready);
        assert_eq!(graph.pop_ready(), Some(f));
    }

    #[test]
    fn pending_future_becomes_ready_when_last_child_completes() {
        let mut graph = Graph::new();
        let parent = Hash::of_bytes(b"parent");
        let child = Hash::of_bytes(b"child");
        graph.get_or_insert(child, 0);
        graph.pop_ready(); // drain child's own ready entry
        graph.get_or_insert(parent, 1);
        graph.add_edge(parent, child);

        graph.get(&child).unwrap().borrow_mut().set_result(cairn_hash::HashedValue::Null);
        let became_ready = graph.propagate_completion(child);

        assert_eq!(became_ready, vec![parent]);
        assert_eq!(graph.state_of(&parent), Some(FutureState::Ready));
    }

    #[test]
    fn repeated_insert_returns_existing_future() {
        let mut graph = Graph::new();
        let f = Hash::of_bytes(b"f");
        let (first, _) = graph.get_or_insert(f, 0);
        let (second, created) = graph.get_or_insert(f, 3);
        assert!(!created);
        assert!(Rc::ptr_eq(&first, &second));
    }
}
