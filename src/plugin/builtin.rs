//! Illustrative plugins: used by the test suite to assert on scheduling
//! order, and to sketch the "negative results" extension point. Neither is
//! wired into [`crate::Session`] by default.

use std::{cell::RefCell, rc::Rc};

use cairn_hash::Hash;

use super::{Plugin, PluginResult};
use crate::{error::Error, rule::RuleId};

/// Appends every event it sees to a shared, ordered log. Cheap to `Clone`
/// (an `Rc` handle to the same log) so a test can hand one clone to
/// [`crate::Session::register_plugin`] and keep another to inspect after
/// the run.
#[derive(Clone, Default)]
pub struct RecordingPlugin {
    events: Rc<RefCell<Vec<RecordedEvent>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    SessionOpen,
    SessionClose,
    TaskCreated(Hash, RuleId),
    TaskReady(Hash),
    TaskRunStart(Hash),
    TaskRunEnd(Hash),
    TaskDone(Hash),
    TaskError(Hash),
    PostEnter,
    PreExit,
}

impl RecordingPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of everything recorded so far, in event order.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.borrow().clone()
    }
}

impl Plugin for RecordingPlugin {
    fn session_open(&mut self) -> PluginResult {
        self.events.borrow_mut().push(RecordedEvent::SessionOpen);
        Ok(())
    }

    fn session_close(&mut self) -> PluginResult {
        self.events.borrow_mut().push(RecordedEvent::SessionClose);
        Ok(())
    }

    fn task_created(&mut self, fingerprint: Hash, rule: RuleId) -> PluginResult {
        self.events.borrow_mut().push(RecordedEvent::TaskCreated(fingerprint, rule));
        Ok(())
    }

    fn task_ready(&mut self, fingerprint: Hash) -> PluginResult {
        self.events.borrow_mut().push(RecordedEvent::TaskReady(fingerprint));
        Ok(())
    }

    fn task_run_start(&mut self, fingerprint: Hash) -> PluginResult {
        self.events.borrow_mut().push(RecordedEvent::TaskRunStart(fingerprint));
        Ok(())
    }

    fn task_run_end(&mut self, fingerprint: Hash) -> PluginResult {
        self.events.borrow_mut().push(RecordedEvent::TaskRunEnd(fingerprint));
        Ok(())
    }

    fn task_done(&mut self, fingerprint: Hash) -> PluginResult {
        self.events.borrow_mut().push(RecordedEvent::TaskDone(fingerprint));
        Ok(())
    }

    fn task_error(&mut self, fingerprint: Hash, _error: &Error) -> PluginResult {
        self.events.borrow_mut().push(RecordedEvent::TaskError(fingerprint));
        Ok(())
    }

    fn post_enter(&mut self) -> PluginResult {
        self.events.borrow_mut().push(RecordedEvent::PostEnter);
        Ok(())
    }

    fn pre_exit(&mut self) -> PluginResult {
        self.events.borrow_mut().push(RecordedEvent::PreExit);
        Ok(())
    }
}

/// Sketches persisting negative (errored) results under a distinct entry
/// kind, the extension point the cache's default skip-on-error policy
/// leaves open. Not a complete implementation — a real one would need its
/// own cache table, since `cairn_store::Store::put_result` rejects a value
/// containing no result to encode.
pub struct NegativeCachePlugin {
    pub errors: Vec<Hash>,
}

impl NegativeCachePlugin {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }
}

impl Default for NegativeCachePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for NegativeCachePlugin {
    fn task_error(&mut self, fingerprint: Hash, _error: &Error) -> PluginResult {
        self.errors.push(fingerprint);
        Ok(())
    }
}
