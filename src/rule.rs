//! A rule is a value carrying an identity and a suspending function;
//! calling it inside an open session produces a task, deduplicated by
//! fingerprint.

use std::{future::Future, pin::Pin, rc::Rc};

use cairn_hash::Canonical;

use crate::{error::Result, future::TaskHandle, session};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// A rule's stable identity: qualified name plus a user-chosen version tag.
/// Changing either invalidates every cache entry for the rule; keeping it
/// stable across deployments is the caller's contract, not something this
/// crate can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RuleId {
    pub name: &'static str,
    pub version: &'static str,
}

impl RuleId {
    pub fn new(name: &'static str, version: &'static str) -> Self {
        Self { name, version }
    }

    pub(crate) fn fingerprint(&self) -> cairn_hash::Hash {
        cairn_hash::Hash::of_bytes(format!("{}@{}", self.name, self.version).as_bytes())
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

type RuleBody<A, O> = Rc<dyn Fn(A) -> BoxFuture<'static, Result<O>>>;

/// A registered, identity-bearing, possibly-suspending computation.
#[derive(Clone)]
pub struct Rule<A, O> {
    id: RuleId,
    body: RuleBody<A, O>,
}

impl<A, O> Rule<A, O>
where
    A: Canonical + Clone + 'static,
    O: Canonical + 'static,
{
    pub fn new(
        name: &'static str,
        version: &'static str,
        body: impl Fn(A) -> BoxFuture<'static, Result<O>> + 'static,
    ) -> Self {
        Self { id: RuleId::new(name, version), body: Rc::new(body) }
    }

    pub fn id(&self) -> RuleId {
        self.id
    }

    /// Invokes the rule within the currently open session: canonicalises
    /// `args`, computes the task's fingerprint, deduplicates against the
    /// graph, and returns a handle to its (possibly not yet computed)
    /// result.
    pub fn call(&self, args: A) -> TaskHandle<O> {
        let body = self.body.clone();
        session::call(self.id, args, move |args| (body)(args))
    }
}
