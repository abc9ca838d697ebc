use std::rc::Rc;

use thiserror::Error;

/// Every failure mode the core can report. Mirrors the error *kinds* a
/// session distinguishes, not a one-variant-per-crate split — `cairn-hash`
/// and `cairn-store` each keep their own narrower error enum and convert
/// into this one at the boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// Fingerprinting encountered a non-serialisable leaf.
    #[error("value could not be canonicalised: {0}")]
    UnsupportedValue(String),

    /// A value contains itself structurally; hashed values must be acyclic.
    #[error("value contains a structural cycle")]
    CycleInValue,

    /// A session was opened while one was already active on this thread.
    #[error("a session is already open on this thread")]
    NestedSession,

    /// The driver has no ready or running tasks but demanded roots remain
    /// unresolved.
    #[error("scheduler deadlocked: {pending} task(s) pending, none ready or running")]
    Deadlock { pending: usize },

    /// A rule body returned an error.
    #[error("rule `{rule}` failed: {message}")]
    RuleFailure { rule: &'static str, message: String },

    /// A dependency of this task ended in `Errored`; wraps the original.
    #[error("dependency failed: {0}")]
    DependencyFailed(Rc<Error>),

    /// The persistent cache already holds a result for this fingerprint
    /// with a different rule identity or input hash.
    #[error("cache conflict for fingerprint {0}")]
    CacheConflict(String),

    /// A task exceeded its configured per-task timeout.
    #[error("task exceeded its configured time budget")]
    Timeout,

    /// A task was discarded because the owning session was closed.
    #[error("task was cancelled by session close")]
    Cancelled,

    /// A plugin aborted event handling.
    #[error("plugin `{plugin}` aborted on `{event}`: {message}")]
    PluginError { plugin: &'static str, event: &'static str, message: String },

    /// A decoded cache or canonical value didn't match the shape the caller
    /// expected of it.
    #[error("value did not decode into the expected type")]
    TypeMismatch,

    #[error(transparent)]
    Hash(#[from] cairn_hash::Error),

    #[error(transparent)]
    Store(#[from] cairn_store::Error),
}

// Not `#[derive(Clone)]`: `cairn_hash::Error` and `cairn_store::Error` embed
// non-`Clone` sources (e.g. `rusqlite::Error`). Errors are cloned only to
// hand the same failure to more than one dependent and to the caller of
// `run`, so a lossy-but-faithful clone (downgrading those two variants to
// their rendered message) is the pragmatic trade.
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::UnsupportedValue(s) => Error::UnsupportedValue(s.clone()),
            Error::CycleInValue => Error::CycleInValue,
            Error::NestedSession => Error::NestedSession,
            Error::Deadlock { pending } => Error::Deadlock { pending: *pending },
            Error::RuleFailure { rule, message } => Error::RuleFailure { rule, message: message.clone() },
            Error::DependencyFailed(e) => Error::DependencyFailed(e.clone()),
            Error::CacheConflict(s) => Error::CacheConflict(s.clone()),
            Error::Timeout => Error::Timeout,
            Error::Cancelled => Error::Cancelled,
            Error::PluginError { plugin, event, message } => {
                Error::PluginError { plugin, event, message: message.clone() }
            }
            Error::TypeMismatch => Error::TypeMismatch,
            Error::Hash(e) => Error::RuleFailure { rule: "<canonicalisation>", message: e.to_string() },
            Error::Store(e) => Error::RuleFailure { rule: "<cache>", message: e.to_string() },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
