//! A content-addressed task graph: call a [`Rule`] with some arguments and
//! get back a [`TaskHandle`] — a real [`std::future::Future`] that resolves
//! once the rule's body (and anything it calls) has run. Identical
//! `(rule, arguments)` pairs anywhere in the graph collapse onto the same
//! task, in this session and, with a [`cairn_store::Store`], across
//! restarts and concurrent workers too.
//!
//! ```ignore
//! let double = Rule::new("double", "v1", |n: i64| Box::pin(async move { Ok(n * 2) }));
//! let session = Session::open(SessionConfig::default())?;
//! let result = session.run(|| double.call(21))?;
//! assert_eq!(result, 42);
//! ```
//!
//! A task's identity is the fingerprint of its rule plus its canonicalised
//! arguments (see [`cairn_hash`]); a task's dependencies are whatever other
//! tasks its body `.await`s before returning. Everything else — the ready
//! queue, the claim protocol against a shared cache, plugin hooks for
//! observability — builds on those two ideas.

#![deny(clippy::all)]
#![warn(missing_docs)]

mod config;
mod error;
mod future;
mod graph;
mod plugin;
mod rule;
mod session;
#[cfg(feature = "worker-pool")]
mod workers;

pub use config::{SessionConfig, SessionConfigBuilder};
pub use error::{Error, Result};
pub use future::{FutureState, TaskHandle};
pub use plugin::{builtin, Plugin, PluginResult};
pub use rule::{BoxFuture, Rule, RuleId};
pub use session::Session;
#[cfg(feature = "worker-pool")]
pub use workers::run_workers;

pub use cairn_hash::{Canonical, Hash, HashedValue};
pub use cairn_store::{BackoffConfig, CachedResult, Store};
