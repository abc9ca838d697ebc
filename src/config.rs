//! In-memory session configuration. Loading it from a file, environment, or
//! CLI flags is the excluded bootstrapper's job — this is only the shape a
//! caller builds programmatically, set via builder methods the way the
//! teacher's `Runtime` takes its executor and waker.

use std::time::Duration;

use cairn_store::BackoffConfig;

/// Tuning knobs for one [`crate::Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub(crate) backoff: BackoffConfig,
    pub(crate) task_timeout: Option<Duration>,
    pub(crate) worker_id: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { backoff: BackoffConfig::default(), task_timeout: None, worker_id: default_worker_id() }
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Delay bounds and staleness window for the cache's claim-contention
    /// backoff.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// A budget after which a still-running task is transitioned to
    /// `Errored` with kind `timeout` at its next suspension point. `None`
    /// (the default) means no per-task budget.
    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.config.task_timeout = Some(timeout);
        self
    }

    /// Identifies this session's claims in the persistent cache. Defaults
    /// to a process-unique string; callers running several sessions against
    /// one cache file (the concurrent-workers scenario) should set a
    /// distinct id per session.
    pub fn worker_id(mut self, id: impl Into<String>) -> Self {
        self.config.worker_id = id.into();
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

fn default_worker_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let pid = std::process::id();
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    format!("worker-{pid}-{nanos:x}")
}
