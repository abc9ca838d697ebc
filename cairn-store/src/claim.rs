use std::time::Duration;

/// Tuning for the cache's claim contention backoff and staleness window.
/// Constructed programmatically by the owning `Session`'s configuration —
/// this crate never reads it from a file or environment itself.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Delay before the first retry of a contended claim.
    pub initial: Duration,
    /// Ceiling the exponential backoff never exceeds.
    pub max: Duration,
    /// A claim with a heartbeat older than this is considered abandoned and
    /// may be reclaimed by another worker.
    pub stale_after: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(2),
            stale_after: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    /// Bounded exponential backoff for the `attempt`th retry (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial.as_millis().saturating_mul(1u128 << attempt.min(20));
        Duration::from_millis(scaled.min(self.max.as_millis()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let cfg = BackoffConfig::default();
        assert!(cfg.delay_for_attempt(0) < cfg.delay_for_attempt(1));
        assert!(cfg.delay_for_attempt(1) < cfg.delay_for_attempt(2));
        assert_eq!(cfg.delay_for_attempt(30), cfg.max);
    }
}
