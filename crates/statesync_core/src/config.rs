//! Engine configuration.

use std::time::Duration;

/// Configuration for initializing a [`crate::StateSync`] engine.
///
/// `lock_timeout` and `snapshot_retention` have no defaults: the right
/// values depend on the deployment (plan sizes, backend latency, audit
/// requirements) and guessing them would hide misconfiguration. They are
/// constructor parameters; everything else has a benign default and a
/// builder setter.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bound on waiting for an exclusive scope before failing with a lock
    /// timeout.
    pub lock_timeout: Duration,

    /// Minimum age before an unreferenced snapshot may be garbage
    /// collected.
    pub snapshot_retention: Duration,

    /// Slice length for lock waits; between slices the cancellation flag
    /// and the deadline are checked.
    pub lock_poll_interval: Duration,

    /// Minimum `max_concurrent_tasks` for a backend to classify as
    /// recommended rather than warning tier.
    pub recommended_concurrency: u32,

    /// Documentation reference included in the warning-tier startup
    /// message. Opaque to the engine.
    pub docs_reference: String,
}

impl Config {
    /// Creates a configuration with the two required parameters.
    #[must_use]
    pub fn new(lock_timeout: Duration, snapshot_retention: Duration) -> Self {
        Self {
            lock_timeout,
            snapshot_retention,
            lock_poll_interval: Duration::from_millis(25),
            recommended_concurrency: 2,
            docs_reference: "docs/backends.md".to_string(),
        }
    }

    /// Sets the lock wait poll interval.
    #[must_use]
    pub fn lock_poll_interval(mut self, value: Duration) -> Self {
        self.lock_poll_interval = value;
        self
    }

    /// Sets the recommended-tier concurrency threshold.
    #[must_use]
    pub fn recommended_concurrency(mut self, value: u32) -> Self {
        self.recommended_concurrency = value;
        self
    }

    /// Sets the documentation reference string.
    #[must_use]
    pub fn docs_reference(mut self, value: impl Into<String>) -> Self {
        self.docs_reference = value.into();
        self
    }
}
