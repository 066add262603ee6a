//! Locking and transaction coordinator.

use crate::config::Config;
use crate::error::{StateError, StateResult};
use crate::model::Fingerprint;
use crate::schema::{StateSchema, LOCKS};
use statesync_backend::{BackendError, Connection, Filter, LockMode, StateBackend, Statement};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identity of a resource an exclusive scope protects.
///
/// Scopes on the same key are totally ordered: no two holders overlap.
/// Distinct keys imply no ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceKey {
    /// One environment, by name.
    Environment(String),
    /// One snapshot, by fingerprint.
    Snapshot(Fingerprint),
    /// The store-wide maintenance scope (sweeps, garbage collection).
    Maintenance,
}

impl ResourceKey {
    /// The advisory lock key in the `locks` namespace.
    #[must_use]
    pub fn lock_key(&self) -> String {
        match self {
            ResourceKey::Environment(name) => format!("env/{name}"),
            ResourceKey::Snapshot(fingerprint) => format!("snap/{fingerprint}"),
            ResourceKey::Maintenance => "maintenance".to_string(),
        }
    }
}

/// Provides the unit of atomicity and row exclusion multi-step operations
/// require.
///
/// Every mutating operation runs inside [`Coordinator::with_exclusive_scope`]:
/// one transaction, advisory locks on all requested keys, commit on success
/// and rollback on any error. If the backend's capability descriptor lacks
/// transactions or row locking the coordinator refuses to run the operation
/// at all - there is no best-effort mode.
///
/// Lock waits are sliced by the configured poll interval so both the
/// timeout bound and the cancellation flag stay responsive.
pub struct Coordinator {
    backend: Arc<dyn StateBackend>,
    lock_timeout: Duration,
    poll_interval: Duration,
    cancelled: Arc<AtomicBool>,
}

impl Coordinator {
    /// Creates a coordinator over a backend.
    ///
    /// `cancelled` is shared with the engine; setting it aborts pending
    /// lock waits.
    pub fn new(backend: Arc<dyn StateBackend>, config: &Config, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            backend,
            lock_timeout: config.lock_timeout,
            poll_interval: config.lock_poll_interval.max(Duration::from_millis(1)),
            cancelled,
        }
    }

    /// Runs `f` inside a transaction holding exclusive locks on every key.
    ///
    /// Keys are acquired in sorted order so concurrent scopes over
    /// overlapping key sets cannot deadlock. On success the transaction
    /// commits and the value is returned; on any error all writes roll
    /// back as a unit and the error propagates with its context intact.
    ///
    /// # Errors
    ///
    /// - [`StateError::CapabilityViolation`] if the backend lacks
    ///   transactions or row locking
    /// - [`StateError::LockTimeout`] if a key stays contended past the
    ///   configured bound
    /// - [`StateError::Cancelled`] if the cancellation flag is raised
    ///   while waiting
    /// - Whatever `f` itself returns
    pub fn with_exclusive_scope<T>(
        &self,
        operation: &'static str,
        keys: &[ResourceKey],
        f: impl FnOnce(&mut StateSchema<'_>) -> StateResult<T>,
    ) -> StateResult<T> {
        self.require_scope_capabilities(operation)?;

        let mut conn = self.backend.connect()?;
        conn.begin()?;

        let mut lock_keys: Vec<String> = keys.iter().map(ResourceKey::lock_key).collect();
        lock_keys.sort();
        lock_keys.dedup();

        for key in &lock_keys {
            if let Err(e) = self.acquire(conn.as_mut(), key) {
                rollback_logged(conn.as_mut(), operation);
                return Err(e);
            }
        }

        tracing::debug!(operation, keys = ?lock_keys, "exclusive scope acquired");

        let result = {
            let mut schema = StateSchema::new(conn.as_mut(), self.poll_interval);
            f(&mut schema)
        };

        match result {
            Ok(value) => {
                conn.commit()?;
                Ok(value)
            }
            Err(e) => {
                rollback_logged(conn.as_mut(), operation);
                Err(e)
            }
        }
    }

    /// Fails fast if the backend cannot provide atomic, exclusive scopes.
    pub fn require_scope_capabilities(&self, operation: &'static str) -> StateResult<()> {
        let caps = self.backend.capabilities();
        if !caps.supports_transactions {
            return Err(StateError::CapabilityViolation {
                operation,
                required: "transactions",
                backend: caps.backend.clone(),
            });
        }
        if !caps.supports_row_locking {
            return Err(StateError::CapabilityViolation {
                operation,
                required: "row locking",
                backend: caps.backend.clone(),
            });
        }
        Ok(())
    }

    /// Acquires one advisory lock, waiting in poll-interval slices until
    /// the timeout elapses or cancellation is requested.
    fn acquire(&self, conn: &mut dyn Connection, key: &str) -> StateResult<()> {
        let started = Instant::now();
        let deadline = started + self.lock_timeout;
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(StateError::Cancelled {
                    key: key.to_string(),
                });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let slice = remaining.min(self.poll_interval);
            let locking_read = Statement::Select {
                table: LOCKS,
                filter: Filter::Key(key.to_string()),
                lock: LockMode::Exclusive { wait: slice },
            };
            match conn.execute(&locking_read) {
                Ok(_) => return Ok(()),
                Err(BackendError::LockContended { .. }) => {
                    if Instant::now() >= deadline {
                        return Err(StateError::LockTimeout {
                            key: key.to_string(),
                            waited: started.elapsed(),
                        });
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("lock_timeout", &self.lock_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

fn rollback_logged(conn: &mut dyn Connection, operation: &'static str) {
    if let Err(e) = conn.rollback() {
        tracing::error!(operation, error = %e, "rollback failed after aborted scope");
    }
}
