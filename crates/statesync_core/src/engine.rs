//! The state sync engine: the public API of the store.

use crate::config::Config;
use crate::coordinator::{Coordinator, ResourceKey};
use crate::error::{StateError, StateResult};
use crate::gate::{classify, Tier};
use crate::model::{
    Environment, Fingerprint, Interval, MaterializationPlan, PlanMetadata, Snapshot,
    SnapshotDefinition,
};
use crate::schema::StateSchema;
use statesync_backend::StateBackend;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A requested environment promotion.
///
/// Promotions are an explicit compare-and-swap: `based_on` names the
/// environment version the desired mapping was derived from (`None` for a
/// first promotion, when the environment must not exist yet). If the store
/// has moved past that version the promotion fails with
/// [`StateError::Conflict`] and the caller re-reads and retries.
#[derive(Debug, Clone)]
pub struct PromotionRequest {
    /// Desired logical-name -> fingerprint mapping.
    pub mapping: BTreeMap<String, Fingerprint>,
    /// The version this request is derived from; `None` expects creation.
    pub based_on: Option<u64>,
    /// Expiration time for the environment, epoch millis.
    pub expires_at: Option<i64>,
}

impl PromotionRequest {
    /// Creates a first-promotion request (expects the environment to not
    /// exist).
    #[must_use]
    pub fn create(mapping: BTreeMap<String, Fingerprint>) -> Self {
        Self {
            mapping,
            based_on: None,
            expires_at: None,
        }
    }

    /// Sets the version this request is based on.
    #[must_use]
    pub fn based_on(mut self, version: u64) -> Self {
        self.based_on = Some(version);
        self
    }

    /// Sets the environment's expiration time.
    #[must_use]
    pub fn expires_at(mut self, at: i64) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// The state synchronization engine.
///
/// Tracks what has been built, where, and as of when: environments point
/// at consistent sets of snapshots, snapshots own materialized interval
/// coverage. All mutation funnels through the coordinator's exclusive
/// scopes so the locking and atomicity invariants cannot be bypassed.
///
/// # Initialization
///
/// [`StateSync::initialize`] classifies the backend's capability
/// descriptor first. Forbidden backends are refused with
/// [`StateError::Configuration`]; warning-tier backends initialize but
/// emit one structured warning naming the missing guarantees.
///
/// # Example
///
/// ```rust
/// use statesync_backend::InMemoryBackend;
/// use statesync_core::{Config, StateSync};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let config = Config::new(Duration::from_secs(5), Duration::from_secs(60));
/// let engine = StateSync::initialize(Arc::new(InMemoryBackend::new()), config).unwrap();
/// assert!(engine.list_environments().unwrap().is_empty());
/// ```
pub struct StateSync {
    backend: Arc<dyn StateBackend>,
    coordinator: Coordinator,
    config: Config,
    cancelled: Arc<AtomicBool>,
}

impl StateSync {
    /// Initializes the engine over a backend.
    ///
    /// Runs the compatibility gate, then creates any missing tables.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Configuration`] for forbidden-tier backends;
    /// propagates backend errors from table creation.
    pub fn initialize(backend: Arc<dyn StateBackend>, config: Config) -> StateResult<Self> {
        let capabilities = backend.capabilities();
        let classification = classify(capabilities, &config);
        match classification.tier {
            Tier::Forbidden => {
                return Err(StateError::Configuration {
                    backend: capabilities.backend.clone(),
                    missing: classification.missing_list(),
                });
            }
            Tier::AllowedWithWarning => {
                tracing::warn!(
                    backend = %capabilities.backend,
                    missing = %classification.missing_list(),
                    docs = %config.docs_reference,
                    "backend is usable as a state store but missing recommended guarantees"
                );
            }
            Tier::Recommended => {}
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let coordinator = Coordinator::new(Arc::clone(&backend), &config, Arc::clone(&cancelled));

        let mut conn = backend.connect()?;
        StateSchema::new(conn.as_mut(), config.lock_poll_interval).ensure_tables()?;

        Ok(Self {
            backend,
            coordinator,
            config,
            cancelled,
        })
    }

    /// Atomically replaces an environment's snapshot mapping.
    ///
    /// Takes an exclusive scope on the environment key and on every
    /// referenced snapshot key, re-reads the current state under lock,
    /// validates every referenced snapshot exists, checks the request's
    /// `based_on` version against the stored one, writes the new mapping,
    /// and commits. Either the whole new mapping becomes visible or none
    /// of it does. Holding the snapshot keys serializes validation against
    /// [`StateSync::collect_snapshots`], so a promotion can never commit a
    /// reference to a snapshot deleted mid-flight.
    ///
    /// # Errors
    ///
    /// - [`StateError::Conflict`] if a concurrent promotion committed
    ///   first; re-read and retry with a fresh `based_on`
    /// - [`StateError::MissingSnapshot`] if the mapping references
    ///   fingerprints that were never registered
    /// - [`StateError::LockTimeout`] / [`StateError::Cancelled`] from the
    ///   scope itself
    pub fn promote_environment(
        &self,
        name: &str,
        request: PromotionRequest,
    ) -> StateResult<Environment> {
        let mut keys: Vec<ResourceKey> = request
            .mapping
            .values()
            .cloned()
            .map(ResourceKey::Snapshot)
            .collect();
        keys.push(ResourceKey::Environment(name.to_string()));
        let name = name.to_string();
        self.coordinator
            .with_exclusive_scope("promote_environment", &keys, move |schema| {
                let current = schema.read_environment(&name, true)?;

                tracing::debug!(environment = %name, "validating promotion");
                let referenced: Vec<Fingerprint> = request.mapping.values().cloned().collect();
                let found = schema.read_snapshots(&referenced)?;
                if found.len() != referenced.len() {
                    let mut missing: Vec<String> = referenced
                        .iter()
                        .filter(|fp| !found.iter().any(|s| &s.fingerprint == *fp))
                        .map(|fp| fp.as_str().to_string())
                        .collect();
                    missing.sort();
                    missing.dedup();
                    return Err(StateError::MissingSnapshot {
                        environment: name.clone(),
                        fingerprints: missing.join(", "),
                    });
                }

                let current_version = current.as_ref().map_or(0, |env| env.version);
                if request.based_on.unwrap_or(0) != current_version {
                    return Err(StateError::Conflict {
                        environment: name.clone(),
                        based_on: request.based_on.unwrap_or(0),
                        current: current_version,
                    });
                }

                tracing::debug!(environment = %name, version = current_version + 1, "writing promotion");
                let environment = Environment {
                    name: name.clone(),
                    mapping: request.mapping,
                    version: current_version + 1,
                    created_at: current.as_ref().map_or_else(now_millis, |env| env.created_at),
                    expires_at: request.expires_at.or(current.and_then(|env| env.expires_at)),
                    plan: PlanMetadata::applied(),
                };
                schema.write_environment(&environment)?;
                Ok(environment)
            })
    }

    /// Registers a snapshot for a definition, idempotently.
    ///
    /// The fingerprint is computed from the definition; if a snapshot with
    /// that fingerprint already exists it is returned unchanged and no
    /// second row is created.
    ///
    /// # Errors
    ///
    /// Propagates scope and backend errors.
    pub fn register_snapshot(
        &self,
        definition: &SnapshotDefinition,
        plan: &MaterializationPlan,
    ) -> StateResult<Snapshot> {
        let fingerprint = definition.fingerprint();
        let key = ResourceKey::Snapshot(fingerprint.clone());
        let name = definition.name.clone();
        let locator = plan.storage_locator.clone();
        self.coordinator
            .with_exclusive_scope("register_snapshot", &[key], move |schema| {
                if let Some(existing) = schema.read_snapshot(&fingerprint)? {
                    return Ok(existing);
                }
                let snapshot = Snapshot {
                    fingerprint: fingerprint.clone(),
                    name,
                    storage_locator: locator,
                    created_at: now_millis(),
                };
                schema.write_snapshots(&[snapshot.clone()])?;
                Ok(snapshot)
            })
    }

    /// Records a materialized interval for a snapshot, merging it into the
    /// existing coverage. Returns the new coverage.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UnknownSnapshot`] if the fingerprint has no
    /// registered snapshot.
    pub fn record_interval(
        &self,
        fingerprint: &Fingerprint,
        interval: Interval,
    ) -> StateResult<Vec<Interval>> {
        let key = ResourceKey::Snapshot(fingerprint.clone());
        let fingerprint = fingerprint.clone();
        self.coordinator
            .with_exclusive_scope("record_interval", &[key], move |schema| {
                require_snapshot(schema, &fingerprint)?;
                schema.record_intervals(&fingerprint, vec![interval])
            })
    }

    /// Removes exactly `range` from a snapshot's coverage, splitting
    /// stored intervals as needed. Returns the remaining coverage.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UnknownSnapshot`] if the fingerprint has no
    /// registered snapshot.
    pub fn remove_interval(
        &self,
        fingerprint: &Fingerprint,
        range: Range<i64>,
    ) -> StateResult<Vec<Interval>> {
        if range.start >= range.end {
            return Err(StateError::InvalidInterval {
                start: range.start,
                end: range.end,
            });
        }
        let key = ResourceKey::Snapshot(fingerprint.clone());
        let fingerprint = fingerprint.clone();
        self.coordinator
            .with_exclusive_scope("remove_interval", &[key], move |schema| {
                require_snapshot(schema, &fingerprint)?;
                schema.remove_interval(&fingerprint, &range)
            })
    }

    /// Returns a snapshot's coverage, ordered by start.
    ///
    /// Read-only and lock-free: a single statement, so the result is a
    /// self-consistent (possibly stale) view that never observes half of a
    /// merge.
    pub fn coverage(&self, fingerprint: &Fingerprint) -> StateResult<Vec<Interval>> {
        let mut conn = self.backend.connect()?;
        StateSchema::new(conn.as_mut(), self.config.lock_poll_interval).read_intervals(fingerprint)
    }

    /// Reads an environment without locking.
    pub fn environment(&self, name: &str) -> StateResult<Option<Environment>> {
        let mut conn = self.backend.connect()?;
        StateSchema::new(conn.as_mut(), self.config.lock_poll_interval)
            .read_environment(name, false)
    }

    /// Reads every environment without locking.
    pub fn list_environments(&self) -> StateResult<Vec<Environment>> {
        let mut conn = self.backend.connect()?;
        StateSchema::new(conn.as_mut(), self.config.lock_poll_interval).list_environments()
    }

    /// Reads a snapshot without locking.
    pub fn snapshot(&self, fingerprint: &Fingerprint) -> StateResult<Option<Snapshot>> {
        let mut conn = self.backend.connect()?;
        StateSchema::new(conn.as_mut(), self.config.lock_poll_interval).read_snapshot(fingerprint)
    }

    /// Removes an environment explicitly. Returns true if it existed.
    ///
    /// Its snapshots stay registered; unreferenced ones become candidates
    /// for [`StateSync::collect_snapshots`].
    pub fn remove_environment(&self, name: &str) -> StateResult<bool> {
        let key = ResourceKey::Environment(name.to_string());
        let name = name.to_string();
        self.coordinator
            .with_exclusive_scope("remove_environment", &[key], move |schema| {
                schema.delete_environment(&name)
            })
    }

    /// Deletes every environment whose expiration time has passed.
    ///
    /// Each candidate is re-checked and deleted under its own exclusive
    /// scope, so a promotion that raced the sweep and refreshed the
    /// environment wins. Returns the names actually deleted.
    pub fn expire_environments(&self, now: i64) -> StateResult<Vec<String>> {
        let candidates: Vec<String> = self
            .list_environments()?
            .into_iter()
            .filter(|env| env.is_expired(now))
            .map(|env| env.name)
            .collect();

        let mut deleted = Vec::new();
        for name in candidates {
            let key = ResourceKey::Environment(name.clone());
            let sweep_name = name.clone();
            let removed = self.coordinator.with_exclusive_scope(
                "expire_environments",
                &[key],
                move |schema| match schema.read_environment(&sweep_name, true)? {
                    Some(env) if env.is_expired(now) => {
                        schema.delete_environment(&sweep_name)?;
                        Ok(true)
                    }
                    _ => Ok(false),
                },
            )?;
            if removed {
                tracing::info!(environment = %name, "expired environment removed");
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Garbage-collects snapshots that no environment references and that
    /// are older than the configured retention threshold. Returns the
    /// collected fingerprints.
    ///
    /// Collection runs in two phases. A scan under the maintenance scope
    /// picks candidates, then each candidate is deleted under its own
    /// snapshot key with the reference and age checks repeated. The delete
    /// therefore waits out any in-flight scope on that snapshot (interval
    /// recording, registration) and removes its rows too, and a promotion
    /// that committed a reference since the scan makes the re-check skip
    /// the candidate.
    pub fn collect_snapshots(&self, now: i64) -> StateResult<Vec<Fingerprint>> {
        let retention_millis = i64::try_from(self.config.snapshot_retention.as_millis())
            .unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(retention_millis);

        let candidates = self.coordinator.with_exclusive_scope(
            "collect_snapshots",
            &[ResourceKey::Maintenance],
            move |schema| {
                let environments = schema.list_environments()?;
                let candidates: Vec<Fingerprint> = schema
                    .list_snapshots()?
                    .into_iter()
                    .filter(|snapshot| {
                        snapshot.created_at <= cutoff
                            && !environments
                                .iter()
                                .any(|env| env.references(&snapshot.fingerprint))
                    })
                    .map(|snapshot| snapshot.fingerprint)
                    .collect();
                Ok(candidates)
            },
        )?;

        let mut collected = Vec::new();
        for fingerprint in candidates {
            let key = ResourceKey::Snapshot(fingerprint.clone());
            let candidate = fingerprint.clone();
            let removed = self.coordinator.with_exclusive_scope(
                "collect_snapshots",
                &[key],
                move |schema| {
                    let Some(snapshot) = schema.read_snapshot(&candidate)? else {
                        return Ok(false);
                    };
                    if snapshot.created_at > cutoff {
                        return Ok(false);
                    }
                    let environments = schema.list_environments()?;
                    if environments.iter().any(|env| env.references(&candidate)) {
                        return Ok(false);
                    }
                    schema.delete_snapshot(&candidate)?;
                    Ok(true)
                },
            )?;
            if removed {
                tracing::info!(fingerprint = %fingerprint, "unreferenced snapshot collected");
                collected.push(fingerprint);
            }
        }
        Ok(collected)
    }

    /// Cancels pending lock waits.
    ///
    /// Waiters that have not yet acquired their scope fail with
    /// [`StateError::Cancelled`] and no side effects; a scope already
    /// acquired runs to completion. The flag stays raised until
    /// [`StateSync::clear_cancelled`].
    pub fn cancel_pending(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Lowers the cancellation flag so new operations may wait again.
    pub fn clear_cancelled(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for StateSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSync")
            .field("backend", &self.backend.capabilities().backend)
            .finish_non_exhaustive()
    }
}

fn require_snapshot(schema: &mut StateSchema<'_>, fingerprint: &Fingerprint) -> StateResult<()> {
    if schema.read_snapshot(fingerprint)?.is_none() {
        return Err(StateError::UnknownSnapshot {
            fingerprint: fingerprint.as_str().to_string(),
        });
    }
    Ok(())
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
