//! Engine and backend fixtures.
//!
//! Provides canned capability descriptors for every gate tier and
//! ready-to-use engines over the in-memory backend.

use statesync_backend::{Capabilities, InMemoryBackend};
use statesync_core::{
    Config, MaterializationPlan, Snapshot, SnapshotDefinition, StateSync,
};
use std::sync::Arc;
use std::time::Duration;

/// A descriptor that classifies as recommended.
#[must_use]
pub fn recommended_caps() -> Capabilities {
    Capabilities::full("test-recommended", 4)
}

/// A descriptor that classifies as allowed-with-warning (single process).
#[must_use]
pub fn warning_caps() -> Capabilities {
    Capabilities::full("test-warning", 4).multi_process_writers(false)
}

/// A descriptor that classifies as forbidden (no transactions, no row
/// locking).
#[must_use]
pub fn forbidden_caps() -> Capabilities {
    Capabilities::full("test-forbidden", 1)
        .transactions(false)
        .row_locking(false)
        .multi_process_writers(false)
}

/// A configuration tuned for tests: short lock timeout, tight polling,
/// zero snapshot retention.
#[must_use]
pub fn test_config() -> Config {
    Config::new(Duration::from_millis(500), Duration::ZERO)
        .lock_poll_interval(Duration::from_millis(5))
}

/// An engine over a fresh in-memory backend.
///
/// The backend handle is returned alongside the engine so tests can
/// assert on committed row counts directly.
#[must_use]
pub fn memory_engine() -> (InMemoryBackend, Arc<StateSync>) {
    memory_engine_with(recommended_caps())
}

/// An engine over an in-memory backend declaring the given capabilities.
///
/// # Panics
///
/// Panics if the capabilities are forbidden-tier; use
/// [`statesync_core::StateSync::initialize`] directly to test refusal.
#[must_use]
pub fn memory_engine_with(capabilities: Capabilities) -> (InMemoryBackend, Arc<StateSync>) {
    let backend = InMemoryBackend::with_capabilities(capabilities);
    let engine = StateSync::initialize(Arc::new(backend.clone()), test_config())
        .expect("fixture backend must initialize");
    (backend, Arc::new(engine))
}

/// Registers a snapshot for a simple definition and returns it.
pub fn register_fixture_snapshot(engine: &StateSync, name: &str, query: &str) -> Snapshot {
    engine
        .register_snapshot(
            &SnapshotDefinition::new(name, query),
            &MaterializationPlan::new(format!("warehouse.{name}")),
        )
        .expect("fixture snapshot must register")
}

/// Initializes tracing for tests, honoring `RUST_LOG`.
///
/// Safe to call from multiple tests; only the first call installs a
/// subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
