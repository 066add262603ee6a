//! Stress helpers for concurrent engine scenarios.

use crate::fixtures::register_fixture_snapshot;
use statesync_core::{PromotionRequest, StateError, StateSync};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

/// Outcome counts from a promotion contention run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionStats {
    /// Promotions that committed.
    pub committed: u64,
    /// Conflicts observed (and retried).
    pub conflicts: u64,
}

/// Hammers one environment with `writers` threads, each committing
/// `rounds` promotions using the read/compare-and-swap retry loop.
///
/// Every writer eventually commits every round, so the returned stats
/// always show `committed == writers * rounds`; `conflicts` counts how
/// much contention the run produced. The final environment version is
/// `committed` plus however many promotions existed beforehand.
///
/// # Panics
///
/// Panics if a writer hits a non-retryable error.
#[must_use]
pub fn promotion_contention(engine: &Arc<StateSync>, name: &str, writers: u64, rounds: u64) -> PromotionStats {
    let mut handles = Vec::new();
    for writer in 0..writers {
        let engine = Arc::clone(engine);
        let name = name.to_string();
        handles.push(thread::spawn(move || {
            let mut stats = PromotionStats::default();
            for round in 0..rounds {
                let snapshot = register_fixture_snapshot(
                    &engine,
                    "orders",
                    &format!("SELECT {writer}, {round}"),
                );
                let mut mapping = BTreeMap::new();
                mapping.insert("orders".to_string(), snapshot.fingerprint);
                loop {
                    let based_on = engine
                        .environment(&name)
                        .expect("read must succeed")
                        .map(|env| env.version);
                    let mut request = PromotionRequest::create(mapping.clone());
                    request.based_on = based_on;
                    match engine.promote_environment(&name, request) {
                        Ok(_) => {
                            stats.committed += 1;
                            break;
                        }
                        Err(StateError::Conflict { .. }) => stats.conflicts += 1,
                        Err(other) => panic!("unexpected error under contention: {other}"),
                    }
                }
            }
            stats
        }));
    }

    let mut total = PromotionStats::default();
    for handle in handles {
        let stats = handle.join().expect("writer thread must not panic");
        total.committed += stats.committed;
        total.conflicts += stats.conflicts;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::memory_engine;

    #[test]
    fn every_writer_commits_every_round() {
        let (_backend, engine) = memory_engine();
        let stats = promotion_contention(&engine, "prod", 4, 3);
        assert_eq!(stats.committed, 12);

        let env = engine.environment("prod").unwrap().unwrap();
        assert_eq!(env.version, 12);
    }

    #[test]
    fn single_writer_sees_no_conflicts() {
        let (_backend, engine) = memory_engine();
        let stats = promotion_contention(&engine, "prod", 1, 5);
        assert_eq!(
            stats,
            PromotionStats {
                committed: 5,
                conflicts: 0,
            }
        );
    }
}
