//! Environments: named pointers to consistent sets of snapshots.

use crate::model::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Whether an environment's most recent plan has been fully applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStatus {
    /// A promotion has been planned but not yet applied.
    Pending,
    /// The last planned promotion is fully applied.
    Applied,
}

/// Metadata about the plan that produced an environment's current mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanMetadata {
    /// Identifier of the plan.
    pub plan_id: Uuid,
    /// Application status.
    pub status: PlanStatus,
}

impl PlanMetadata {
    /// Creates metadata for a freshly applied plan.
    #[must_use]
    pub fn applied() -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            status: PlanStatus::Applied,
        }
    }
}

/// A named, mutable pointer to the set of snapshots currently deployed to
/// one logical target (e.g. `"prod"`, `"dev-alice"`).
///
/// # Invariants
///
/// - At most one committed mapping is visible at a time; promotions replace
///   it atomically or leave the old mapping fully intact
/// - `version` increases by exactly one per committed promotion and is the
///   optimistic-concurrency token promotions must be based on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Unique environment name.
    pub name: String,
    /// Logical object name -> deployed snapshot fingerprint.
    pub mapping: BTreeMap<String, Fingerprint>,
    /// Optimistic concurrency version; starts at 1 on first promotion.
    pub version: u64,
    /// Creation time, unix epoch milliseconds.
    pub created_at: i64,
    /// Expiration time, unix epoch milliseconds; `None` means the
    /// environment never expires.
    pub expires_at: Option<i64>,
    /// Metadata for the plan behind the current mapping.
    pub plan: PlanMetadata,
}

impl Environment {
    /// True if the environment references the given fingerprint.
    #[must_use]
    pub fn references(&self, fingerprint: &Fingerprint) -> bool {
        self.mapping.values().any(|fp| fp == fingerprint)
    }

    /// True if the environment has expired as of `now` (epoch millis).
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn environment(expires_at: Option<i64>) -> Environment {
        let mut mapping = BTreeMap::new();
        mapping.insert("orders".to_string(), Fingerprint::new("abc"));
        Environment {
            name: "dev-alice".to_string(),
            mapping,
            version: 1,
            created_at: 0,
            expires_at,
            plan: PlanMetadata::applied(),
        }
    }

    #[test]
    fn references_checks_mapping_values() {
        let env = environment(None);
        assert!(env.references(&Fingerprint::new("abc")));
        assert!(!env.references(&Fingerprint::new("def")));
    }

    #[test]
    fn expiry() {
        assert!(!environment(None).is_expired(i64::MAX));
        assert!(environment(Some(100)).is_expired(100));
        assert!(!environment(Some(100)).is_expired(99));
    }

    #[test]
    fn plan_metadata_round_trips_as_json() {
        let plan = PlanMetadata::applied();
        let json = serde_json::to_string(&plan).unwrap();
        let back: PlanMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(plan, back);
    }
}
