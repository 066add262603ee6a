//! Backend compatibility gate.
//!
//! A purely static classification of a capability descriptor into one of
//! three tiers. The gate never probes a live connection; what the
//! descriptor declares is what the backend is.

use crate::config::Config;
use statesync_backend::Capabilities;
use std::fmt;

/// Compatibility tier of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Full guarantees at useful concurrency; silent startup.
    Recommended,
    /// Functional but missing recommended guarantees; startup emits one
    /// structured warning.
    AllowedWithWarning,
    /// Missing atomic row operations or safe NULL semantics; the engine
    /// refuses to initialize.
    Forbidden,
}

/// A guarantee the backend does not provide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingCapability {
    /// No transaction support.
    Transactions,
    /// No exclusive row locking.
    RowLocking,
    /// NULL values are coerced or corrupted.
    SafeNullableColumns,
    /// Independent processes cannot write concurrently.
    MultiProcessWriters,
    /// Concurrency is below the recommended threshold.
    ConcurrencyBelowThreshold {
        /// Declared maximum concurrent tasks.
        actual: u32,
        /// Configured recommendation threshold.
        threshold: u32,
    },
}

impl fmt::Display for MissingCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingCapability::Transactions => write!(f, "transactions"),
            MissingCapability::RowLocking => write!(f, "row locking"),
            MissingCapability::SafeNullableColumns => write!(f, "safe nullable columns"),
            MissingCapability::MultiProcessWriters => write!(f, "multi-process writers"),
            MissingCapability::ConcurrencyBelowThreshold { actual, threshold } => {
                write!(f, "concurrency >= {threshold} (declared: {actual})")
            }
        }
    }
}

/// Result of classifying a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// The assigned tier.
    pub tier: Tier,
    /// Every missing guarantee, hard and soft.
    pub missing: Vec<MissingCapability>,
}

impl Classification {
    /// Missing guarantees as a comma-separated list for messages.
    #[must_use]
    pub fn missing_list(&self) -> String {
        self.missing
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Classifies a capability descriptor.
///
/// Hard requirements (transactions, row locking, safe NULLs) decide
/// forbidden; soft requirements (multi-process writers, concurrency at or
/// above the configured threshold) decide warning versus recommended.
#[must_use]
pub fn classify(capabilities: &Capabilities, config: &Config) -> Classification {
    let mut hard = Vec::new();
    if !capabilities.supports_transactions {
        hard.push(MissingCapability::Transactions);
    }
    if !capabilities.supports_row_locking {
        hard.push(MissingCapability::RowLocking);
    }
    if !capabilities.safe_nullable_columns {
        hard.push(MissingCapability::SafeNullableColumns);
    }

    let mut soft = Vec::new();
    if !capabilities.supports_multi_process_writers {
        soft.push(MissingCapability::MultiProcessWriters);
    }
    if capabilities.max_concurrent_tasks < config.recommended_concurrency {
        soft.push(MissingCapability::ConcurrencyBelowThreshold {
            actual: capabilities.max_concurrent_tasks,
            threshold: config.recommended_concurrency,
        });
    }

    let tier = if !hard.is_empty() {
        Tier::Forbidden
    } else if !soft.is_empty() {
        Tier::AllowedWithWarning
    } else {
        Tier::Recommended
    };

    let mut missing = hard;
    missing.extend(soft);
    Classification { tier, missing }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> Config {
        Config::new(Duration::from_secs(1), Duration::ZERO)
    }

    #[test]
    fn full_guarantees_at_concurrency_four_is_recommended() {
        let caps = Capabilities::full("postgres", 4);
        let classification = classify(&caps, &config());
        assert_eq!(classification.tier, Tier::Recommended);
        assert!(classification.missing.is_empty());
    }

    #[test]
    fn nothing_at_all_is_forbidden_naming_transactions_and_locking() {
        let caps = Capabilities::full("csvfile", 1)
            .transactions(false)
            .row_locking(false)
            .multi_process_writers(false);
        let classification = classify(&caps, &config());
        assert_eq!(classification.tier, Tier::Forbidden);
        assert!(classification.missing.contains(&MissingCapability::Transactions));
        assert!(classification.missing.contains(&MissingCapability::RowLocking));
        let list = classification.missing_list();
        assert!(list.contains("transactions"));
        assert!(list.contains("row locking"));
    }

    #[test]
    fn unsafe_nulls_alone_are_forbidden() {
        let caps = Capabilities::full("legacy", 4).nullable_columns(false);
        assert_eq!(classify(&caps, &config()).tier, Tier::Forbidden);
    }

    #[test]
    fn single_task_multi_writer_backend_warns() {
        let caps = Capabilities::full("duckdb", 1);
        let classification = classify(&caps, &config());
        assert_eq!(classification.tier, Tier::AllowedWithWarning);
        assert_eq!(
            classification.missing,
            vec![MissingCapability::ConcurrencyBelowThreshold {
                actual: 1,
                threshold: 2,
            }]
        );
    }

    #[test]
    fn single_process_backend_warns() {
        let caps = Capabilities::full("sqlite", 4).multi_process_writers(false);
        let classification = classify(&caps, &config());
        assert_eq!(classification.tier, Tier::AllowedWithWarning);
        assert!(classification
            .missing
            .contains(&MissingCapability::MultiProcessWriters));
    }

    #[test]
    fn threshold_is_configurable() {
        let caps = Capabilities::full("postgres", 4);
        let strict = config().recommended_concurrency(8);
        assert_eq!(classify(&caps, &strict).tier, Tier::AllowedWithWarning);
    }
}
