//! Error types for the state store.

use std::time::Duration;
use thiserror::Error;

/// Result type for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur in state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// The configured backend is forbidden by the compatibility gate.
    ///
    /// Fatal at startup; there is no retry.
    #[error("backend {backend} is not usable as a state store: missing {missing}")]
    Configuration {
        /// Backend identifier.
        backend: String,
        /// Comma-separated missing guarantees.
        missing: String,
    },

    /// An optimistic promotion lost to a concurrent committer.
    ///
    /// The caller must re-read the environment and retry with a request
    /// based on the fresh version.
    #[error(
        "promotion of {environment} conflicts: based on version {based_on}, \
         store has version {current}"
    )]
    Conflict {
        /// Environment name.
        environment: String,
        /// The version the request was derived from.
        based_on: u64,
        /// The version currently committed.
        current: u64,
    },

    /// An exclusive scope could not be acquired within the configured bound.
    ///
    /// Retryable with backoff.
    #[error("lock timeout on {key} after {waited:?}")]
    LockTimeout {
        /// The contended resource key.
        key: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A pending lock wait was cancelled before acquisition.
    #[error("operation cancelled while waiting for {key}")]
    Cancelled {
        /// The resource key being waited on.
        key: String,
    },

    /// A promotion referenced a snapshot fingerprint that does not exist.
    #[error("promotion of {environment} references missing snapshots: {fingerprints}")]
    MissingSnapshot {
        /// Environment being promoted.
        environment: String,
        /// Comma-separated missing fingerprints.
        fingerprints: String,
    },

    /// An interval operation named a fingerprint with no registered snapshot.
    #[error("unknown snapshot: {fingerprint}")]
    UnknownSnapshot {
        /// The absent fingerprint.
        fingerprint: String,
    },

    /// An operation requires a guarantee the backend cannot provide.
    ///
    /// Surfaced immediately, never silently downgraded to best effort.
    #[error("{operation} requires {required}, which backend {backend} does not provide")]
    CapabilityViolation {
        /// The attempted operation.
        operation: &'static str,
        /// The missing guarantee.
        required: &'static str,
        /// Backend identifier.
        backend: String,
    },

    /// An interval with `start >= end` was supplied.
    #[error("invalid interval: [{start}, {end})")]
    InvalidInterval {
        /// Inclusive start.
        start: i64,
        /// Exclusive end.
        end: i64,
    },

    /// A stored row could not be decoded into an entity.
    #[error("corrupt {entity} record for {key}: {message}")]
    CorruptRecord {
        /// Entity kind (environment, snapshot, interval).
        entity: &'static str,
        /// Row key.
        key: String,
        /// What failed to decode.
        message: String,
    },

    /// Backend error.
    #[error("backend error: {0}")]
    Backend(#[from] statesync_backend::BackendError),
}

impl StateError {
    /// Creates a corrupt-record error.
    pub fn corrupt_record(
        entity: &'static str,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::CorruptRecord {
            entity,
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns true if the caller may retry the operation.
    ///
    /// `Conflict` requires a fresh read first; `LockTimeout` should be
    /// retried with backoff. Everything else is fatal to the attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, StateError::Conflict { .. } | StateError::LockTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(StateError::Conflict {
            environment: "prod".into(),
            based_on: 1,
            current: 2,
        }
        .is_retryable());
        assert!(StateError::LockTimeout {
            key: "env/prod".into(),
            waited: Duration::from_secs(1),
        }
        .is_retryable());
        assert!(!StateError::UnknownSnapshot {
            fingerprint: "abc".into(),
        }
        .is_retryable());
        assert!(!StateError::Cancelled {
            key: "env/prod".into(),
        }
        .is_retryable());
    }

    #[test]
    fn error_display_names_context() {
        let err = StateError::Configuration {
            backend: "csvfile".into(),
            missing: "transactions, row locking".into(),
        };
        assert!(err.to_string().contains("csvfile"));
        assert!(err.to_string().contains("transactions"));

        let err = StateError::CapabilityViolation {
            operation: "promote_environment",
            required: "row locking",
            backend: "duckdb".into(),
        };
        assert!(err.to_string().contains("promote_environment"));
        assert!(err.to_string().contains("row locking"));
    }
}
