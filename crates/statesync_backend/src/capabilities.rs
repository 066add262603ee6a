//! Static backend capability declaration.

/// Declares what transactional guarantees a backend provides.
///
/// A `Capabilities` value is supplied by whoever configures the backend and
/// is treated as ground truth: the store never probes a live connection to
/// discover guarantees, because inference from query results is unreliable
/// and hides true failures.
///
/// The compatibility gate in `statesync_core` classifies this value once at
/// startup; the coordinator consults it before every operation that depends
/// on atomicity or row exclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Identifier for the backend (e.g. `"postgres"`, `"memory"`).
    ///
    /// Used in the gate's warning message and in error context; carries no
    /// semantics beyond display.
    pub backend: String,

    /// Whether the backend supports `begin`/`commit`/`rollback`.
    pub supports_transactions: bool,

    /// Whether a locking read holds an exclusive row lock until the
    /// enclosing transaction ends.
    pub supports_row_locking: bool,

    /// Whether independent processes can safely write concurrently.
    pub supports_multi_process_writers: bool,

    /// Whether NULL values round-trip without being coerced or corrupted.
    pub safe_nullable_columns: bool,

    /// Maximum number of concurrent tasks the backend handles safely.
    pub max_concurrent_tasks: u32,
}

impl Capabilities {
    /// Creates a descriptor with every guarantee enabled.
    ///
    /// Intended as a starting point for builders; real backends should
    /// disable whatever they do not actually provide.
    #[must_use]
    pub fn full(backend: impl Into<String>, max_concurrent_tasks: u32) -> Self {
        Self {
            backend: backend.into(),
            supports_transactions: true,
            supports_row_locking: true,
            supports_multi_process_writers: true,
            safe_nullable_columns: true,
            max_concurrent_tasks,
        }
    }

    /// Sets whether transactions are supported.
    #[must_use]
    pub fn transactions(mut self, value: bool) -> Self {
        self.supports_transactions = value;
        self
    }

    /// Sets whether row locking is supported.
    #[must_use]
    pub fn row_locking(mut self, value: bool) -> Self {
        self.supports_row_locking = value;
        self
    }

    /// Sets whether multi-process writers are safe.
    #[must_use]
    pub fn multi_process_writers(mut self, value: bool) -> Self {
        self.supports_multi_process_writers = value;
        self
    }

    /// Sets whether nullable columns are handled safely.
    #[must_use]
    pub fn nullable_columns(mut self, value: bool) -> Self {
        self.safe_nullable_columns = value;
        self
    }

    /// Sets the maximum number of concurrent tasks.
    #[must_use]
    pub fn concurrent_tasks(mut self, value: u32) -> Self {
        self.max_concurrent_tasks = value;
        self
    }

    /// True if the backend can provide atomic multi-row updates with row
    /// exclusion - the minimum bar for any mutating operation.
    #[must_use]
    pub fn supports_exclusive_scopes(&self) -> bool {
        self.supports_transactions && self.supports_row_locking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_enables_everything() {
        let caps = Capabilities::full("postgres", 8);
        assert!(caps.supports_transactions);
        assert!(caps.supports_row_locking);
        assert!(caps.supports_multi_process_writers);
        assert!(caps.safe_nullable_columns);
        assert_eq!(caps.max_concurrent_tasks, 8);
        assert!(caps.supports_exclusive_scopes());
    }

    #[test]
    fn builder_disables_guarantees() {
        let caps = Capabilities::full("duckdb", 1)
            .row_locking(false)
            .multi_process_writers(false);
        assert!(!caps.supports_row_locking);
        assert!(!caps.supports_multi_process_writers);
        assert!(!caps.supports_exclusive_scopes());
    }

    #[test]
    fn exclusive_scopes_need_both_guarantees() {
        let caps = Capabilities::full("x", 4).transactions(false);
        assert!(!caps.supports_exclusive_scopes());

        let caps = Capabilities::full("x", 4).row_locking(false);
        assert!(!caps.supports_exclusive_scopes());
    }
}
