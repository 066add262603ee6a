//! Error types for backend operations.

use std::time::Duration;
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur while executing statements against a backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The statement referenced a table the backend does not know.
    #[error("unknown table: {table}")]
    UnknownTable {
        /// Name of the missing table.
        table: String,
    },

    /// A row lock could not be acquired within the bounded wait.
    #[error("lock contended on {key}: gave up after {waited:?}")]
    LockContended {
        /// The contended lock key.
        key: String,
        /// How long the connection waited before giving up.
        waited: Duration,
    },

    /// A statement required an active transaction but none was open.
    #[error("no active transaction for {operation}")]
    NoActiveTransaction {
        /// The operation that required a transaction.
        operation: &'static str,
    },

    /// `begin` was called while a transaction was already active.
    #[error("transaction already active")]
    TransactionAlreadyActive,

    /// The backend does not provide transactions.
    #[error("backend does not support transactions")]
    TransactionsUnsupported,

    /// A stored row did not have the expected shape.
    #[error("column {column} is missing or not {expected}")]
    ColumnType {
        /// The offending column.
        column: String,
        /// The expected type.
        expected: &'static str,
    },

    /// The connection has been closed.
    #[error("connection is closed")]
    Closed,
}

impl BackendError {
    /// Creates an unknown-table error.
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    /// Creates a lock-contended error.
    pub fn lock_contended(key: impl Into<String>, waited: Duration) -> Self {
        Self::LockContended {
            key: key.into(),
            waited,
        }
    }

    /// Creates a column-type error.
    pub fn column_type(column: impl Into<String>, expected: &'static str) -> Self {
        Self::ColumnType {
            column: column.into(),
            expected,
        }
    }
}
