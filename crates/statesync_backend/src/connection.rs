//! Backend and connection traits.

use crate::capabilities::Capabilities;
use crate::error::BackendResult;
use crate::statement::{Row, Statement};

/// A configured backend that can hand out connections.
///
/// Backends are shared across threads; each caller obtains its own
/// [`Connection`] so that transactions and row locks are scoped to one
/// logical session. The capability descriptor is static for the lifetime of
/// the backend.
pub trait StateBackend: Send + Sync {
    /// Returns the backend's static capability declaration.
    fn capabilities(&self) -> &Capabilities;

    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot produce a session (e.g. it
    /// has been shut down).
    fn connect(&self) -> BackendResult<Box<dyn Connection>>;
}

/// A single logical session against a backend.
///
/// # Invariants
///
/// - A statement executed outside a transaction is atomic on its own
///   (auto-commit)
/// - `Select` with [`crate::LockMode::Exclusive`] requires an active
///   transaction and holds its lock until `commit` or `rollback`
/// - Writes buffered inside a transaction are visible to reads on the same
///   connection and invisible to every other connection until commit
/// - Dropping a connection mid-transaction discards buffered writes and
///   releases its locks
///
/// Connections are not `Sync`: one session belongs to one caller at a time.
pub trait Connection: Send {
    /// Executes a logical statement, returning any matched rows.
    ///
    /// `EnsureTable`, `Upsert`, and `Delete` return an empty row set.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement is malformed for this backend, a
    /// lock wait expires, or a locking read is attempted outside a
    /// transaction.
    fn execute(&mut self, statement: &Statement) -> BackendResult<Vec<Row>>;

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackendError::TransactionsUnsupported`] if the
    /// backend lacks transactions, or
    /// [`crate::BackendError::TransactionAlreadyActive`] if one is open.
    fn begin(&mut self) -> BackendResult<()>;

    /// Commits the active transaction, applying all buffered writes
    /// atomically and releasing held locks.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is active or the commit fails.
    fn commit(&mut self) -> BackendResult<()>;

    /// Rolls back the active transaction, discarding buffered writes and
    /// releasing held locks.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is active.
    fn rollback(&mut self) -> BackendResult<()>;

    /// Returns true if a transaction is currently active.
    fn in_transaction(&self) -> bool;
}
