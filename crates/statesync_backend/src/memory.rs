//! In-memory backend for testing.

use crate::capabilities::Capabilities;
use crate::connection::{Connection, StateBackend};
use crate::error::{BackendError, BackendResult};
use crate::statement::{Filter, LockMode, Row, Statement, Table};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bounded wait applied to auto-commit writes that hit a held row lock.
const AUTOCOMMIT_LOCK_WAIT: Duration = Duration::from_secs(5);

type Tables = BTreeMap<Table, BTreeMap<String, Row>>;

struct Shared {
    capabilities: Capabilities,
    tables: Mutex<Tables>,
    /// Lock key -> holding connection id.
    locks: Mutex<BTreeMap<String, u64>>,
    lock_released: Condvar,
    next_conn: AtomicU64,
}

/// An in-memory backend with real transactions and advisory row locking.
///
/// This backend is the reference implementation of the connection contract
/// and is suitable for:
/// - Unit tests
/// - Integration tests exercising concurrent writers on threads
///
/// Writes inside a transaction are buffered per connection and applied
/// atomically at commit. Locking reads take advisory row locks that block
/// other locking reads (and auto-commit writes) on the same keys until the
/// transaction ends.
///
/// # Capability Overrides
///
/// [`InMemoryBackend::with_capabilities`] substitutes the declared descriptor
/// without changing runtime behavior, which lets tests drive the gate and
/// coordinator through every tier. By default the backend declares
/// transactions and row locking but not multi-process writers (it is a
/// single-process store).
///
/// # Example
///
/// ```rust
/// use statesync_backend::{InMemoryBackend, StateBackend, Statement};
///
/// let backend = InMemoryBackend::new();
/// let mut conn = backend.connect().unwrap();
/// conn.execute(&Statement::EnsureTable { table: "environments" }).unwrap();
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    shared: Arc<Shared>,
}


impl InMemoryBackend {
    /// Creates a backend with the default in-memory capability declaration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::full("memory", 4).multi_process_writers(false))
    }

    /// Creates a backend that declares the given capabilities.
    ///
    /// Runtime behavior is unchanged; only the declaration differs.
    #[must_use]
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            shared: Arc::new(Shared {
                capabilities,
                tables: Mutex::new(BTreeMap::new()),
                locks: Mutex::new(BTreeMap::new()),
                lock_released: Condvar::new(),
                next_conn: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the number of rows currently committed in `table`.
    ///
    /// Useful for test assertions.
    #[must_use]
    pub fn committed_rows(&self, table: Table) -> usize {
        self.shared
            .tables
            .lock()
            .get(table)
            .map(|t| t.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBackend for InMemoryBackend {
    fn capabilities(&self) -> &Capabilities {
        &self.shared.capabilities
    }

    fn connect(&self) -> BackendResult<Box<dyn Connection>> {
        let id = self.shared.next_conn.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            id,
            txn: None,
        }))
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("backend", &self.shared.capabilities.backend)
            .finish_non_exhaustive()
    }
}

enum BufferedWrite {
    Upsert {
        table: Table,
        rows: Vec<(String, Row)>,
    },
    Delete {
        table: Table,
        filter: Filter,
    },
}

struct TxnBuffer {
    writes: Vec<BufferedWrite>,
    held_locks: Vec<String>,
}

struct MemoryConnection {
    shared: Arc<Shared>,
    id: u64,
    txn: Option<TxnBuffer>,
}

impl MemoryConnection {
    fn lock_key(table: Table, key: &str) -> String {
        format!("{table}/{key}")
    }

    /// Acquires one advisory lock, blocking up to `wait`.
    fn acquire_lock(&self, lock_key: &str, wait: Duration) -> BackendResult<bool> {
        let deadline = Instant::now() + wait;
        let mut locks = self.shared.locks.lock();
        loop {
            match locks.get(lock_key) {
                None => {
                    locks.insert(lock_key.to_string(), self.id);
                    return Ok(true);
                }
                Some(holder) if *holder == self.id => return Ok(false),
                Some(_) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(BackendError::lock_contended(lock_key, wait));
                    }
                    self.shared.lock_released.wait_for(&mut locks, remaining);
                }
            }
        }
    }

    fn release_locks(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let mut locks = self.shared.locks.lock();
        for key in keys {
            if locks.get(key) == Some(&self.id) {
                locks.remove(key);
            }
        }
        drop(locks);
        self.shared.lock_released.notify_all();
    }

    /// Reads committed rows matching `filter`, then overlays this
    /// connection's buffered writes so a transaction sees its own effects.
    fn read(&self, table: Table, filter: &Filter) -> BackendResult<BTreeMap<String, Row>> {
        let tables = self.shared.tables.lock();
        let stored = tables
            .get(table)
            .ok_or_else(|| BackendError::unknown_table(table))?;

        let mut result: BTreeMap<String, Row> = stored
            .iter()
            .filter(|(key, _)| filter.matches(key))
            .map(|(key, row)| (key.clone(), row.clone()))
            .collect();
        drop(tables);

        if let Some(txn) = &self.txn {
            for write in &txn.writes {
                match write {
                    BufferedWrite::Upsert { table: t, rows } if *t == table => {
                        for (key, row) in rows {
                            if filter.matches(key) {
                                result.insert(key.clone(), row.clone());
                            }
                        }
                    }
                    BufferedWrite::Delete { table: t, filter: f } if *t == table => {
                        result.retain(|key, _| !f.matches(key));
                    }
                    _ => {}
                }
            }
        }

        Ok(result)
    }

    fn apply_to(tables: &mut Tables, write: &BufferedWrite) -> BackendResult<()> {
        match write {
            BufferedWrite::Upsert { table, rows } => {
                let stored = tables
                    .get_mut(*table)
                    .ok_or_else(|| BackendError::unknown_table(*table))?;
                for (key, row) in rows {
                    stored.insert(key.clone(), row.clone());
                }
            }
            BufferedWrite::Delete { table, filter } => {
                let stored = tables
                    .get_mut(*table)
                    .ok_or_else(|| BackendError::unknown_table(*table))?;
                stored.retain(|key, _| !filter.matches(key));
            }
        }
        Ok(())
    }

    /// Keys a write touches, used for auto-commit lock checks.
    fn write_keys(&self, write: &BufferedWrite) -> BackendResult<Vec<String>> {
        match write {
            BufferedWrite::Upsert { table, rows } => Ok(rows
                .iter()
                .map(|(key, _)| Self::lock_key(table, key))
                .collect()),
            BufferedWrite::Delete { table, filter } => {
                let matched = self.read(*table, filter)?;
                Ok(matched
                    .keys()
                    .map(|key| Self::lock_key(table, key))
                    .collect())
            }
        }
    }

    fn run_write(&mut self, write: BufferedWrite) -> BackendResult<()> {
        if let Some(txn) = &mut self.txn {
            // Validate the table exists now so the error surfaces at the
            // statement, not at commit.
            let tables = self.shared.tables.lock();
            let table = match &write {
                BufferedWrite::Upsert { table, .. } | BufferedWrite::Delete { table, .. } => *table,
            };
            if !tables.contains_key(table) {
                return Err(BackendError::unknown_table(table));
            }
            drop(tables);
            txn.writes.push(write);
            return Ok(());
        }

        // Auto-commit: respect row locks held by other transactions, then
        // apply the single statement atomically.
        let keys = self.write_keys(&write)?;
        let mut acquired = Vec::new();
        for key in &keys {
            match self.acquire_lock(key, AUTOCOMMIT_LOCK_WAIT) {
                Ok(true) => acquired.push(key.clone()),
                Ok(false) => {}
                Err(e) => {
                    self.release_locks(&acquired);
                    return Err(e);
                }
            }
        }
        let result = {
            let mut tables = self.shared.tables.lock();
            Self::apply_to(&mut tables, &write)
        };
        self.release_locks(&acquired);
        result
    }
}

impl Connection for MemoryConnection {
    fn execute(&mut self, statement: &Statement) -> BackendResult<Vec<Row>> {
        match statement {
            Statement::EnsureTable { table } => {
                self.shared.tables.lock().entry(*table).or_default();
                Ok(Vec::new())
            }
            Statement::Select {
                table,
                filter,
                lock,
            } => {
                let table = *table;
                if let LockMode::Exclusive { wait } = lock {
                    if self.txn.is_none() {
                        return Err(BackendError::NoActiveTransaction {
                            operation: "locking read",
                        });
                    }
                    // Lock the filtered keys before reading. A Key filter
                    // locks its key even when the row is absent, so a
                    // lock-then-insert pattern excludes concurrent creators.
                    let keys: Vec<String> = match filter {
                        Filter::Key(key) => vec![Self::lock_key(table, key)],
                        _ => self
                            .read(table, filter)?
                            .keys()
                            .map(|key| Self::lock_key(table, key))
                            .collect(),
                    };
                    for key in keys {
                        let newly = self.acquire_lock(&key, *wait)?;
                        if newly {
                            if let Some(txn) = &mut self.txn {
                                txn.held_locks.push(key);
                            }
                        }
                    }
                }
                Ok(self.read(table, filter)?.into_values().collect())
            }
            Statement::Upsert { table, rows } => {
                self.run_write(BufferedWrite::Upsert {
                    table: *table,
                    rows: rows.clone(),
                })?;
                Ok(Vec::new())
            }
            Statement::Delete { table, filter } => {
                self.run_write(BufferedWrite::Delete {
                    table: *table,
                    filter: filter.clone(),
                })?;
                Ok(Vec::new())
            }
        }
    }

    fn begin(&mut self) -> BackendResult<()> {
        if !self.shared.capabilities.supports_transactions {
            return Err(BackendError::TransactionsUnsupported);
        }
        if self.txn.is_some() {
            return Err(BackendError::TransactionAlreadyActive);
        }
        self.txn = Some(TxnBuffer {
            writes: Vec::new(),
            held_locks: Vec::new(),
        });
        Ok(())
    }

    fn commit(&mut self) -> BackendResult<()> {
        let txn = self.txn.take().ok_or(BackendError::NoActiveTransaction {
            operation: "commit",
        })?;
        let result = {
            let mut tables = self.shared.tables.lock();
            txn.writes
                .iter()
                .try_for_each(|write| Self::apply_to(&mut tables, write))
        };
        self.release_locks(&txn.held_locks);
        result
    }

    fn rollback(&mut self) -> BackendResult<()> {
        let txn = self.txn.take().ok_or(BackendError::NoActiveTransaction {
            operation: "rollback",
        })?;
        self.release_locks(&txn.held_locks);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        // Abandoned transactions roll back.
        if let Some(txn) = self.txn.take() {
            self.release_locks(&txn.held_locks);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::Value;
    use std::thread;

    fn row(version: i64) -> Row {
        Row::new().with("version", Value::Int(version))
    }

    fn setup() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        let mut conn = backend.connect().unwrap();
        conn.execute(&Statement::EnsureTable { table: "t" }).unwrap();
        backend
    }

    fn upsert(table: Table, key: &str, r: Row) -> Statement {
        Statement::Upsert {
            table,
            rows: vec![(key.to_string(), r)],
        }
    }

    fn select(table: Table, filter: Filter) -> Statement {
        Statement::Select {
            table,
            filter,
            lock: LockMode::None,
        }
    }

    #[test]
    fn autocommit_upsert_and_select() {
        let backend = setup();
        let mut conn = backend.connect().unwrap();
        conn.execute(&upsert("t", "a", row(1))).unwrap();

        let rows = conn.execute(&select("t", Filter::Key("a".into()))).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].require_int("version").unwrap(), 1);
    }

    #[test]
    fn unknown_table_fails() {
        let backend = setup();
        let mut conn = backend.connect().unwrap();
        let result = conn.execute(&select("missing", Filter::All));
        assert!(matches!(result, Err(BackendError::UnknownTable { .. })));
    }

    #[test]
    fn transaction_buffers_until_commit() {
        let backend = setup();
        let mut writer = backend.connect().unwrap();
        let mut reader = backend.connect().unwrap();

        writer.begin().unwrap();
        writer.execute(&upsert("t", "a", row(1))).unwrap();

        // Writer sees its own write; reader does not.
        assert_eq!(
            writer
                .execute(&select("t", Filter::Key("a".into())))
                .unwrap()
                .len(),
            1
        );
        assert!(reader
            .execute(&select("t", Filter::Key("a".into())))
            .unwrap()
            .is_empty());

        writer.commit().unwrap();
        assert_eq!(
            reader
                .execute(&select("t", Filter::Key("a".into())))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn rollback_discards_writes() {
        let backend = setup();
        let mut conn = backend.connect().unwrap();
        conn.begin().unwrap();
        conn.execute(&upsert("t", "a", row(1))).unwrap();
        conn.rollback().unwrap();

        assert_eq!(backend.committed_rows("t"), 0);
    }

    #[test]
    fn drop_mid_transaction_rolls_back() {
        let backend = setup();
        {
            let mut conn = backend.connect().unwrap();
            conn.begin().unwrap();
            conn.execute(&upsert("t", "a", row(1))).unwrap();
        }
        assert_eq!(backend.committed_rows("t"), 0);
    }

    #[test]
    fn locking_read_requires_transaction() {
        let backend = setup();
        let mut conn = backend.connect().unwrap();
        let result = conn.execute(&Statement::Select {
            table: "t",
            filter: Filter::Key("a".into()),
            lock: LockMode::Exclusive {
                wait: Duration::from_millis(10),
            },
        });
        assert!(matches!(
            result,
            Err(BackendError::NoActiveTransaction { .. })
        ));
    }

    #[test]
    fn contended_lock_times_out() {
        let backend = setup();
        let mut holder = backend.connect().unwrap();
        holder.begin().unwrap();
        holder
            .execute(&Statement::Select {
                table: "t",
                filter: Filter::Key("a".into()),
                lock: LockMode::Exclusive {
                    wait: Duration::from_millis(10),
                },
            })
            .unwrap();

        let mut waiter = backend.connect().unwrap();
        waiter.begin().unwrap();
        let result = waiter.execute(&Statement::Select {
            table: "t",
            filter: Filter::Key("a".into()),
            lock: LockMode::Exclusive {
                wait: Duration::from_millis(25),
            },
        });
        assert!(matches!(result, Err(BackendError::LockContended { .. })));
    }

    #[test]
    fn lock_released_on_commit_unblocks_waiter() {
        let backend = setup();
        let mut holder = backend.connect().unwrap();
        holder.begin().unwrap();
        holder
            .execute(&Statement::Select {
                table: "t",
                filter: Filter::Key("a".into()),
                lock: LockMode::Exclusive {
                    wait: Duration::from_millis(10),
                },
            })
            .unwrap();
        holder.execute(&upsert("t", "a", row(1))).unwrap();

        let waiter_backend = backend.clone();
        let handle = thread::spawn(move || {
            let mut waiter = waiter_backend.connect().unwrap();
            waiter.begin().unwrap();
            let rows = waiter
                .execute(&Statement::Select {
                    table: "t",
                    filter: Filter::Key("a".into()),
                    lock: LockMode::Exclusive {
                        wait: Duration::from_secs(5),
                    },
                })
                .unwrap();
            waiter.rollback().unwrap();
            rows.len()
        });

        thread::sleep(Duration::from_millis(50));
        holder.commit().unwrap();

        // Waiter acquires after release and sees the committed row.
        assert_eq!(handle.join().unwrap(), 1);
    }

    #[test]
    fn reacquiring_own_lock_is_free() {
        let backend = setup();
        let mut conn = backend.connect().unwrap();
        conn.begin().unwrap();
        let stmt = Statement::Select {
            table: "t",
            filter: Filter::Key("a".into()),
            lock: LockMode::Exclusive {
                wait: Duration::from_millis(10),
            },
        };
        conn.execute(&stmt).unwrap();
        conn.execute(&stmt).unwrap();
        conn.commit().unwrap();
    }

    #[test]
    fn begin_refused_without_transaction_capability() {
        let backend = InMemoryBackend::with_capabilities(
            Capabilities::full("memory", 1).transactions(false),
        );
        let mut conn = backend.connect().unwrap();
        assert!(matches!(
            conn.begin(),
            Err(BackendError::TransactionsUnsupported)
        ));
    }

    #[test]
    fn delete_with_prefix_filter() {
        let backend = setup();
        let mut conn = backend.connect().unwrap();
        conn.execute(&upsert("t", "fp1/0", row(1))).unwrap();
        conn.execute(&upsert("t", "fp1/5", row(1))).unwrap();
        conn.execute(&upsert("t", "fp2/0", row(1))).unwrap();

        conn.execute(&Statement::Delete {
            table: "t",
            filter: Filter::Prefix("fp1/".into()),
        })
        .unwrap();

        assert_eq!(backend.committed_rows("t"), 1);
    }

    #[test]
    fn transactional_delete_then_upsert_ordering() {
        let backend = setup();
        let mut conn = backend.connect().unwrap();
        conn.execute(&upsert("t", "a", row(1))).unwrap();

        conn.begin().unwrap();
        conn.execute(&Statement::Delete {
            table: "t",
            filter: Filter::Key("a".into()),
        })
        .unwrap();
        conn.execute(&upsert("t", "a", row(2))).unwrap();
        conn.commit().unwrap();

        let mut reader = backend.connect().unwrap();
        let rows = reader
            .execute(&select("t", Filter::Key("a".into())))
            .unwrap();
        assert_eq!(rows[0].require_int("version").unwrap(), 2);
    }
}
