//! Logical statement and row model.
//!
//! The state store never builds SQL strings. It speaks a small closed
//! vocabulary of logical statements against named tables; each backend is
//! responsible for translating that vocabulary into whatever its engine
//! executes. Keeping the vocabulary closed is what lets the core reason
//! about atomicity per statement.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::{BackendError, BackendResult};

/// Name of a logical table.
///
/// Table names are static: the core defines the full set at compile time
/// and backends may pre-create them or create them on `EnsureTable`.
pub type Table = &'static str;

/// A single column value.
///
/// `Null` is explicit rather than encoded as an absent column so that
/// backends with unsafe NULL handling fail the compatibility gate instead
/// of corrupting data silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// UTF-8 text.
    Text(String),
}

impl Value {
    /// Returns true if this value is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A row of named column values.
///
/// Column order is not significant; rows are compared by content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: BTreeMap<String, Value>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column value, replacing any previous value.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: Value) -> Self {
        self.columns.insert(column.into(), value);
        self
    }

    /// Returns the value of a column, if present.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Returns a required text column.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ColumnType`] if the column is missing or not
    /// text.
    pub fn require_text(&self, column: &str) -> BackendResult<&str> {
        match self.get(column) {
            Some(Value::Text(s)) => Ok(s),
            _ => Err(BackendError::column_type(column, "text")),
        }
    }

    /// Returns a required integer column.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ColumnType`] if the column is missing or not
    /// an integer.
    pub fn require_int(&self, column: &str) -> BackendResult<i64> {
        match self.get(column) {
            Some(Value::Int(i)) => Ok(*i),
            _ => Err(BackendError::column_type(column, "integer")),
        }
    }

    /// Returns a required boolean column.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ColumnType`] if the column is missing or not
    /// a boolean.
    pub fn require_bool(&self, column: &str) -> BackendResult<bool> {
        match self.get(column) {
            Some(Value::Bool(b)) => Ok(*b),
            _ => Err(BackendError::column_type(column, "boolean")),
        }
    }

    /// Returns an optional integer column, treating `Null` as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ColumnType`] if the column is present but
    /// neither `Null` nor an integer.
    pub fn optional_int(&self, column: &str) -> BackendResult<Option<i64>> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Int(i)) => Ok(Some(*i)),
            Some(_) => Err(BackendError::column_type(column, "integer or NULL")),
        }
    }
}

/// Row selection predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every row in the table.
    All,
    /// The row with exactly this key.
    Key(String),
    /// All rows whose key starts with this prefix.
    Prefix(String),
}

impl Filter {
    /// Returns true if `key` matches this filter.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Filter::All => true,
            Filter::Key(k) => key == k,
            Filter::Prefix(p) => key.starts_with(p.as_str()),
        }
    }
}

/// Lock behavior of a `Select`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockMode {
    /// Plain read; sees committed state plus the connection's own pending
    /// writes.
    None,
    /// Exclusive locking read (SELECT ... FOR UPDATE).
    ///
    /// Requires an active transaction. The lock is held until the
    /// transaction commits or rolls back. A `Key` filter locks its key
    /// even when no row exists yet, so lock-then-insert excludes
    /// concurrent creators. If another connection holds an overlapping
    /// lock, the read blocks up to `wait` and then fails with
    /// [`BackendError::LockContended`].
    Exclusive {
        /// Bounded wait before giving up on a contended lock.
        wait: Duration,
    },
}

/// A logical statement executed by a [`crate::Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Creates the table if it does not already exist.
    EnsureTable {
        /// Target table.
        table: Table,
    },
    /// Reads rows matching `filter`, optionally taking row locks.
    Select {
        /// Target table.
        table: Table,
        /// Which rows to read.
        filter: Filter,
        /// Whether to lock the matched rows.
        lock: LockMode,
    },
    /// Inserts or replaces keyed rows atomically.
    Upsert {
        /// Target table.
        table: Table,
        /// Key/row pairs to write.
        rows: Vec<(String, Row)>,
    },
    /// Deletes rows matching `filter`.
    Delete {
        /// Target table.
        table: Table,
        /// Which rows to delete.
        filter: Filter,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_typed_getters() {
        let row = Row::new()
            .with("name", Value::Text("prod".into()))
            .with("version", Value::Int(3))
            .with("dev", Value::Bool(false))
            .with("expires_at", Value::Null);

        assert_eq!(row.require_text("name").unwrap(), "prod");
        assert_eq!(row.require_int("version").unwrap(), 3);
        assert!(!row.require_bool("dev").unwrap());
        assert_eq!(row.optional_int("expires_at").unwrap(), None);
        assert_eq!(row.optional_int("missing").unwrap(), None);
    }

    #[test]
    fn row_type_mismatch_fails() {
        let row = Row::new().with("version", Value::Text("not a number".into()));
        assert!(row.require_int("version").is_err());
        assert!(row.require_text("absent").is_err());
        assert!(row.optional_int("version").is_err());
    }

    #[test]
    fn filter_matching() {
        assert!(Filter::All.matches("anything"));
        assert!(Filter::Key("prod".into()).matches("prod"));
        assert!(!Filter::Key("prod".into()).matches("prod2"));
        assert!(Filter::Prefix("abc:".into()).matches("abc:1"));
        assert!(!Filter::Prefix("abc:".into()).matches("abd:1"));
    }

    #[test]
    fn null_is_explicit() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int(0).is_null());
    }
}
