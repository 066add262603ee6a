//! Schema model: entity persistence over the logical tables.
//!
//! Three entity tables plus an advisory lock namespace:
//! - `environments`, keyed by name
//! - `snapshots`, keyed by fingerprint
//! - `intervals`, keyed by `fingerprint/start/flavor`
//! - `locks`, rowless; the coordinator takes locking reads on its keys
//!
//! All translation between entities and rows lives here. Nothing above
//! this module builds statements, and nothing below it knows what an
//! environment is.

use crate::error::{StateError, StateResult};
use crate::model::{
    coalesce, subtract, Environment, Fingerprint, Interval, PlanMetadata, Snapshot,
};
use statesync_backend::{Connection, Filter, LockMode, Row, Statement, Table, Value};
use std::collections::BTreeMap;
use std::ops::Range;
use std::time::Duration;

/// Environments table.
pub const ENVIRONMENTS: Table = "environments";
/// Snapshots table.
pub const SNAPSHOTS: Table = "snapshots";
/// Intervals table.
pub const INTERVALS: Table = "intervals";
/// Advisory lock key namespace used by the coordinator.
pub const LOCKS: Table = "locks";

/// Every table the store needs; ensured once at initialization.
pub const ALL_TABLES: [Table; 4] = [ENVIRONMENTS, SNAPSHOTS, INTERVALS, LOCKS];

/// Entity reads and writes over one connection.
///
/// A `StateSchema` borrows a connection for the duration of one operation
/// or exclusive scope. It performs no locking or transaction management of
/// its own beyond what each statement implies; scopes belong to the
/// coordinator.
pub struct StateSchema<'a> {
    conn: &'a mut dyn Connection,
    lock_wait: Duration,
}

impl<'a> StateSchema<'a> {
    /// Wraps a connection.
    ///
    /// `lock_wait` bounds each locking read issued through this schema.
    pub fn new(conn: &'a mut dyn Connection, lock_wait: Duration) -> Self {
        Self { conn, lock_wait }
    }

    /// Creates all tables that do not yet exist.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub fn ensure_tables(&mut self) -> StateResult<()> {
        for table in ALL_TABLES {
            self.conn.execute(&Statement::EnsureTable { table })?;
        }
        Ok(())
    }

    // --- environments ---

    /// Reads an environment by name.
    ///
    /// With `lock_for_update` the read takes an exclusive row lock held
    /// until the enclosing transaction ends. The coordinator guarantees
    /// the backend supports row locking before any locking read happens
    /// here; this method never degrades the flag silently.
    ///
    /// # Errors
    ///
    /// Propagates backend errors; returns [`StateError::CorruptRecord`] if
    /// the stored row cannot be decoded.
    pub fn read_environment(
        &mut self,
        name: &str,
        lock_for_update: bool,
    ) -> StateResult<Option<Environment>> {
        let lock = if lock_for_update {
            LockMode::Exclusive {
                wait: self.lock_wait,
            }
        } else {
            LockMode::None
        };
        let rows = self.conn.execute(&Statement::Select {
            table: ENVIRONMENTS,
            filter: Filter::Key(name.to_string()),
            lock,
        })?;
        rows.first().map(decode_environment).transpose()
    }

    /// Reads every environment.
    pub fn list_environments(&mut self) -> StateResult<Vec<Environment>> {
        let rows = self.conn.execute(&Statement::Select {
            table: ENVIRONMENTS,
            filter: Filter::All,
            lock: LockMode::None,
        })?;
        rows.iter().map(decode_environment).collect()
    }

    /// Upserts an environment atomically.
    pub fn write_environment(&mut self, environment: &Environment) -> StateResult<()> {
        let row = encode_environment(environment)?;
        self.conn.execute(&Statement::Upsert {
            table: ENVIRONMENTS,
            rows: vec![(environment.name.clone(), row)],
        })?;
        Ok(())
    }

    /// Deletes an environment. Returns true if it existed.
    pub fn delete_environment(&mut self, name: &str) -> StateResult<bool> {
        let existed = self.read_environment(name, false)?.is_some();
        if existed {
            self.conn.execute(&Statement::Delete {
                table: ENVIRONMENTS,
                filter: Filter::Key(name.to_string()),
            })?;
        }
        Ok(existed)
    }

    // --- snapshots ---

    /// Reads a snapshot by fingerprint.
    pub fn read_snapshot(&mut self, fingerprint: &Fingerprint) -> StateResult<Option<Snapshot>> {
        let rows = self.conn.execute(&Statement::Select {
            table: SNAPSHOTS,
            filter: Filter::Key(fingerprint.as_str().to_string()),
            lock: LockMode::None,
        })?;
        rows.first().map(decode_snapshot).transpose()
    }

    /// Reads the snapshots for the given fingerprints; absent fingerprints
    /// are simply not in the result.
    pub fn read_snapshots(&mut self, fingerprints: &[Fingerprint]) -> StateResult<Vec<Snapshot>> {
        let mut snapshots = Vec::with_capacity(fingerprints.len());
        for fingerprint in fingerprints {
            if let Some(snapshot) = self.read_snapshot(fingerprint)? {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    /// Reads every snapshot.
    pub fn list_snapshots(&mut self) -> StateResult<Vec<Snapshot>> {
        let rows = self.conn.execute(&Statement::Select {
            table: SNAPSHOTS,
            filter: Filter::All,
            lock: LockMode::None,
        })?;
        rows.iter().map(decode_snapshot).collect()
    }

    /// Upserts a set of snapshots atomically.
    pub fn write_snapshots(&mut self, snapshots: &[Snapshot]) -> StateResult<()> {
        if snapshots.is_empty() {
            return Ok(());
        }
        let rows = snapshots
            .iter()
            .map(|s| (s.fingerprint.as_str().to_string(), encode_snapshot(s)))
            .collect();
        self.conn.execute(&Statement::Upsert {
            table: SNAPSHOTS,
            rows,
        })?;
        Ok(())
    }

    /// Deletes a snapshot and all of its intervals.
    pub fn delete_snapshot(&mut self, fingerprint: &Fingerprint) -> StateResult<()> {
        self.conn.execute(&Statement::Delete {
            table: SNAPSHOTS,
            filter: Filter::Key(fingerprint.as_str().to_string()),
        })?;
        self.conn.execute(&Statement::Delete {
            table: INTERVALS,
            filter: Filter::Prefix(interval_prefix(fingerprint)),
        })?;
        Ok(())
    }

    // --- intervals ---

    /// Reads a snapshot's coverage, ordered by start.
    pub fn read_intervals(&mut self, fingerprint: &Fingerprint) -> StateResult<Vec<Interval>> {
        let rows = self.conn.execute(&Statement::Select {
            table: INTERVALS,
            filter: Filter::Prefix(interval_prefix(fingerprint)),
            lock: LockMode::None,
        })?;
        let mut intervals = rows
            .iter()
            .map(decode_interval)
            .collect::<StateResult<Vec<_>>>()?;
        intervals.sort_by_key(|i| (i.start, i.dev_preview, i.end));
        Ok(intervals)
    }

    /// Records intervals, merging overlapping or adjacent ranges into the
    /// minimal covering set before persisting. Returns the new coverage.
    pub fn record_intervals(
        &mut self,
        fingerprint: &Fingerprint,
        new: Vec<Interval>,
    ) -> StateResult<Vec<Interval>> {
        let mut intervals = self.read_intervals(fingerprint)?;
        intervals.extend(new);
        let merged = coalesce(intervals);
        self.replace_intervals(fingerprint, &merged)?;
        Ok(merged)
    }

    /// Removes exactly `range` from a snapshot's coverage, splitting stored
    /// intervals as needed. Returns the remaining coverage.
    pub fn remove_interval(
        &mut self,
        fingerprint: &Fingerprint,
        range: &Range<i64>,
    ) -> StateResult<Vec<Interval>> {
        let intervals = self.read_intervals(fingerprint)?;
        let remaining = subtract(intervals, range);
        self.replace_intervals(fingerprint, &remaining)?;
        Ok(remaining)
    }

    fn replace_intervals(
        &mut self,
        fingerprint: &Fingerprint,
        intervals: &[Interval],
    ) -> StateResult<()> {
        self.conn.execute(&Statement::Delete {
            table: INTERVALS,
            filter: Filter::Prefix(interval_prefix(fingerprint)),
        })?;
        if intervals.is_empty() {
            return Ok(());
        }
        let rows = intervals
            .iter()
            .map(|i| (interval_key(fingerprint, i), encode_interval(fingerprint, i)))
            .collect();
        self.conn.execute(&Statement::Upsert {
            table: INTERVALS,
            rows,
        })?;
        Ok(())
    }
}

fn interval_prefix(fingerprint: &Fingerprint) -> String {
    format!("{fingerprint}/")
}

fn interval_key(fingerprint: &Fingerprint, interval: &Interval) -> String {
    // Start and flavor identify an interval within a coalesced set.
    let flavor = if interval.dev_preview { "dev" } else { "prod" };
    format!("{fingerprint}/{}/{flavor}", interval.start)
}

fn encode_environment(environment: &Environment) -> StateResult<Row> {
    let mapping = serde_json::to_string(&environment.mapping).map_err(|e| {
        StateError::corrupt_record("environment", &environment.name, e.to_string())
    })?;
    let plan = serde_json::to_string(&environment.plan).map_err(|e| {
        StateError::corrupt_record("environment", &environment.name, e.to_string())
    })?;
    let version = i64::try_from(environment.version).map_err(|_| {
        StateError::corrupt_record("environment", &environment.name, "version exceeds i64 range")
    })?;
    Ok(Row::new()
        .with("name", Value::Text(environment.name.clone()))
        .with("mapping", Value::Text(mapping))
        .with("version", Value::Int(version))
        .with("created_at", Value::Int(environment.created_at))
        .with(
            "expires_at",
            environment.expires_at.map_or(Value::Null, Value::Int),
        )
        .with("plan", Value::Text(plan)))
}

fn decode_environment(row: &Row) -> StateResult<Environment> {
    let name = row.require_text("name")?.to_string();
    let mapping: BTreeMap<String, Fingerprint> =
        serde_json::from_str(row.require_text("mapping")?)
            .map_err(|e| StateError::corrupt_record("environment", &name, e.to_string()))?;
    let plan: PlanMetadata = serde_json::from_str(row.require_text("plan")?)
        .map_err(|e| StateError::corrupt_record("environment", &name, e.to_string()))?;
    let version = u64::try_from(row.require_int("version")?)
        .map_err(|_| StateError::corrupt_record("environment", &name, "negative version"))?;
    Ok(Environment {
        mapping,
        version,
        created_at: row.require_int("created_at")?,
        expires_at: row.optional_int("expires_at")?,
        plan,
        name,
    })
}

fn encode_snapshot(snapshot: &Snapshot) -> Row {
    Row::new()
        .with(
            "fingerprint",
            Value::Text(snapshot.fingerprint.as_str().to_string()),
        )
        .with("name", Value::Text(snapshot.name.clone()))
        .with(
            "storage_locator",
            Value::Text(snapshot.storage_locator.clone()),
        )
        .with("created_at", Value::Int(snapshot.created_at))
}

fn decode_snapshot(row: &Row) -> StateResult<Snapshot> {
    Ok(Snapshot {
        fingerprint: Fingerprint::new(row.require_text("fingerprint")?),
        name: row.require_text("name")?.to_string(),
        storage_locator: row.require_text("storage_locator")?.to_string(),
        created_at: row.require_int("created_at")?,
    })
}

fn encode_interval(fingerprint: &Fingerprint, interval: &Interval) -> Row {
    Row::new()
        .with(
            "fingerprint",
            Value::Text(fingerprint.as_str().to_string()),
        )
        .with("start", Value::Int(interval.start))
        .with("end", Value::Int(interval.end))
        .with("dev_preview", Value::Bool(interval.dev_preview))
}

fn decode_interval(row: &Row) -> StateResult<Interval> {
    Ok(Interval {
        start: row.require_int("start")?,
        end: row.require_int("end")?,
        dev_preview: row.require_bool("dev_preview")?,
    })
}
