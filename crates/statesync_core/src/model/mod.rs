//! Persisted entities: environments, snapshots, intervals.

mod environment;
mod interval;
mod snapshot;

pub use environment::{Environment, PlanMetadata, PlanStatus};
pub use interval::{coalesce, subtract, Interval};
pub use snapshot::{Fingerprint, MaterializationPlan, Snapshot, SnapshotDefinition};
