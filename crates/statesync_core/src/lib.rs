//! # statesync core
//!
//! Transactional state store for pipeline orchestration.
//!
//! This crate tracks what a data transformation pipeline has built, where,
//! and as of when: deployment [`Environment`]s, content-addressed
//! [`Snapshot`]s, and per-snapshot materialized [`Interval`]s. It provides:
//! - Atomic environment promotion with optimistic concurrency
//! - Idempotent snapshot registration keyed by fingerprint
//! - Interval recording with overlap merge and exact-range removal
//! - Exclusive scopes (row locks + transactions) safe for independent
//!   concurrent writers
//! - A compatibility gate that refuses backends unable to provide atomic
//!   row updates
//!
//! The store runs on any backend implementing the
//! [`statesync_backend::StateBackend`] contract. Entry point:
//! [`StateSync::initialize`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod engine;
mod error;
mod gate;
pub mod model;
mod schema;

pub use config::Config;
pub use coordinator::{Coordinator, ResourceKey};
pub use engine::{PromotionRequest, StateSync};
pub use error::{StateError, StateResult};
pub use gate::{classify, Classification, MissingCapability, Tier};
pub use model::{
    Environment, Fingerprint, Interval, MaterializationPlan, PlanMetadata, PlanStatus, Snapshot,
    SnapshotDefinition,
};
pub use schema::StateSchema;
