//! # statesync backend
//!
//! Backend connection contract for the statesync state store.
//!
//! This crate defines the lowest-level abstraction the state store runs on:
//! a generic statement-executing connection plus a static declaration of the
//! backend's transactional guarantees.
//!
//! ## Design Principles
//!
//! - Backends are dumb executors of a small logical statement vocabulary -
//!   they never interpret entity semantics, which belong to `statesync_core`
//! - Capabilities are declared up front, never probed at runtime; probing
//!   hides real failures behind lucky query results
//! - Locking reads require an active transaction and hold their lock until
//!   the transaction ends
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - full reference implementation with transactions
//!   and advisory row locking, used throughout the test suites

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod capabilities;
mod connection;
mod error;
mod memory;
mod statement;

pub use capabilities::Capabilities;
pub use connection::{Connection, StateBackend};
pub use error::{BackendError, BackendResult};
pub use memory::InMemoryBackend;
pub use statement::{Filter, LockMode, Row, Statement, Table, Value};
