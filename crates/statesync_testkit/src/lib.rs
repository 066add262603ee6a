//! # statesync testkit
//!
//! Test utilities for statesync.
//!
//! This crate provides:
//! - Engine and backend fixtures with canned capability tiers
//! - Property-based test generators using proptest
//! - Stress helpers for concurrent promotion scenarios
//!
//! ## Usage
//!
//! ```rust
//! use statesync_testkit::prelude::*;
//!
//! let (_backend, engine) = memory_engine();
//! assert!(engine.list_environments().unwrap().is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
