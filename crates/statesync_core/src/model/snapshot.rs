//! Snapshots: immutable, content-addressed versions of one transformation
//! definition.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::Write as _;

/// Content-addressed identity of a snapshot.
///
/// Derived from a [`SnapshotDefinition`] (including its upstream input
/// fingerprints), so any change to the definition or to an input produces a
/// new fingerprint. Equality is identity: two snapshots with equal
/// fingerprints are the same snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps an already-computed fingerprint string.
    ///
    /// Used when reconstructing entities from storage; new fingerprints
    /// come from [`SnapshotDefinition::fingerprint`].
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the fingerprint as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One versioned transformation definition.
///
/// The definition is the input to fingerprinting; it is never stored
/// mutated. `inputs` are the fingerprints of upstream snapshots this
/// definition reads from, so a change anywhere upstream cascades into new
/// fingerprints downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDefinition {
    /// Logical object name (e.g. `"analytics.orders"`).
    pub name: String,
    /// The transformation text.
    pub query: String,
    /// Fingerprints of upstream snapshots, in dependency order.
    pub inputs: Vec<Fingerprint>,
}

impl SnapshotDefinition {
    /// Creates a definition with no upstream inputs.
    #[must_use]
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            inputs: Vec::new(),
        }
    }

    /// Adds an upstream input fingerprint.
    #[must_use]
    pub fn with_input(mut self, input: Fingerprint) -> Self {
        self.inputs.push(input);
        self
    }

    /// Computes the content-addressed fingerprint of this definition.
    ///
    /// SHA-256 over length-prefixed fields, so no two distinct definitions
    /// collide by concatenation ambiguity.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        let mut feed = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };
        feed(self.name.as_bytes());
        feed(self.query.as_bytes());
        for input in &self.inputs {
            feed(input.as_str().as_bytes());
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        Fingerprint(hex)
    }
}

/// Where a snapshot's data is materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializationPlan {
    /// Physical storage locator (e.g. a fully qualified table name).
    pub storage_locator: String,
}

impl MaterializationPlan {
    /// Creates a plan targeting the given locator.
    #[must_use]
    pub fn new(storage_locator: impl Into<String>) -> Self {
        Self {
            storage_locator: storage_locator.into(),
        }
    }
}

/// An immutable, fingerprinted record of one transformation version plus
/// its materialization metadata.
///
/// Once created, the fingerprint, name, and locator never change; only the
/// snapshot's interval coverage (stored separately) grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Content-addressed identity.
    pub fingerprint: Fingerprint,
    /// Logical object name.
    pub name: String,
    /// Physical storage locator.
    pub storage_locator: String,
    /// Creation time, unix epoch milliseconds.
    pub created_at: i64,
}
