//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data that maintains
//! required invariants (non-empty half-open intervals, valid names).

use proptest::prelude::*;
use statesync_core::{Fingerprint, Interval, SnapshotDefinition};
use std::collections::BTreeMap;

/// Strategy for valid environment names.
pub fn environment_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,31}").expect("Invalid regex")
}

/// Strategy for valid logical object names.
pub fn object_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}(\\.[a-z][a-z0-9_]{0,15})?")
        .expect("Invalid regex")
}

/// Strategy for non-empty intervals with bounded coordinates.
pub fn interval_strategy() -> impl Strategy<Value = Interval> {
    (0i64..10_000, 1i64..500, any::<bool>()).prop_map(|(start, len, dev)| {
        let interval = Interval::new(start, start + len).expect("strategy yields start < end");
        Interval {
            dev_preview: dev,
            ..interval
        }
    })
}

/// Strategy for snapshot definitions with a random number of upstream
/// inputs.
pub fn definition_strategy() -> impl Strategy<Value = SnapshotDefinition> {
    (
        object_name_strategy(),
        prop::string::string_regex("SELECT [a-z0-9_, ]{1,40}").expect("Invalid regex"),
        prop::collection::vec("[a-f0-9]{8}", 0..4),
    )
        .prop_map(|(name, query, inputs)| {
            let mut definition = SnapshotDefinition::new(name, query);
            for input in inputs {
                definition = definition.with_input(Fingerprint::new(input));
            }
            definition
        })
}

/// Strategy for environment mappings over freshly fingerprinted
/// definitions.
pub fn mapping_strategy() -> impl Strategy<Value = BTreeMap<String, Fingerprint>> {
    prop::collection::btree_map(
        object_name_strategy(),
        definition_strategy().prop_map(|d| d.fingerprint()),
        0..6,
    )
}
