//! Property-based generators using proptest.
//!
//! Strategies for keys and values that maintain the engine's invariants:
//! generated keys are always valid (finite numbers, bounded nesting) and
//! generated values stay within the structured-value model.

use idxdb_codec::{Key, Value};
use proptest::prelude::*;

/// Strategy for valid scalar keys.
pub fn scalar_key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        prop::num::f64::NORMAL.prop_map(Key::Number),
        prop::num::f64::NORMAL.prop_map(Key::Date),
        ".{0,16}".prop_map(Key::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Key::Binary),
    ]
}

/// Strategy for valid keys, including nested array keys.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    scalar_key_strategy().prop_recursive(3, 24, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Key::Array)
    })
}

/// Strategy for store and index names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,31}").expect("valid regex")
}

/// Strategy for structured values, including maps and arrays.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        prop::num::f64::NORMAL.prop_map(Value::Number),
        prop::num::f64::NORMAL.prop_map(Value::Date),
        ".{0,16}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-z]{1,8}", inner), 0..4).prop_map(Value::map),
        ]
    })
}

/// Strategy for record-shaped values: a map with a numeric `id` plus
/// arbitrary extra fields.
pub fn record_strategy() -> impl Strategy<Value = Value> {
    (
        prop::num::f64::NORMAL,
        prop::collection::vec(("[a-z]{1,8}", value_strategy()), 0..4),
    )
        .prop_map(|(id, mut fields)| {
            fields.push(("id".to_string(), Value::Number(id)));
            Value::map(fields)
        })
}
