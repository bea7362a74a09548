//! Deep and filtered structural equality over JSON values
//!
//! Equality is strict about type: `"1"` and `1` differ, `0` and `false`
//! differ. Numbers compare by value, so `1` and `1.0` are equal. Object key
//! order is irrelevant, array order is significant. A key that is absent
//! on one side and present on the other (even as `null`) makes the objects
//! differ.

use serde_json::{Map, Number, Value};
use std::collections::BTreeSet;

/// Strict, type-sensitive structural equality
pub fn deep_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equals(x, y))
        },
        (Value::Object(x), Value::Object(y)) => maps_equal(x, y),
        _ => false,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a == b;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn maps_equal(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(key, x)| b.get(key).is_some_and(|y| deep_equals(x, y)))
}

fn optional_equals(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => deep_equals(x, y),
        _ => false,
    }
}

/// Compare two objects after projecting both onto `fields`
///
/// With `exclude` set the projection is the complement: every key except
/// `fields`. Values that are not objects are compared whole.
pub fn filtered_deep_equals<S: AsRef<str>>(a: &Value, b: &Value, fields: &[S], exclude: bool) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => filtered_maps_equal(x, y, fields, exclude),
        _ => deep_equals(a, b),
    }
}

/// [`filtered_deep_equals`] over bare maps
pub fn filtered_maps_equal<S: AsRef<str>>(
    a: &Map<String, Value>,
    b: &Map<String, Value>,
    fields: &[S],
    exclude: bool,
) -> bool {
    if exclude {
        let skipped: BTreeSet<&str> = fields.iter().map(S::as_ref).collect();
        a.keys()
            .chain(b.keys())
            .filter(|key| !skipped.contains(key.as_str()))
            .all(|key| optional_equals(a.get(key), b.get(key)))
    } else {
        fields
            .iter()
            .map(S::as_ref)
            .all(|key| optional_equals(a.get(key), b.get(key)))
    }
}

/// Keep only `fields` of an object (or drop them, with `exclude`)
///
/// Non-object values are returned unchanged.
pub fn project<S: AsRef<str>>(value: &Value, fields: &[S], exclude: bool) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };

    let listed: BTreeSet<&str> = fields.iter().map(S::as_ref).collect();
    let projected: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| listed.contains(key.as_str()) != exclude)
        .map(|(key, v)| (key.clone(), v.clone()))
        .collect();

    Value::Object(projected)
}
