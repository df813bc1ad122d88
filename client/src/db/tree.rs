//! Operations on the JSON tree shared by the local stores.

use serde_json::{Map, Value};

/// Clone of the value at `segments`, `Null` when absent.
pub fn get(root: &Value, segments: &[String]) -> Value {
    let mut node = root;
    for segment in segments {
        match node.get(segment) {
            Some(next) => node = next,
            None => return Value::Null,
        }
    }
    node.clone()
}

/// Replaces the value at `segments`. `Null` removes it and prunes parents
/// left empty.
pub fn set(root: &mut Value, segments: &[String], value: Value) {
    let value = normalize(value);
    if segments.is_empty() {
        *root = value;
        return;
    }
    if value.is_null() {
        remove(root, segments);
        return;
    }
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut node = root;
    for segment in parents {
        node = as_object(node).entry(segment.clone()).or_insert(Value::Null);
    }
    as_object(node).insert(last.clone(), value);
}

fn as_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(obj) => obj,
        _ => unreachable!("replaced with an object above"),
    }
}

fn remove(node: &mut Value, segments: &[String]) -> bool {
    let Some(obj) = node.as_object_mut() else {
        return false;
    };
    if segments.len() == 1 {
        obj.remove(&segments[0]);
    } else if let Some(next) = obj.get_mut(&segments[0]) {
        if remove(next, &segments[1..]) {
            obj.remove(&segments[0]);
        }
    }
    obj.is_empty()
}

/// Drops null members and empty objects, the way the store never keeps them.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(obj) => {
            let cleaned: Map<String, Value> = obj
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Object(cleaned)
            }
        }
        other => other,
    }
}

/// Replaces every server timestamp placeholder with `now`.
pub fn resolve_server_values(value: Value, now: i64) -> Value {
    match value {
        Value::Object(obj) => {
            if obj.len() == 1 && obj.get(".sv").and_then(Value::as_str) == Some("timestamp") {
                return Value::from(now);
            }
            Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, resolve_server_values(v, now)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| resolve_server_values(v, now))
                .collect(),
        ),
        other => other,
    }
}

/// Whether two paths share a subtree (one is a prefix of the other).
pub fn overlaps(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}
