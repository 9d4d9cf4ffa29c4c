//! Flattening of JSON documents into path-named properties and back.
//!
//! Objects contribute `parent.child` names, arrays contribute `parent.[i]` names and an
//! empty array is kept as a single `parent.[]` property with an empty value:
//!
//! ```text
//! {"name": "fred", "friends": ["barney"], "pets": []}
//!   -> name = "fred", friends.[0] = "barney", pets.[] = ""
//! ```

use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const DEFAULT_DELIMITER: &str = ".";

const EMPTY_ARRAY: &str = "[]";

/// Flattens an object or array into scalar properties. Scalars at the root yield nothing.
pub fn json_to_props(json: &Value, delim: &str) -> BTreeMap<String, Value> {
    let mut result = BTreeMap::new();
    let mut prefix = Vec::new();
    flatten(&mut result, &mut prefix, json, delim);
    result
}

fn flatten(result: &mut BTreeMap<String, Value>, prefix: &mut Vec<String>, js: &Value, delim: &str) {
    match js {
        Value::Object(fields) => {
            for (key, value) in fields {
                prefix.push(key.clone());
                flatten_child(result, prefix, value, delim);
                prefix.pop();
            }
        }
        Value::Array(items) => {
            if items.is_empty() {
                prefix.push(EMPTY_ARRAY.to_string());
                result.insert(prefix.join(delim), Value::String(String::new()));
                prefix.pop();
            }
            for (idx, value) in items.iter().enumerate() {
                prefix.push(format!("[{}]", idx));
                flatten_child(result, prefix, value, delim);
                prefix.pop();
            }
        }
        _ => {}
    }
}

fn flatten_child(
    result: &mut BTreeMap<String, Value>,
    prefix: &mut Vec<String>,
    value: &Value,
    delim: &str,
) {
    match value {
        Value::Object(_) | Value::Array(_) => flatten(result, prefix, value, delim),
        Value::Null => {}
        scalar => {
            result.insert(prefix.join(delim), scalar.clone());
        }
    }
}

/// Rebuilds a document from flattened properties.
///
/// The root is an array when the first property name starts with an index segment.
/// An index no smaller than the number of properties cannot come from a flattened
/// document and is kept as a plain field name.
pub fn props_to_json(props: &BTreeMap<String, Value>, delim: &str) -> Value {
    let root_is_array = props
        .keys()
        .next()
        .is_some_and(|name| name.starts_with('['));
    let mut root = if root_is_array {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    };

    let limit = props.len();
    for (name, value) in props {
        let segments: Vec<&str> = name.split(delim).collect();
        insert(&mut root, &segments, value.clone(), limit);
    }
    root
}

fn insert(current: &mut Value, segments: &[&str], leaf: Value, limit: usize) {
    let Some((segment, rest)) = segments.split_first() else {
        *current = leaf;
        return;
    };

    if *segment == EMPTY_ARRAY {
        if !current.is_array() {
            *current = Value::Array(Vec::new());
        }
        return;
    }

    if let Some(idx) = parse_index(segment).filter(|idx| *idx < limit) {
        if !current.is_array() {
            *current = Value::Array(Vec::new());
        }
        if let Value::Array(items) = current {
            if items.len() <= idx {
                items.resize(idx + 1, Value::Null);
            }
            insert(&mut items[idx], rest, leaf, limit);
        }
        return;
    }

    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(fields) = current {
        let child = fields.entry(segment.to_string()).or_insert(Value::Null);
        insert(child, rest, leaf, limit);
    }
}

fn parse_index(segment: &str) -> Option<usize> {
    segment
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .and_then(|s| s.parse().ok())
}

/// Renders a flattened scalar as an attribute value.
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
