//! Item extraction for YAML list files.
//!
//! A `multiple` config tracks one history per list item. Items are keyed by
//! the value under the config's id node and labelled by its friendly-name
//! node.

use serde_yaml::{Mapping, Value};

/// Placeholder used when an item lacks the requested key.
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: String,
    pub friendly_name: String,
    /// The item serialized on its own as a YAML document
    pub yaml: String,
}

/// Split a YAML sequence into individually serialized items.
///
/// An empty document yields no items. Items whose id repeats an earlier one
/// are skipped with a warning, since the id is the history key.
pub fn split_items(source: &str, id_node: &str, name_node: &str) -> Result<Vec<Item>, serde_yaml::Error> {
    let mut items: Vec<Item> = Vec::new();

    for value in parse_sequence(source)? {
        let id = node_value(&value, id_node);
        if items.iter().any(|item| item.id == id) {
            tracing::warn!(id = %id, "Skipping list item with duplicate id");
            continue;
        }
        items.push(Item {
            friendly_name: node_value(&value, name_node),
            yaml: serde_yaml::to_string(&value)?,
            id,
        });
    }

    Ok(items)
}

/// Put `item` (a single serialized item) back into the list in `source`.
///
/// The entry whose id matches is replaced in place; when none matches the
/// item is appended. Every other entry keeps its position.
pub fn replace_item(source: &str, id_node: &str, id: &str, item: &str) -> Result<String, serde_yaml::Error> {
    let mut sequence = parse_sequence(source)?;
    let replacement: Value = serde_yaml::from_str(item)?;

    match sequence.iter_mut().find(|v| node_value(v, id_node) == id) {
        Some(slot) => *slot = replacement,
        None => sequence.push(replacement),
    }

    serde_yaml::to_string(&Value::Sequence(sequence))
}

fn parse_sequence(source: &str) -> Result<Vec<Value>, serde_yaml::Error> {
    if source.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_yaml::from_str::<Value>(source)? {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => Ok(items),
        _ => Err(serde::de::Error::custom("expected a YAML list at the top level")),
    }
}

/// Scalar value stored under `key` in a mapping item, or [`UNKNOWN`].
pub fn node_value(value: &Value, key: &str) -> String {
    value
        .as_mapping()
        .and_then(|map: &Mapping| map.get(key))
        .and_then(scalar)
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
