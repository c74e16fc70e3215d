// ── Merge engine ──
//
// Deep-merges partial fragments from the device into the long-lived
// state document.

use serde_json::map::Entry;
use serde_json::{Map, Value};
use tracing::debug;

/// The state document: a tree of string-keyed maps.
pub type Document = Map<String, Value>;

/// Merge `fragment` into `base` in place and return `base`.
///
/// - `null`, `{}` or any non-object fragment is a no-op, so keep-alive
///   and "no data" frames never wipe state. A nested empty map likewise
///   leaves an existing map untouched.
/// - Map into map recurses; sibling keys survive.
/// - Anything else (scalars, arrays, type changes) overwrites. Arrays
///   are replaced, not concatenated.
/// - New subtrees are deep copies; nothing aliases the fragment.
pub fn merge<'a>(base: &'a mut Document, fragment: &Value) -> &'a mut Document {
    match fragment {
        Value::Object(incoming) => merge_map(base, incoming),
        Value::Null => {}
        other => debug!(kind = value_kind(other), "ignoring non-object fragment"),
    }
    base
}

fn merge_map(target: &mut Document, incoming: &Document) {
    for (key, value) in incoming {
        match target.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(value.clone());
            }
            Entry::Occupied(mut slot) => match (slot.get_mut(), value) {
                (Value::Object(existing), Value::Object(inner)) => merge_map(existing, inner),
                (existing, _) => *existing = value.clone(),
            },
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
