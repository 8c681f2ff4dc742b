//! Field merging with a last-writer-wins acceptance rule
//!
//! The same rule applies whether a delta came from a single step's table
//! header or from the final fold over `table_from` steps: the most recently
//! accepted non-null value for a field, in pipeline order, wins. Overwriting
//! an already-populated field is deliberate; it lets the user correct an
//! earlier answer mid-conversation.

use crate::core::form::FieldMap;
use serde_json::Value;
use tracing::debug;

/// Result of merging one delta map into the current map
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The new map (current overlaid with accepted delta entries)
    pub merged: FieldMap,

    /// Names of fields newly accepted from the delta, in delta order
    pub accepted: Vec<String>,
}

/// Whether a value carries actual content.
///
/// Rejects JSON null, the literal string "null" in any casing, empty
/// strings, and empty lists/objects. Models fill unanswered fields with one
/// of those shapes.
pub fn is_substantive(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty() && !s.eq_ignore_ascii_case("null"),
        Value::Array(items) => !items.is_empty(),
        Value::Object(entries) => !entries.is_empty(),
    }
}

/// Merge `delta` into `current`, accepting only entries that name a declared
/// field, carry a substantive value, and differ from the value already known
/// for that field. Equal values are silently ignored rather than re-reported
/// as newly extracted.
pub fn merge(current: &FieldMap, delta: &FieldMap, declared: &[String]) -> MergeOutcome {
    let mut merged = current.clone();
    let mut accepted = Vec::new();

    for (field, value) in delta {
        if !declared.iter().any(|f| f == field) {
            debug!(field, "dropping undeclared field");
            continue;
        }
        if !is_substantive(value) {
            continue;
        }
        if merged.get(field) == Some(value) {
            debug!(field, "value unchanged, skipping");
            continue;
        }
        merged.insert(field.clone(), value.clone());
        accepted.push(field.clone());
    }

    MergeOutcome { merged, accepted }
}

/// Whether every required field name is a key of `map`
pub fn is_complete(map: &FieldMap, required: &[String]) -> bool {
    required.iter().all(|f| map.contains_key(f))
}
