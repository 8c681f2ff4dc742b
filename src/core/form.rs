//! Form specification and field maps

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field-name to value map. Values are what the user supplied through the
/// conversation: usually strings, occasionally a small list or object.
/// Accepted maps never contain nulls; those are filtered before acceptance.
pub type FieldMap = BTreeMap<String, Value>;

/// The fields a form needs before it counts as complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSpec {
    /// Form identifier
    pub id: String,

    /// Human-readable form name
    pub name: String,

    /// Form description, fed to the model as task context
    #[serde(default)]
    pub description: String,

    /// Declared target fields, in form order
    pub fields: Vec<String>,
}

impl FormSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            fields,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether `field` is one of the declared target fields
    pub fn declares(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Fields not yet present in `filled`, in form order
    pub fn pending_fields(&self, filled: &FieldMap) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| !filled.contains_key(*f))
            .cloned()
            .collect()
    }
}
