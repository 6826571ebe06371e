//! Fetch descriptors and the result bundles plugins produce.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Named plugin arguments. Keys are kept sorted so equality and iteration
/// order never depend on how the arguments were written down.
pub type Arguments = BTreeMap<String, Value>;

/// Field names a raw descriptor object may carry.
const DESCRIPTOR_FIELDS: [&str; 4] = ["plugin", "adapter", "key", "arguments"];

// ============================================================================
// FETCH DESCRIPTOR
// ============================================================================

/// Identifies a deferred value: which plugin to call with which arguments,
/// and which key of the returned bundle holds the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchDescriptor {
    /// Registered plugin name.
    #[serde(alias = "adapter")]
    pub plugin: String,
    /// Key selecting one entry of the plugin's result bundle.
    pub key: String,
    /// Arguments passed to the plugin.
    #[serde(default)]
    pub arguments: Arguments,
}

impl FetchDescriptor {
    pub fn new(plugin: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            key: key.into(),
            arguments: Arguments::new(),
        }
    }

    /// Add an argument.
    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Same descriptor pointing at a different bundle key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Two descriptors are signature-compatible when one plugin call with
    /// the same arguments satisfies both, regardless of `key`.
    pub fn is_signature_compatible(&self, other: &FetchDescriptor) -> bool {
        self.plugin == other.plugin && self.arguments == other.arguments
    }

    /// Whether a raw value has the shape of a descriptor: an object with a
    /// plugin name and a key and no other fields than `arguments`.
    pub fn matches_raw(value: &Value) -> bool {
        let Value::Object(map) = value else {
            return false;
        };
        let has_plugin = map.contains_key("plugin") || map.contains_key("adapter");
        has_plugin
            && map.contains_key("key")
            && map.keys().all(|k| DESCRIPTOR_FIELDS.contains(&k.as_str()))
    }

    /// Parse a raw descriptor object, `None` when the value is not one.
    ///
    /// A value shaped like a descriptor that does not parse (both `plugin`
    /// and `adapter`, a non-string key, ...) is an error.
    pub fn from_raw(value: &Value) -> Result<Option<Self>, ValidationError> {
        if !Self::matches_raw(value) {
            return Ok(None);
        }
        let invalid = |reason: String| ValidationError::InvalidValue {
            field: "FetchDescriptor".to_string(),
            reason,
        };
        if let Value::Object(map) = value {
            if map.contains_key("plugin") && map.contains_key("adapter") {
                return Err(invalid("both plugin and adapter given".to_string()));
            }
        }
        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| invalid(e.to_string()))
    }
}

// ============================================================================
// RESULT BUNDLE
// ============================================================================

/// String-keyed output of exactly one plugin invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultBundle(Map<String, Value>);

impl ResultBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Accept a plugin's raw return value if it is a string-keyed mapping.
    pub fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl FromIterator<(String, Value)> for ResultBundle {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Human-readable JSON type name, used in contract violation messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
