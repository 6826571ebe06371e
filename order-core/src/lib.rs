//! ORDER Core - Shared Types
//!
//! Types every other order crate depends on: fetch descriptors, result
//! bundles, the error taxonomy, provider configuration and the hashing used
//! to address cache files. No I/O happens here.

pub mod config;
pub mod descriptor;
pub mod error;

pub use config::{
    expand_env, flag_to_bool, is_local, local_path, location_identity, normalize_data_location,
    split_scheme, ProviderConfig,
};
pub use descriptor::{value_kind, Arguments, FetchDescriptor, ResultBundle};
pub use error::{
    CacheError, ConfigError, FetchError, IndexError, MaterializeError, OrderError, OrderResult,
    PluginError, ValidationError,
};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

// ============================================================================
// CANONICAL KEYS AND HASHING
// ============================================================================

/// Number of hex characters kept from a cache hash.
pub const CACHE_HASH_LENGTH: usize = 10;

/// Rebuild a value with every nested object's keys sorted.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let sorted: Map<String, Value> = keys
                .into_iter()
                .map(|k| (k.clone(), canonicalize(&map[k])))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Default plugin cache key: the compact JSON of the recursively sorted arguments.
pub fn canonical_cache_key(arguments: &Arguments) -> String {
    let object: Map<String, Value> = arguments
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    canonicalize(&Value::Object(object)).to_string()
}

/// Hex SHA-256 of `input`, truncated to `length` characters.
pub fn create_hash(input: &str, length: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(length);
    hash
}

/// Cache hash over a data location identity and a plugin cache key.
pub fn cache_hash(location_identity: &str, cache_key: &str) -> String {
    let input = Value::Array(vec![
        Value::String(location_identity.to_string()),
        Value::String(cache_key.to_string()),
    ]);
    create_hash(&input.to_string(), CACHE_HASH_LENGTH)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_key_sorts_nested_maps() {
        let mut a = Arguments::new();
        a.insert("z".to_string(), json!({"b": 1, "a": [ {"y": 1, "x": 2} ]}));
        a.insert("a".to_string(), json!("s"));
        assert_eq!(
            canonical_cache_key(&a),
            r#"{"a":"s","z":{"a":[{"x":2,"y":1}],"b":1}}"#
        );
    }

    #[test]
    fn test_create_hash_truncates() {
        let h = create_hash("hello", 10);
        assert_eq!(h.len(), 10);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(create_hash("hello", 64).len(), 64);
    }

    #[test]
    fn test_cache_hash_depends_on_both_parts() {
        let base = cache_hash("file:///data", "{}");
        assert_ne!(base, cache_hash("file:///other", "{}"));
        assert_ne!(base, cache_hash("file:///data", r#"{"a":1}"#));
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
