//! YAML catalog documents as JSON values.
//!
//! Catalog files use YAML features JSON lacks, most notably non-string
//! mapping keys such as center-of-mass energies (`13.6:`). Keys are
//! stringified on the way in; tags are dropped.

use order_core::FetchError;
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use serde_yaml::Value as Yaml;
use std::fs;
use std::path::Path;

/// Convert a YAML value into JSON.
pub fn yaml_to_json(yaml: Yaml) -> Result<Value, String> {
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => number_to_json(&n)?,
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut map = Map::with_capacity(mapping.len());
            for (key, value) in mapping {
                map.insert(key_to_string(key)?, yaml_to_json(value)?);
            }
            Value::Object(map)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn number_to_json(n: &serde_yaml::Number) -> Result<Value, String> {
    if let Some(u) = n.as_u64() {
        return Ok(Value::from(u));
    }
    if let Some(i) = n.as_i64() {
        return Ok(Value::from(i));
    }
    n.as_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("number {} has no JSON representation", n))
}

fn key_to_string(key: Yaml) -> Result<String, String> {
    match key {
        Yaml::String(s) => Ok(s),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        Yaml::Tagged(tagged) => key_to_string(tagged.value),
        other => Err(format!("unsupported mapping key {:?}", other)),
    }
}

/// Read every non-empty document of a (possibly multi-document) YAML file.
pub fn read_documents(path: &Path) -> Result<Vec<Value>, FetchError> {
    let text = fs::read_to_string(path).map_err(|e| FetchError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let parse_error = |reason: String| FetchError::Parse {
        path: path.display().to_string(),
        reason,
    };

    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&text) {
        let yaml = Yaml::deserialize(document).map_err(|e| parse_error(e.to_string()))?;
        match yaml_to_json(yaml).map_err(parse_error)? {
            Value::Null => continue,
            value => documents.push(value),
        }
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn convert(text: &str) -> Value {
        yaml_to_json(serde_yaml::from_str(text).unwrap()).unwrap()
    }

    #[test]
    fn test_numeric_keys_become_strings() {
        let value = convert("cross_section:\n  13.6: {nominal: 923.6}\n  13: {nominal: 833.9}\n");
        assert_eq!(value["cross_section"]["13.6"]["nominal"], json!(923.6));
        assert_eq!(value["cross_section"]["13"]["nominal"], json!(833.9));
    }

    #[test]
    fn test_scalars_and_sequences() {
        let value = convert("id: 14\nname: tt\nflags: [true, null, -3]\n");
        assert_eq!(value, json!({"id": 14, "name": "tt", "flags": [true, null, -3]}));
    }

    #[test]
    fn test_non_finite_number_rejected() {
        let result = yaml_to_json(serde_yaml::from_str(".nan").unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_read_documents_reads_every_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("multi.yaml");
        fs::write(&path, "name: a\nid: 1\n---\nname: b\nid: 2\n").unwrap();

        let documents = read_documents(&path).unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[1]["name"], json!("b"));
    }

    #[test]
    fn test_read_documents_reports_parse_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "name: [unclosed\n").unwrap();
        assert!(matches!(read_documents(&path), Err(FetchError::Parse { .. })));
    }
}
