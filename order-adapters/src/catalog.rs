//! Locating catalog files below a data location.
//!
//! Layout of a local catalog:
//!
//! ```text
//! <root>/campaigns/<campaign>.yaml
//! <root>/datasets/<campaign>/*.yaml     one or more datasets per file
//! <root>/processes/*.yaml               one or more processes per file
//! ```

use crate::yaml::read_documents;
use order_core::{local_path, Arguments, FetchError};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Filesystem root of a `file://` data location.
pub fn catalog_root(data_location: Option<&str>) -> Result<PathBuf, FetchError> {
    let location = data_location.ok_or_else(|| FetchError::UnsupportedLocation {
        location: String::new(),
        reason: "no data location given".to_string(),
    })?;
    local_path(location).ok_or_else(|| FetchError::UnsupportedLocation {
        location: location.to_string(),
        reason: "only local file:// locations are supported".to_string(),
    })
}

/// A required string argument.
pub fn string_argument<'a>(arguments: &'a Arguments, name: &str) -> Result<&'a str, FetchError> {
    match arguments.get(name) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value),
        Some(other) => Err(FetchError::InvalidArgument {
            argument: name.to_string(),
            reason: format!("expected a non-empty string, got {}", other),
        }),
        None => Err(FetchError::MissingArgument {
            argument: name.to_string(),
        }),
    }
}

/// Argument values become file and directory names; keep them to one
/// path component.
pub fn path_component<'a>(name: &str, value: &'a str) -> Result<&'a str, FetchError> {
    if value == "." || value == ".." || value.contains('/') || value.contains('\\') {
        return Err(FetchError::InvalidArgument {
            argument: name.to_string(),
            reason: format!("'{}' is not a plain name", value),
        });
    }
    Ok(value)
}

/// `*.yaml` files directly inside `directory`, sorted by file name.
/// A missing directory yields no files.
pub fn yaml_files(directory: &Path) -> Result<Vec<PathBuf>, FetchError> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(FetchError::Io {
                path: directory.display().to_string(),
                reason: e.to_string(),
            })
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| FetchError::Io {
                path: directory.display().to_string(),
                reason: e.to_string(),
            })?
            .path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// The `name` field of a catalog document.
pub fn document_name<'a>(document: &'a Value, path: &Path) -> Result<&'a str, FetchError> {
    document
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| FetchError::Parse {
            path: path.display().to_string(),
            reason: "document has no string field 'name'".to_string(),
        })
}

/// Every named document of every YAML file in `directory`, keyed by name.
/// Later files win on duplicate names.
pub fn named_documents(directory: &Path) -> Result<Map<String, Value>, FetchError> {
    let mut documents = Map::new();
    for path in yaml_files(directory)? {
        for document in read_documents(&path)? {
            let name = document_name(&document, &path)?.to_string();
            documents.insert(name, document);
        }
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_catalog_root_requires_local_location() {
        assert_eq!(
            catalog_root(Some("file:///data/order")).unwrap(),
            PathBuf::from("/data/order")
        );
        assert!(matches!(
            catalog_root(Some("https://example.org/order")),
            Err(FetchError::UnsupportedLocation { .. })
        ));
        assert!(catalog_root(None).is_err());
    }

    #[test]
    fn test_string_argument() {
        let mut arguments = Arguments::new();
        arguments.insert("campaign_name".into(), json!("run3"));
        arguments.insert("count".into(), json!(3));

        assert_eq!(string_argument(&arguments, "campaign_name").unwrap(), "run3");
        assert!(matches!(
            string_argument(&arguments, "count"),
            Err(FetchError::InvalidArgument { .. })
        ));
        assert!(matches!(
            string_argument(&arguments, "dataset_name"),
            Err(FetchError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_path_component_rejects_traversal() {
        assert_eq!(path_component("n", "run3_2022").unwrap(), "run3_2022");
        assert!(path_component("n", "..").is_err());
        assert!(path_component("n", "a/b").is_err());
    }

    #[test]
    fn test_yaml_files_sorted_and_filtered() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("b.yaml"), "name: b\n").unwrap();
        fs::write(dir.path().join("a.yaml"), "name: a\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let names: Vec<_> = yaml_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.yaml", "b.yaml"]);
        assert!(yaml_files(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_named_documents_requires_names() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("x.yaml"), "id: 1\n").unwrap();
        assert!(matches!(named_documents(dir.path()), Err(FetchError::Parse { .. })));
    }
}
