//! DAS dataset metadata.
//!
//! `das_dataset` answers the file and event counts of a dataset variation,
//! `das_lfns` its logical file names. Both are keyed by the variation's DAS
//! dataset `keys` and ignore the data location.
//!
//! No DAS client is wired in yet. Both plugins answer fixed placeholder
//! metadata, where keys starting with `/SCALE` stand for small
//! scale-variation samples.

use order_core::{value_kind, Arguments, FetchError};
use order_storage::FetchPlugin;
use serde_json::{json, Value};

pub const DAS_DATASET: &str = "das_dataset";
pub const DAS_LFNS: &str = "das_lfns";

const SCALE_PREFIX: &str = "/SCALE";

/// The non-empty `keys` list argument.
fn keys_argument(arguments: &Arguments) -> Result<Vec<&str>, FetchError> {
    let invalid = |reason: String| FetchError::InvalidArgument {
        argument: "keys".to_string(),
        reason,
    };

    let value = arguments.get("keys").ok_or_else(|| FetchError::MissingArgument {
        argument: "keys".to_string(),
    })?;
    let items = value
        .as_array()
        .ok_or_else(|| invalid(format!("expected a list of strings, got {}", value_kind(value))))?;
    if items.is_empty() {
        return Err(invalid("at least one key is required".to_string()));
    }
    items
        .iter()
        .map(|item| match item.as_str() {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(invalid(format!("{} is not a dataset key", item))),
        })
        .collect()
}

fn is_scale_sample(keys: &[&str]) -> bool {
    keys.first().map_or(false, |key| key.starts_with(SCALE_PREFIX))
}

/// `{keys}` → `{"n_files": .., "n_events": ..}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DasDatasetPlugin;

impl FetchPlugin for DasDatasetPlugin {
    fn name(&self) -> &str {
        DAS_DATASET
    }

    fn retrieve(&self, _: Option<&str>, arguments: &Arguments) -> Result<Value, FetchError> {
        let keys = keys_argument(arguments)?;
        let (n_files, n_events) = if is_scale_sample(&keys) {
            (1, 1)
        } else {
            (12, 5_000_000)
        };
        tracing::debug!(key = %keys[0], n_files, n_events, "Looked up DAS dataset");
        Ok(json!({ "n_files": n_files, "n_events": n_events }))
    }
}

/// `{keys}` → `{"lfns": [..]}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DasLfnsPlugin;

impl FetchPlugin for DasLfnsPlugin {
    fn name(&self) -> &str {
        DAS_LFNS
    }

    fn retrieve(&self, _: Option<&str>, arguments: &Arguments) -> Result<Value, FetchError> {
        let keys = keys_argument(arguments)?;
        let lfn = if is_scale_sample(&keys) {
            "/SCALE/b/NANOAODSIM"
        } else {
            "/a/b/NANOAODSIM"
        };
        Ok(json!({ "lfns": [lfn] }))
    }
}
