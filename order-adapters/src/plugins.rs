//! The built-in catalog plugins.

use crate::catalog::{
    catalog_root, document_name, named_documents, path_component, string_argument, yaml_files,
};
use crate::yaml::read_documents;
use order_core::{Arguments, FetchError};
use order_storage::FetchPlugin;
use serde_json::{json, Value};
use std::path::Path;

pub const ORDER_CAMPAIGN: &str = "order_campaign";
pub const ORDER_DATASETS: &str = "order_datasets";
pub const ORDER_DATASET: &str = "order_dataset";
pub const ORDER_PROCESS: &str = "order_process";
pub const ORDER_UNCERTAINTY: &str = "order_uncertainty";

fn not_found(name: &str, location: &Path) -> FetchError {
    FetchError::NotFound {
        name: name.to_string(),
        location: location.display().to_string(),
    }
}

/// First top-level document named `name` in `directory/*.yaml`, searching
/// files in name order.
fn find_document(directory: &Path, name: &str) -> Result<Value, FetchError> {
    for path in yaml_files(directory)? {
        for document in read_documents(&path)? {
            if document_name(&document, &path)? == name {
                return Ok(document);
            }
        }
    }
    Err(not_found(name, directory))
}

// ============================================================================
// CAMPAIGNS
// ============================================================================

/// `{campaign_name}` → `{"campaign": <campaigns/<campaign_name>.yaml>}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CampaignPlugin;

impl FetchPlugin for CampaignPlugin {
    fn name(&self) -> &str {
        ORDER_CAMPAIGN
    }

    fn needs_data_location(&self) -> bool {
        true
    }

    fn retrieve(&self, data_location: Option<&str>, arguments: &Arguments) -> Result<Value, FetchError> {
        let root = catalog_root(data_location)?;
        let campaign_name = string_argument(arguments, "campaign_name")?;
        let file_name = format!("{}.yaml", path_component("campaign_name", campaign_name)?);
        let path = root.join("campaigns").join(file_name);
        if !path.is_file() {
            return Err(not_found(campaign_name, &path));
        }

        let document = read_documents(&path)?
            .into_iter()
            .next()
            .ok_or_else(|| not_found(campaign_name, &path))?;
        tracing::debug!(campaign = %campaign_name, path = %path.display(), "Read campaign");
        Ok(json!({ "campaign": document }))
    }
}

// ============================================================================
// DATASETS
// ============================================================================

/// `{campaign_name}` → `{"datasets": {<name>: <document>, ...}}` from every
/// document in `datasets/<campaign_name>/*.yaml`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DatasetsPlugin;

impl FetchPlugin for DatasetsPlugin {
    fn name(&self) -> &str {
        ORDER_DATASETS
    }

    fn needs_data_location(&self) -> bool {
        true
    }

    fn retrieve(&self, data_location: Option<&str>, arguments: &Arguments) -> Result<Value, FetchError> {
        let root = catalog_root(data_location)?;
        let campaign_name = string_argument(arguments, "campaign_name")?;
        let directory = root
            .join("datasets")
            .join(path_component("campaign_name", campaign_name)?);

        let datasets = named_documents(&directory)?;
        tracing::debug!(
            campaign = %campaign_name,
            count = datasets.len(),
            "Read campaign datasets"
        );
        Ok(json!({ "datasets": datasets }))
    }
}

/// `{campaign_name, dataset_name}` → `{"dataset": <document>}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DatasetPlugin;

impl FetchPlugin for DatasetPlugin {
    fn name(&self) -> &str {
        ORDER_DATASET
    }

    fn needs_data_location(&self) -> bool {
        true
    }

    fn retrieve(&self, data_location: Option<&str>, arguments: &Arguments) -> Result<Value, FetchError> {
        let root = catalog_root(data_location)?;
        let campaign_name = string_argument(arguments, "campaign_name")?;
        let dataset_name = string_argument(arguments, "dataset_name")?;
        let directory = root
            .join("datasets")
            .join(path_component("campaign_name", campaign_name)?);

        let mut datasets = named_documents(&directory)?;
        let dataset = datasets
            .remove(dataset_name)
            .ok_or_else(|| not_found(dataset_name, &directory))?;
        Ok(json!({ "dataset": dataset }))
    }
}

// ============================================================================
// PROCESSES
// ============================================================================

/// `{process_name}` → `{"process": <document>}`, searching the top-level
/// documents of `processes/*.yaml` in file name order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessPlugin;

impl FetchPlugin for ProcessPlugin {
    fn name(&self) -> &str {
        ORDER_PROCESS
    }

    fn needs_data_location(&self) -> bool {
        true
    }

    fn retrieve(&self, data_location: Option<&str>, arguments: &Arguments) -> Result<Value, FetchError> {
        let root = catalog_root(data_location)?;
        let process_name = string_argument(arguments, "process_name")?;
        let process = find_document(&root.join("processes"), process_name)?;
        Ok(json!({ "process": process }))
    }
}

// ============================================================================
// UNCERTAINTIES
// ============================================================================

/// `{uncertainty_name}` → `{"uncertainty": <document>}` from
/// `uncertainties/*.yaml`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UncertaintyPlugin;

impl FetchPlugin for UncertaintyPlugin {
    fn name(&self) -> &str {
        ORDER_UNCERTAINTY
    }

    fn needs_data_location(&self) -> bool {
        true
    }

    fn retrieve(&self, data_location: Option<&str>, arguments: &Arguments) -> Result<Value, FetchError> {
        let root = catalog_root(data_location)?;
        let uncertainty_name = string_argument(arguments, "uncertainty_name")?;
        let uncertainty = find_document(&root.join("uncertainties"), uncertainty_name)?;
        tracing::debug!(uncertainty = %uncertainty_name, "Read uncertainty");
        Ok(json!({ "uncertainty": uncertainty }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> Arguments {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn test_plugins_need_data_location() {
        assert!(CampaignPlugin.needs_data_location());
        assert!(DatasetsPlugin.needs_data_location());
        assert!(DatasetPlugin.needs_data_location());
        assert!(ProcessPlugin.needs_data_location());
        assert!(UncertaintyPlugin.needs_data_location());
    }

    #[test]
    fn test_remote_location_is_unsupported() {
        let result = DatasetsPlugin.retrieve(
            Some("https://example.org/order-data"),
            &args(&[("campaign_name", "run3")]),
        );
        assert!(matches!(result, Err(FetchError::UnsupportedLocation { .. })));
    }

    #[test]
    fn test_missing_argument() {
        let result = DatasetPlugin.retrieve(Some("file:///tmp"), &args(&[("campaign_name", "run3")]));
        assert!(matches!(
            result,
            Err(FetchError::MissingArgument { argument }) if argument == "dataset_name"
        ));
    }

    #[test]
    fn test_missing_uncertainties_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let location = format!("file://{}", dir.path().display());
        let result = UncertaintyPlugin.retrieve(Some(&location), &args(&[("uncertainty_name", "jec")]));
        assert!(matches!(result, Err(FetchError::NotFound { name, .. }) if name == "jec"));
    }

    #[test]
    fn test_missing_campaign_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let location = format!("file://{}", dir.path().display());
        let result = CampaignPlugin.retrieve(Some(&location), &args(&[("campaign_name", "nope")]));
        assert!(matches!(result, Err(FetchError::NotFound { name, .. }) if name == "nope"));
    }
}
