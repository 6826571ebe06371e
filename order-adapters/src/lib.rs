//! ORDER Adapters - Built-in Plugins
//!
//! Fetch plugins that read the order catalog from YAML files below a local
//! `file://` data location, plus the DAS metadata plugins that feed the lazy
//! fields of dataset variations.
//!
//! | plugin              | arguments                         | bundle                          |
//! |---------------------|-----------------------------------|---------------------------------|
//! | `order_campaign`    | `campaign_name`                   | `{"campaign": doc}`             |
//! | `order_datasets`    | `campaign_name`                   | `{"datasets": {name: doc}}`     |
//! | `order_dataset`     | `campaign_name`, `dataset_name`   | `{"dataset": doc}`              |
//! | `order_process`     | `process_name`                    | `{"process": doc}`              |
//! | `order_uncertainty` | `uncertainty_name`                | `{"uncertainty": doc}`          |
//! | `das_dataset`       | `keys`                            | `{"n_files": .., "n_events": ..}` |
//! | `das_lfns`          | `keys`                            | `{"lfns": [..]}`                |
//!
//! The `order_*` plugins receive the provider's data location, the DAS
//! plugins do not.

pub mod catalog;
pub mod das;
pub mod plugins;
pub mod yaml;

pub use das::{DasDatasetPlugin, DasLfnsPlugin, DAS_DATASET, DAS_LFNS};
pub use plugins::{
    CampaignPlugin, DatasetPlugin, DatasetsPlugin, ProcessPlugin, UncertaintyPlugin,
    ORDER_CAMPAIGN, ORDER_DATASET, ORDER_DATASETS, ORDER_PROCESS, ORDER_UNCERTAINTY,
};
pub use yaml::{read_documents, yaml_to_json};

use order_core::OrderResult;
use order_storage::PluginRegistry;

/// Register every built-in plugin. Fails if one of the names is taken.
pub fn register_builtin_plugins(registry: &PluginRegistry) -> OrderResult<()> {
    registry.register(|| Box::new(CampaignPlugin))?;
    registry.register(|| Box::new(DatasetsPlugin))?;
    registry.register(|| Box::new(DatasetPlugin))?;
    registry.register(|| Box::new(ProcessPlugin))?;
    registry.register(|| Box::new(UncertaintyPlugin))?;
    registry.register(|| Box::new(DasDatasetPlugin))?;
    registry.register(|| Box::new(DasLfnsPlugin))?;
    tracing::debug!(
        plugins = ?[
            ORDER_CAMPAIGN,
            ORDER_DATASETS,
            ORDER_DATASET,
            ORDER_PROCESS,
            ORDER_UNCERTAINTY,
            DAS_DATASET,
            DAS_LFNS,
        ],
        "Registered built-in plugins"
    );
    Ok(())
}
