//! Built-in plugins driven through a data provider over the fixture catalog.

use order_adapters::register_builtin_plugins;
use order_core::{FetchDescriptor, FetchError, OrderError, PluginError};
use order_test_utils::fixtures::{self, CAMPAIGN_NAME, JEC, MUR, TT_DL, TT_SL_PROCESS};
use order_test_utils::TestEnv;
use serde_json::json;

fn env() -> TestEnv {
    let env = TestEnv::new().unwrap();
    fixtures::write_catalog(env.data_path()).unwrap();
    register_builtin_plugins(env.registry()).unwrap();
    env
}

#[test]
fn test_campaign_bundle() {
    let env = env();
    let descriptor = FetchDescriptor::new("order_campaign", "campaign")
        .with_argument("campaign_name", CAMPAIGN_NAME);
    let bundle = env.provider().resolve(&descriptor).unwrap();

    let campaign = bundle.get("campaign").unwrap();
    assert_eq!(campaign["name"], json!(CAMPAIGN_NAME));
    assert_eq!(campaign["ecm"], json!(13.6));
    assert_eq!(campaign["datasets"].as_array().unwrap().len(), 3);
}

#[test]
fn test_single_dataset_bundle() {
    let env = env();
    let descriptor = FetchDescriptor::new("order_dataset", "dataset")
        .with_argument("campaign_name", CAMPAIGN_NAME)
        .with_argument("dataset_name", TT_DL.0);
    let bundle = env.provider().resolve(&descriptor).unwrap();
    assert_eq!(bundle.get("dataset").unwrap()["id"], json!(TT_DL.1));
}

#[test]
fn test_process_bundle_found_in_later_document() {
    let env = env();
    let descriptor = FetchDescriptor::new("order_process", "process")
        .with_argument("process_name", TT_SL_PROCESS.0);
    let bundle = env.provider().resolve(&descriptor).unwrap();

    let process = bundle.get("process").unwrap();
    assert_eq!(process["id"], json!(TT_SL_PROCESS.1));
    assert_eq!(process["cross_section"]["13.6"]["nominal"], json!(366.3));
}

#[test]
fn test_missing_dataset_surfaces_as_retrieve_failure() {
    let env = env();
    let descriptor = FetchDescriptor::new("order_dataset", "dataset")
        .with_argument("campaign_name", CAMPAIGN_NAME)
        .with_argument("dataset_name", "qcd_ht100");

    let result = env.provider().resolve(&descriptor);
    assert!(matches!(
        result,
        Err(OrderError::Plugin(PluginError::RetrieveFailed {
            source: FetchError::NotFound { .. },
            ..
        }))
    ));
    assert_eq!(env.provider().stats().writes, 0);
}

#[test]
fn test_unknown_campaign_has_no_datasets() {
    let env = env();
    let descriptor = FetchDescriptor::new("order_datasets", "datasets")
        .with_argument("campaign_name", "run2_2018");
    let bundle = env.provider().resolve(&descriptor).unwrap();
    assert_eq!(bundle.get("datasets").unwrap(), &json!({}));
}

#[test]
fn test_path_traversal_rejected() {
    let env = env();
    let descriptor = FetchDescriptor::new("order_campaign", "campaign")
        .with_argument("campaign_name", "../campaigns");
    assert!(matches!(
        env.provider().resolve(&descriptor),
        Err(OrderError::Plugin(PluginError::RetrieveFailed {
            source: FetchError::InvalidArgument { .. },
            ..
        }))
    ));
}

#[test]
fn test_results_are_cached() {
    let env = env();
    let descriptor = FetchDescriptor::new("order_campaign", "campaign")
        .with_argument("campaign_name", CAMPAIGN_NAME);
    env.provider().resolve(&descriptor).unwrap();
    env.provider().resolve(&descriptor).unwrap();

    let stats = env.provider().stats();
    assert_eq!(stats.plugin_calls, 1);
    assert_eq!(stats.writable_hits, 1);
}

#[test]
fn test_uncertainty_bundle() {
    let env = env();
    let descriptor = FetchDescriptor::new("order_uncertainty", "uncertainty")
        .with_argument("uncertainty_name", MUR.0);
    let bundle = env.provider().resolve(&descriptor).unwrap();

    let uncertainty = bundle.get("uncertainty").unwrap();
    assert_eq!(uncertainty["id"], json!(MUR.1));
    assert_eq!(uncertainty["generator"], json!("powheg"));
    assert_ne!(uncertainty["name"], json!(JEC.0));
}

#[test]
fn test_das_counts_share_one_lookup() {
    let env = env();
    let keys = json!(["/TTtoLNu2Q_TuneCP5_13p6TeV_powheg-pythia8/Run3Summer22NanoAODv12/NANOAODSIM"]);
    let n_files = FetchDescriptor::new("das_dataset", "n_files").with_argument("keys", keys.clone());
    let n_events = n_files.clone().with_key("n_events");

    assert_eq!(env.provider().resolve(&n_files).unwrap().get("n_files"), Some(&json!(12)));
    assert_eq!(
        env.provider().resolve(&n_events).unwrap().get("n_events"),
        Some(&json!(5_000_000))
    );
    assert_eq!(env.provider().stats().plugin_calls, 1);

    let lfns = FetchDescriptor::new("das_lfns", "lfns").with_argument("keys", keys);
    assert_eq!(
        env.provider().resolve(&lfns).unwrap().get("lfns"),
        Some(&json!(["/a/b/NANOAODSIM"]))
    );
}

#[test]
fn test_das_lookup_without_keys_fails() {
    let env = env();
    let descriptor = FetchDescriptor::new("das_dataset", "n_files");
    assert!(matches!(
        env.provider().resolve(&descriptor),
        Err(OrderError::Plugin(PluginError::RetrieveFailed {
            source: FetchError::MissingArgument { .. },
            ..
        }))
    ));
}
