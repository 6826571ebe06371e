//! ORDER Test Utilities
//!
//! Shared test infrastructure for the order workspace:
//! - Mock fetch plugins that count their invocations
//! - Temporary provider environments
//! - YAML catalog fixtures
//! - Proptest strategies for index operation sequences
//! - Assertions on order error variants

pub use order_core::{
    Arguments, FetchDescriptor, FetchError, OrderError, OrderResult, ProviderConfig,
};
pub use order_storage::{DataProvider, FetchPlugin, PluginRegistry};

use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// MOCK PLUGINS
// ============================================================================

/// Shared invocation counter of a mock plugin.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

type Responder = Arc<dyn Fn(&Arguments) -> Value + Send + Sync>;

/// Mock plugin answering with a fixed or computed bundle and counting calls.
///
/// Every instance created by the registry shares the same counter.
#[derive(Clone)]
pub struct CountingPlugin {
    name: String,
    responder: Responder,
    calls: CallCounter,
    failures_left: Arc<AtomicUsize>,
    lifetime: Option<Duration>,
}

impl CountingPlugin {
    /// Always answer with `response`.
    pub fn new(name: impl Into<String>, response: Value) -> Self {
        Self::with_responder(name, move |_| response.clone())
    }

    /// Answer with whatever `responder` computes from the arguments.
    pub fn with_responder<F>(name: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&Arguments) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            responder: Arc::new(responder),
            calls: CallCounter::default(),
            failures_left: Arc::new(AtomicUsize::new(0)),
            lifetime: None,
        }
    }

    /// Fail the first `n` calls with an I/O error. Failed calls are counted.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }

    /// Register a factory sharing this plugin's state and return its counter.
    pub fn register(self, registry: &PluginRegistry) -> OrderResult<CallCounter> {
        let calls = self.calls();
        registry.register(move || Box::new(self.clone()))?;
        Ok(calls)
    }
}

impl FetchPlugin for CountingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn lifetime(&self) -> Option<Duration> {
        self.lifetime
    }

    fn retrieve(&self, _: Option<&str>, arguments: &Arguments) -> Result<Value, FetchError> {
        self.calls.bump();
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FetchError::Io {
                path: self.name.clone(),
                reason: "simulated transient failure".to_string(),
            });
        }
        Ok((self.responder)(arguments))
    }
}

/// Mock plugin whose every call fails.
#[derive(Clone)]
pub struct FailingPlugin {
    name: String,
    calls: CallCounter,
}

impl FailingPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: CallCounter::default(),
        }
    }

    pub fn register(self, registry: &PluginRegistry) -> OrderResult<CallCounter> {
        let calls = self.calls.clone();
        registry.register(move || Box::new(self.clone()))?;
        Ok(calls)
    }
}

impl FetchPlugin for FailingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn retrieve(&self, _: Option<&str>, arguments: &Arguments) -> Result<Value, FetchError> {
        self.calls.bump();
        Err(FetchError::NotFound {
            name: Value::Object(arguments.clone().into_iter().collect()).to_string(),
            location: self.name.clone(),
        })
    }
}

// ============================================================================
// TEST ENVIRONMENT
// ============================================================================

/// Temporary data and cache directories with a fresh registry and provider.
///
/// The directories live as long as the environment.
pub struct TestEnv {
    data: tempfile::TempDir,
    cache: tempfile::TempDir,
    registry: Arc<PluginRegistry>,
    provider: DataProvider,
}

impl TestEnv {
    pub fn new() -> OrderResult<Self> {
        Self::with_config(|config| config)
    }

    /// Adjust the default configuration before the provider is built.
    pub fn with_config<F>(adjust: F) -> OrderResult<Self>
    where
        F: FnOnce(ProviderConfig) -> ProviderConfig,
    {
        let data = temp_dir()?;
        let cache = temp_dir()?;
        let registry = Arc::new(PluginRegistry::new());
        let config = adjust(base_config(&data, &cache));
        let provider = DataProvider::new(config, Arc::clone(&registry))?;
        Ok(Self {
            data,
            cache,
            registry,
            provider,
        })
    }

    pub fn data_path(&self) -> &std::path::Path {
        self.data.path()
    }

    pub fn cache_path(&self) -> &std::path::Path {
        self.cache.path()
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn provider(&self) -> &DataProvider {
        &self.provider
    }

    /// Another provider over the same directories and registry.
    pub fn reopen<F>(&self, adjust: F) -> OrderResult<DataProvider>
    where
        F: FnOnce(ProviderConfig) -> ProviderConfig,
    {
        let config = adjust(base_config(&self.data, &self.cache));
        DataProvider::new(config, Arc::clone(&self.registry))
    }
}

fn temp_dir() -> OrderResult<tempfile::TempDir> {
    tempfile::TempDir::new().map_err(|e| {
        order_core::CacheError::Io {
            path: std::env::temp_dir().display().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn base_config(data: &tempfile::TempDir, cache: &tempfile::TempDir) -> ProviderConfig {
    ProviderConfig::new(
        format!("file://{}", data.path().display()),
        cache.path().display().to_string(),
    )
}

// ============================================================================
// CATALOG FIXTURES
// ============================================================================

pub mod fixtures {
    //! A small YAML catalog in the layout read by the built-in plugins.

    use std::fs;
    use std::io;
    use std::path::Path;

    pub const CAMPAIGN_NAME: &str = "run3_2022_preEE_nano_v12";
    pub const CAMPAIGN_ID: u64 = 1;
    pub const TT_SL: (&str, u64) = ("tt_sl_powheg", 14);
    pub const TT_DL: (&str, u64) = ("tt_dl_powheg", 15);
    pub const ST_T: (&str, u64) = ("st_tchannel_t_powheg", 16);
    pub const TT: (&str, u64) = ("tt", 1000);
    pub const TT_SL_PROCESS: (&str, u64) = ("tt_sl", 1100);
    pub const JEC: (&str, u64) = ("jec", 1);
    pub const MUR: (&str, u64) = ("mur", 2);

    /// LFN source plugin name referenced lazily by the `tt_sl_powheg` fixture.
    pub const LFN_PLUGIN: &str = "lfn_source";

    pub const CAMPAIGN_YAML: &str = "\
id: 1
name: run3_2022_preEE_nano_v12
tier: NANOAOD
ecm: 13.6
recommended_gt: 130X_mcRun3_2022_realistic_v5
datasets:
  - name: tt_sl_powheg
    id: 14
  - name: tt_dl_powheg
    id: 15
  - name: st_tchannel_t_powheg
    id: 16
";

    pub const TT_DATASETS_YAML: &str = "\
name: tt_sl_powheg
id: 14
variations:
  nominal:
    keys:
      - /TTtoLNu2Q_TuneCP5_13p6TeV_powheg-pythia8/Run3Summer22NanoAODv12/NANOAODSIM
    gen_order: nlo
    n_files: 143
    n_events: 1000000
    lfns:
      plugin: lfn_source
      key: lfns
      arguments:
        dataset: tt_sl_powheg
---
name: tt_dl_powheg
id: 15
variations:
  nominal:
    keys:
      - /TTto2L2Nu_TuneCP5_13p6TeV_powheg-pythia8/Run3Summer22NanoAODv12/NANOAODSIM
    gen_order: nlo
    n_files: 58
    n_events: 250000
    lfns:
      - /store/mc/Run3Summer22NanoAODv12/TTto2L2Nu/0.root
";

    pub const ST_DATASETS_YAML: &str = "\
name: st_tchannel_t_powheg
id: 16
variations:
  nominal:
    keys:
      - /TBbarQ_t-channel_4FS_TuneCP5_13p6TeV_powheg-madspin-pythia8/Run3Summer22NanoAODv12/NANOAODSIM
    n_files: 20
    n_events: 40000
    lfns: []
";

    pub const PROCESSES_YAML: &str = "\
name: tt
id: 1000
cross_section:
  13.6:
    nominal: 923.6
processes:
  - name: tt_sl
    id: 1100
  - name: tt_dl
    id: 1200
    cross_section:
      13.6:
        nominal: 97.4
---
name: tt_sl
id: 1100
cross_section:
  13.6:
    nominal: 366.3
";

    pub const UNCERTAINTIES_YAML: &str = "\
name: jec
id: 1
type: syst_exp_jec
description: Jet energy scale
pog: JME
---
name: mur
id: 2
type: syst_theory_scale
generator: powheg
";

    /// Write `contents` to `root/relative`, creating parent directories.
    pub fn write_file(root: &Path, relative: &str, contents: &str) -> io::Result<()> {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    }

    /// Write the whole fixture catalog below `root`.
    pub fn write_catalog(root: &Path) -> io::Result<()> {
        write_file(root, &format!("campaigns/{}.yaml", CAMPAIGN_NAME), CAMPAIGN_YAML)?;
        write_file(root, &format!("datasets/{}/tt.yaml", CAMPAIGN_NAME), TT_DATASETS_YAML)?;
        write_file(root, &format!("datasets/{}/st.yaml", CAMPAIGN_NAME), ST_DATASETS_YAML)?;
        write_file(root, "processes/tt.yaml", PROCESSES_YAML)?;
        write_file(root, "uncertainties/main.yaml", UNCERTAINTIES_YAML)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for index operation sequences.

    use proptest::prelude::*;

    /// One mutation of a unique index. Names and ids come from small pools
    /// so that sequences collide often.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum IndexOp {
        Add { id: u64, name: String },
        Overwrite { id: u64, name: String },
        RemoveName(String),
        RemoveId(u64),
    }

    pub fn arb_name() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["tt", "dy", "st", "ww", "wz", "zz"]).prop_map(String::from)
    }

    pub fn arb_id() -> impl Strategy<Value = u64> {
        1u64..=8
    }

    pub fn arb_index_op() -> impl Strategy<Value = IndexOp> {
        prop_oneof![
            4 => (arb_id(), arb_name()).prop_map(|(id, name)| IndexOp::Add { id, name }),
            2 => (arb_id(), arb_name()).prop_map(|(id, name)| IndexOp::Overwrite { id, name }),
            1 => arb_name().prop_map(IndexOp::RemoveName),
            1 => arb_id().prop_map(IndexOp::RemoveId),
        ]
    }

    pub fn arb_index_ops(max_len: usize) -> impl Strategy<Value = Vec<IndexOp>> {
        prop::collection::vec(arb_index_op(), 0..max_len)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on order error variants.

    use super::*;
    use order_core::{CacheError, IndexError, MaterializeError, PluginError};

    #[track_caller]
    pub fn assert_cache_only_violation<T: std::fmt::Debug>(result: &OrderResult<T>) {
        match result {
            Err(OrderError::Cache(CacheError::CacheOnlyViolation { .. })) => {}
            other => panic!("Expected CacheOnlyViolation, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_retrieve_failed<T: std::fmt::Debug>(result: &OrderResult<T>, plugin: &str) {
        match result {
            Err(OrderError::Plugin(PluginError::RetrieveFailed { plugin: p, .. })) => {
                assert_eq!(p, plugin, "Wrong plugin in RetrieveFailed error");
            }
            other => panic!("Expected RetrieveFailed for {}, got: {:?}", plugin, other),
        }
    }

    #[track_caller]
    pub fn assert_incomplete<T: std::fmt::Debug>(result: &OrderResult<T>, key: &str) {
        match result {
            Err(OrderError::Materialize(MaterializeError::Incomplete { key: k, .. })) => {
                assert_eq!(k, key, "Wrong key in Incomplete error");
            }
            other => panic!("Expected Incomplete for key {}, got: {:?}", key, other),
        }
    }

    #[track_caller]
    pub fn assert_duplicate<T: std::fmt::Debug>(result: &OrderResult<T>) {
        match result {
            Err(OrderError::Index(IndexError::DuplicateName { .. }))
            | Err(OrderError::Index(IndexError::DuplicateId { .. })) => {}
            other => panic!("Expected a duplicate error, got: {:?}", other),
        }
    }
}
