//! Integration tests for the tiered data provider.

use order_core::{
    Arguments, CacheError, ConfigError, FetchDescriptor, FetchError, OrderError, PluginError,
    ProviderConfig,
};
use order_storage::cache::CacheEntry;
use order_storage::{Consumed, DataProvider, FetchPlugin, PluginRegistry};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// TEST PLUGINS
// ============================================================================

struct Counting {
    calls: Arc<AtomicUsize>,
    lifetime: Option<Duration>,
}

impl FetchPlugin for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn needs_data_location(&self) -> bool {
        true
    }

    fn lifetime(&self) -> Option<Duration> {
        self.lifetime
    }

    fn retrieve(&self, location: Option<&str>, arguments: &Arguments) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({
            "x": arguments.get("a").cloned().unwrap_or(Value::Null),
            "y": "second",
            "location": location,
        }))
    }
}

struct NotABundle;

impl FetchPlugin for NotABundle {
    fn name(&self) -> &str {
        "not_a_bundle"
    }

    fn retrieve(&self, _: Option<&str>, _: &Arguments) -> Result<Value, FetchError> {
        Ok(json!([1, 2, 3]))
    }
}

struct Broken;

impl FetchPlugin for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn retrieve(&self, _: Option<&str>, _: &Arguments) -> Result<Value, FetchError> {
        Err(FetchError::Io {
            path: "/nowhere".to_string(),
            reason: "unreachable".to_string(),
        })
    }
}

struct Env {
    data: TempDir,
    cache: TempDir,
    calls: Arc<AtomicUsize>,
    registry: Arc<PluginRegistry>,
}

impl Env {
    fn new() -> Self {
        Self::with_lifetime(None)
    }

    fn with_lifetime(lifetime: Option<Duration>) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(PluginRegistry::new());
        let shared = Arc::clone(&calls);
        registry
            .register(move || {
                Box::new(Counting {
                    calls: Arc::clone(&shared),
                    lifetime,
                })
            })
            .unwrap();
        registry.register(|| Box::new(NotABundle)).unwrap();
        registry.register(|| Box::new(Broken)).unwrap();

        Self {
            data: TempDir::new().unwrap(),
            cache: TempDir::new().unwrap(),
            calls,
            registry,
        }
    }

    fn config(&self) -> ProviderConfig {
        ProviderConfig::new(
            self.data.path().to_string_lossy(),
            self.cache.path().to_string_lossy(),
        )
    }

    fn provider(&self, config: ProviderConfig) -> DataProvider {
        DataProvider::new(config, Arc::clone(&self.registry)).unwrap()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn descriptor(key: &str) -> FetchDescriptor {
    FetchDescriptor::new("counting", key).with_argument("a", 1)
}

fn cache_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map(|rd| rd.map(|e| e.unwrap().path()).collect())
        .unwrap_or_default();
    files.sort();
    files
}

// ============================================================================
// RESOLUTION AND CACHING
// ============================================================================

#[test]
fn test_resolve_invokes_plugin_once_then_hits_cache() {
    let env = Env::new();
    let provider = env.provider(env.config());

    let first = provider.resolve(&descriptor("x")).unwrap();
    assert_eq!(first.get("x"), Some(&json!(1)));
    assert_eq!(env.calls(), 1);

    let second = provider.resolve(&descriptor("y")).unwrap();
    assert_eq!(first, second);
    assert_eq!(env.calls(), 1);

    let stats = provider.stats();
    assert_eq!(stats.plugin_calls, 1);
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.writable_hits, 1);
}

#[test]
fn test_data_location_is_passed_when_requested() {
    let env = Env::new();
    let provider = env.provider(env.config());

    let bundle = provider.resolve(&descriptor("x")).unwrap();
    assert_eq!(
        bundle.get("location"),
        Some(&json!(provider.data_location()))
    );
}

#[test]
fn test_cache_file_is_named_after_hash() {
    let env = Env::new();
    let provider = env.provider(env.config());
    let hash = provider.cache_hash(&descriptor("x")).unwrap();

    provider.resolve(&descriptor("x")).unwrap();

    let files = cache_files(env.cache.path());
    assert_eq!(files, vec![env.cache.path().join(format!("{}.json", hash))]);
    let content: Value = serde_json::from_str(&fs::read_to_string(&files[0]).unwrap()).unwrap();
    assert_eq!(content["x"], json!(1));
}

#[test]
fn test_positive_lifetime_adds_expiry_suffix() {
    let env = Env::with_lifetime(Some(Duration::from_secs(3600)));
    let provider = env.provider(env.config());
    let hash = provider.cache_hash(&descriptor("x")).unwrap();

    provider.resolve(&descriptor("x")).unwrap();

    let files = cache_files(env.cache.path());
    assert_eq!(files.len(), 1);
    let entry = CacheEntry::parse(&files[0], &hash).expect("cache entry");
    let expiry = entry.expiry.expect("expiry suffix");
    assert!(expiry > chrono::Utc::now().timestamp());
}

#[test]
fn test_zero_lifetime_never_expires() {
    let env = Env::with_lifetime(Some(Duration::ZERO));
    let provider = env.provider(env.config());
    let hash = provider.cache_hash(&descriptor("x")).unwrap();

    provider.resolve(&descriptor("x")).unwrap();

    assert_eq!(
        cache_files(env.cache.path()),
        vec![env.cache.path().join(format!("{}.json", hash))]
    );
}

#[test]
fn test_argument_order_does_not_change_hash() {
    let env = Env::new();
    let provider = env.provider(env.config());

    let a = FetchDescriptor::new("counting", "x")
        .with_argument("a", json!({"p": 1, "q": 2}))
        .with_argument("b", 2);
    let b = FetchDescriptor::new("counting", "y")
        .with_argument("b", 2)
        .with_argument("a", json!({"q": 2, "p": 1}));

    assert_eq!(provider.cache_hash(&a).unwrap(), provider.cache_hash(&b).unwrap());
}

#[cfg(unix)]
#[test]
fn test_data_location_created_after_start_is_canonicalized() {
    let env = Env::new();
    let link = env.data.path().join("link");
    let config = ProviderConfig::new(link.to_string_lossy(), env.cache.path().to_string_lossy());
    let early = env.provider(config.clone());

    let real = env.data.path().join("real");
    fs::create_dir(&real).unwrap();
    std::os::unix::fs::symlink(&real, &link).unwrap();

    let direct = ProviderConfig::new(real.to_string_lossy(), env.cache.path().to_string_lossy());
    let expected = env.provider(direct).cache_hash(&descriptor("x")).unwrap();
    assert_eq!(early.cache_hash(&descriptor("x")).unwrap(), expected);
    assert_eq!(env.provider(config).cache_hash(&descriptor("x")).unwrap(), expected);
}

// ============================================================================
// EXPIRY SELECTION AND STALE CLEANUP
// ============================================================================

#[test]
fn test_stale_files_are_removed_and_latest_valid_wins() {
    let env = Env::new();
    let provider = env.provider(env.config());
    let hash = provider.cache_hash(&descriptor("x")).unwrap();
    let now = chrono::Utc::now().timestamp();

    let dir = env.cache.path();
    let expired = CacheEntry::in_directory(dir, &hash, Some(now - 100));
    let older = CacheEntry::in_directory(dir, &hash, Some(now + 100));
    let newer = CacheEntry::in_directory(dir, &hash, Some(now + 1000));
    fs::write(&expired.path, r#"{"x": "expired"}"#).unwrap();
    fs::write(&older.path, r#"{"x": "older"}"#).unwrap();
    fs::write(&newer.path, r#"{"x": "newer"}"#).unwrap();

    let bundle = provider.resolve(&descriptor("x")).unwrap();
    assert_eq!(bundle.get("x"), Some(&json!("newer")));
    assert_eq!(env.calls(), 0);
    assert_eq!(cache_files(dir), vec![newer.path]);
}

#[test]
fn test_unsuffixed_file_beats_expiring_files() {
    let env = Env::new();
    let provider = env.provider(env.config());
    let hash = provider.cache_hash(&descriptor("x")).unwrap();
    let now = chrono::Utc::now().timestamp();

    let dir = env.cache.path();
    let forever = CacheEntry::in_directory(dir, &hash, None);
    let expiring = CacheEntry::in_directory(dir, &hash, Some(now + 1000));
    fs::write(&forever.path, r#"{"x": "forever"}"#).unwrap();
    fs::write(&expiring.path, r#"{"x": "expiring"}"#).unwrap();

    let bundle = provider.resolve(&descriptor("x")).unwrap();
    assert_eq!(bundle.get("x"), Some(&json!("forever")));
    assert_eq!(cache_files(dir), vec![forever.path]);
}

#[test]
fn test_only_expired_files_cause_refetch() {
    let env = Env::new();
    let provider = env.provider(env.config());
    let hash = provider.cache_hash(&descriptor("x")).unwrap();
    let now = chrono::Utc::now().timestamp();

    let expired = CacheEntry::in_directory(env.cache.path(), &hash, Some(now - 10));
    fs::write(&expired.path, r#"{"x": "expired"}"#).unwrap();

    let bundle = provider.resolve(&descriptor("x")).unwrap();
    assert_eq!(bundle.get("x"), Some(&json!(1)));
    assert_eq!(env.calls(), 1);
    assert!(!expired.path.exists());
}

// ============================================================================
// READ-ONLY TIERS AND CACHE-ONLY MODE
// ============================================================================

#[test]
fn test_cache_only_without_entry_fails_without_plugin_call() {
    let env = Env::new();
    let provider = env.provider(env.config().with_cache_only(true));

    let result = provider.resolve(&descriptor("x"));
    assert!(matches!(
        result,
        Err(OrderError::Cache(CacheError::CacheOnlyViolation { plugin })) if plugin == "counting"
    ));
    assert_eq!(env.calls(), 0);
    assert!(cache_files(env.cache.path()).is_empty());
}

#[test]
fn test_cache_round_trip_through_readonly_tier() {
    let env = Env::new();
    let first = env.provider(env.config()).resolve(&descriptor("x")).unwrap();
    assert_eq!(env.calls(), 1);

    // the former writable directory becomes a read-only tier of a fresh cache
    let fresh = TempDir::new().unwrap();
    let config = ProviderConfig::new(
        env.data.path().to_string_lossy(),
        fresh.path().to_string_lossy(),
    )
    .with_readonly_cache_directories([env.cache.path().to_string_lossy()])
    .with_cache_only(true);
    let provider = env.provider(config);

    let second = provider.resolve(&descriptor("x")).unwrap();
    assert_eq!(first, second);
    assert_eq!(env.calls(), 1);
    assert_eq!(provider.stats().readonly_hits, 1);
    assert!(cache_files(fresh.path()).is_empty());
}

#[test]
fn test_readonly_tiers_are_searched_in_order_and_never_cleaned() {
    let env = Env::new();
    let first_ro = TempDir::new().unwrap();
    let second_ro = TempDir::new().unwrap();
    let config = env.config().with_readonly_cache_directories([
        first_ro.path().to_string_lossy(),
        second_ro.path().to_string_lossy(),
    ]);
    let provider = env.provider(config);
    let hash = provider.cache_hash(&descriptor("x")).unwrap();
    let now = chrono::Utc::now().timestamp();

    let expired = CacheEntry::in_directory(first_ro.path(), &hash, Some(now - 10));
    fs::write(&expired.path, r#"{"x": "expired"}"#).unwrap();
    let valid = CacheEntry::in_directory(second_ro.path(), &hash, None);
    fs::write(&valid.path, r#"{"x": "second"}"#).unwrap();

    let bundle = provider.resolve(&descriptor("x")).unwrap();
    assert_eq!(bundle.get("x"), Some(&json!("second")));
    assert!(expired.path.exists());
    assert_eq!(env.calls(), 0);
}

#[test]
fn test_writable_tier_wins_over_readonly() {
    let env = Env::new();
    let ro = TempDir::new().unwrap();
    let provider =
        env.provider(env.config().with_readonly_cache_directories([ro.path().to_string_lossy()]));
    let hash = provider.cache_hash(&descriptor("x")).unwrap();

    fs::write(CacheEntry::in_directory(ro.path(), &hash, None).path, r#"{"x": "ro"}"#).unwrap();
    fs::write(
        CacheEntry::in_directory(env.cache.path(), &hash, None).path,
        r#"{"x": "rw"}"#,
    )
    .unwrap();

    let bundle = provider.resolve(&descriptor("x")).unwrap();
    assert_eq!(bundle.get("x"), Some(&json!("rw")));
}

// ============================================================================
// CONSUMPTION
// ============================================================================

#[test]
fn test_skip_cache_uses_value_without_writing() {
    let env = Env::new();
    let provider = env.provider(env.config());

    let value = provider
        .materialize(&descriptor("x"), |bundle| {
            Ok(Consumed::SkipCache(bundle.get("x").cloned()))
        })
        .unwrap();
    assert_eq!(value, Some(json!(1)));
    assert!(cache_files(env.cache.path()).is_empty());

    provider.resolve(&descriptor("x")).unwrap();
    assert_eq!(env.calls(), 2);
    assert_eq!(provider.stats().skipped_writes, 1);
}

#[test]
fn test_consumer_error_propagates_and_skips_write() {
    let env = Env::new();
    let provider = env.provider(env.config());

    let result: Result<(), _> = provider.materialize(&descriptor("x"), |_| {
        Err(PluginError::ContractViolation {
            plugin: "counting".to_string(),
            reason: "consumer rejected bundle".to_string(),
        }
        .into())
    });
    assert!(result.is_err());
    assert!(cache_files(env.cache.path()).is_empty());
}

// ============================================================================
// FAILURES
// ============================================================================

#[test]
fn test_unknown_plugin() {
    let env = Env::new();
    let provider = env.provider(env.config());

    let result = provider.resolve(&FetchDescriptor::new("missing", "x"));
    assert!(matches!(
        result,
        Err(OrderError::Plugin(PluginError::UnknownPlugin { name })) if name == "missing"
    ));
}

#[test]
fn test_non_mapping_result_is_contract_violation() {
    let env = Env::new();
    let provider = env.provider(env.config());

    let result = provider.resolve(&FetchDescriptor::new("not_a_bundle", "x"));
    assert!(matches!(
        result,
        Err(OrderError::Plugin(PluginError::ContractViolation { plugin, .. })) if plugin == "not_a_bundle"
    ));
    assert!(cache_files(env.cache.path()).is_empty());
}

#[test]
fn test_retrieve_failure_is_surfaced() {
    let env = Env::new();
    let provider = env.provider(env.config());

    let result = provider.resolve(&FetchDescriptor::new("broken", "x"));
    assert!(matches!(
        result,
        Err(OrderError::Plugin(PluginError::RetrieveFailed { plugin, source: FetchError::Io { .. } }))
            if plugin == "broken"
    ));
}

#[test]
fn test_corrupt_cache_file_is_reported() {
    let env = Env::new();
    let provider = env.provider(env.config());
    let hash = provider.cache_hash(&descriptor("x")).unwrap();
    fs::write(
        CacheEntry::in_directory(env.cache.path(), &hash, None).path,
        "not json",
    )
    .unwrap();

    let result = provider.resolve(&descriptor("x"));
    assert!(matches!(result, Err(OrderError::Cache(CacheError::Corrupt { .. }))));
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[test]
fn test_clear_cache_removes_writable_directory() {
    let env = Env::new();
    env.provider(env.config()).resolve(&descriptor("x")).unwrap();
    assert_eq!(cache_files(env.cache.path()).len(), 1);

    let provider = env.provider(env.config().with_clear_cache(true));
    assert!(cache_files(env.cache.path()).is_empty());

    provider.resolve(&descriptor("x")).unwrap();
    assert_eq!(env.calls(), 2);
}

#[test]
fn test_overlapping_cache_directories_rejected_at_construction() {
    let env = Env::new();
    let config = env
        .config()
        .with_readonly_cache_directories([env.cache.path().to_string_lossy()]);

    let result = DataProvider::new(config, Arc::clone(&env.registry));
    assert!(matches!(
        result,
        Err(OrderError::Config(ConfigError::OverlappingCacheDirectory { .. }))
    ));
}
