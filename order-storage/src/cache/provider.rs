//! Tiered, content-addressed result cache in front of plugin invocation.
//!
//! Lookup order for a descriptor:
//!
//! 1. the writable cache directory (stale sibling files are removed),
//! 2. each read-only cache directory in configured order,
//! 3. a live plugin call, unless cache-only mode is active.
//!
//! Fresh results are written back to the writable directory after the
//! caller has consumed them, unless the caller asked to skip caching.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::OnceCell;
use tempfile::NamedTempFile;
use order_core::{
    cache_hash, local_path, location_identity, value_kind, CacheError, ConfigError, FetchDescriptor,
    OrderResult, PluginError, ProviderConfig, ResultBundle,
};

use super::entry::{scan_directory, select, CacheEntry};
use crate::plugin::{FetchPlugin, PluginRegistry};

static GLOBAL_PROVIDER: OnceCell<Arc<DataProvider>> = OnceCell::new();

/// Create the process-wide data provider. Fails if it already exists.
pub fn init_provider(
    config: ProviderConfig,
    registry: Arc<PluginRegistry>,
) -> OrderResult<Arc<DataProvider>> {
    let provider = Arc::new(DataProvider::new(config, registry)?);
    GLOBAL_PROVIDER
        .set(Arc::clone(&provider))
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    Ok(provider)
}

/// The process-wide data provider, if [`init_provider`] has run.
pub fn global_provider() -> Option<Arc<DataProvider>> {
    GLOBAL_PROVIDER.get().cloned()
}

// ============================================================================
// CONSUMPTION CONTRACT
// ============================================================================

/// What a caller decided after consuming a bundle.
///
/// The order crates always answer [`Consumed::Cache`]; they reject a bundle
/// by returning an error instead. [`Consumed::SkipCache`] is for users of
/// [`DataProvider::materialize`] who want a fresh result once without
/// keeping it, for example while the state it feeds is still incomplete.
#[derive(Debug, Clone, PartialEq)]
pub enum Consumed<T> {
    /// Use the value and persist a freshly fetched bundle.
    Cache(T),
    /// Use the value but do not persist the bundle. Has no effect on a
    /// bundle read from the cache.
    SkipCache(T),
}

impl<T> Consumed<T> {
    pub fn into_value(self) -> T {
        match self {
            Self::Cache(value) | Self::SkipCache(value) => value,
        }
    }
}

/// Which tier served a cached bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Writable,
    ReadOnly(usize),
}

/// Counters describing how resolutions were served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub writable_hits: u64,
    pub readonly_hits: u64,
    pub plugin_calls: u64,
    pub writes: u64,
    pub skipped_writes: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.writable_hits + self.readonly_hits
    }
}

#[derive(Debug, Default)]
struct Counters {
    writable_hits: AtomicU64,
    readonly_hits: AtomicU64,
    plugin_calls: AtomicU64,
    writes: AtomicU64,
    skipped_writes: AtomicU64,
}

// ============================================================================
// DATA PROVIDER
// ============================================================================

/// Resolves fetch descriptors through the cache tiers and the plugin registry.
///
/// Dropping a provider has no side effects; cache files stay on disk.
#[derive(Debug)]
pub struct DataProvider {
    config: ProviderConfig,
    registry: Arc<PluginRegistry>,
    /// Set once the data location's identity can no longer change.
    location_identity: OnceCell<String>,
    counters: Counters,
}

impl DataProvider {
    /// Validate the configuration and prepare the provider. With
    /// `clear_cache` set, the writable cache directory is removed first.
    pub fn new(config: ProviderConfig, registry: Arc<PluginRegistry>) -> OrderResult<Self> {
        config.validate()?;

        if config.clear_cache {
            match fs::remove_dir_all(&config.cache_directory) {
                Ok(()) => tracing::info!(
                    path = %config.cache_directory.display(),
                    "Cleared writable cache directory"
                ),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(CacheError::Io {
                        path: config.cache_directory.display().to_string(),
                        reason: e.to_string(),
                    }
                    .into())
                }
            }
        }

        Ok(Self {
            config,
            registry,
            location_identity: OnceCell::new(),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn data_location(&self) -> &str {
        &self.config.data_location
    }

    /// Snapshot of the resolution counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            writable_hits: self.counters.writable_hits.load(Ordering::Relaxed),
            readonly_hits: self.counters.readonly_hits.load(Ordering::Relaxed),
            plugin_calls: self.counters.plugin_calls.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            skipped_writes: self.counters.skipped_writes.load(Ordering::Relaxed),
        }
    }

    /// Cache hash of a descriptor under this provider's data location.
    pub fn cache_hash(&self, descriptor: &FetchDescriptor) -> OrderResult<String> {
        let plugin = self.registry.create(&descriptor.plugin)?;
        Ok(self.hash_with(plugin.as_ref(), descriptor))
    }

    fn hash_with(&self, plugin: &dyn FetchPlugin, descriptor: &FetchDescriptor) -> String {
        cache_hash(&self.location_identity(), &plugin.cache_key(&descriptor.arguments))
    }

    /// Identity of the data location used in cache hashes. A local location
    /// is canonicalized as soon as it exists and kept from then on; until
    /// then its plain form is used.
    fn location_identity(&self) -> String {
        if let Some(identity) = self.location_identity.get() {
            return identity.clone();
        }
        let location = &self.config.data_location;
        let identity = location_identity(location);
        if local_path(location).map_or(true, |path| path.exists()) {
            let _ = self.location_identity.set(identity.clone());
        }
        identity
    }

    /// Resolve a descriptor to its full result bundle.
    pub fn resolve(&self, descriptor: &FetchDescriptor) -> OrderResult<ResultBundle> {
        self.materialize(descriptor, |bundle| Ok(Consumed::Cache(bundle.clone())))
    }

    /// Resolve a descriptor and hand the bundle to `consume`.
    ///
    /// For a fresh bundle the cache write happens only after `consume`
    /// returned [`Consumed::Cache`]. [`Consumed::SkipCache`] or an error
    /// leaves the cache untouched.
    pub fn materialize<T, F>(&self, descriptor: &FetchDescriptor, consume: F) -> OrderResult<T>
    where
        F: FnOnce(&ResultBundle) -> OrderResult<Consumed<T>>,
    {
        let plugin = self.registry.create(&descriptor.plugin)?;
        let hash = self.hash_with(plugin.as_ref(), descriptor);

        if let Some((tier, entry)) = self.lookup(&hash)? {
            match tier {
                CacheTier::Writable => self.counters.writable_hits.fetch_add(1, Ordering::Relaxed),
                CacheTier::ReadOnly(_) => {
                    self.counters.readonly_hits.fetch_add(1, Ordering::Relaxed)
                }
            };
            tracing::debug!(
                plugin = %descriptor.plugin,
                hash = %hash,
                tier = ?tier,
                path = %entry.path.display(),
                "Cache hit"
            );
            let bundle = read_bundle(&entry.path)?;
            return consume(&bundle).map(Consumed::into_value);
        }

        if self.config.cache_only {
            return Err(CacheError::CacheOnlyViolation {
                plugin: descriptor.plugin.clone(),
            }
            .into());
        }

        tracing::info!(
            plugin = %descriptor.plugin,
            hash = %hash,
            "Cache miss, invoking plugin"
        );
        let bundle = self.invoke(plugin.as_ref(), descriptor)?;

        match consume(&bundle)? {
            Consumed::Cache(value) => {
                let expiry = plugin
                    .lifetime()
                    .filter(|lifetime| !lifetime.is_zero())
                    .map(|lifetime| {
                        let seconds = i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX);
                        Utc::now().timestamp().saturating_add(seconds)
                    });
                let entry = CacheEntry::in_directory(&self.config.cache_directory, &hash, expiry);
                write_bundle(&entry.path, &bundle)?;
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    plugin = %descriptor.plugin,
                    path = %entry.path.display(),
                    "Cached plugin result"
                );
                Ok(value)
            }
            Consumed::SkipCache(value) => {
                self.counters.skipped_writes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(plugin = %descriptor.plugin, hash = %hash, "Skipped caching");
                Ok(value)
            }
        }
    }

    /// Find a valid cache entry for `hash`, writable tier first.
    pub fn lookup(&self, hash: &str) -> OrderResult<Option<(CacheTier, CacheEntry)>> {
        let now = Utc::now().timestamp();

        let selection = select(scan_directory(&self.config.cache_directory, hash)?, now);
        for stale in &selection.stale {
            if let Err(e) = fs::remove_file(&stale.path) {
                tracing::warn!(
                    path = %stale.path.display(),
                    error = %e,
                    "Failed to remove stale cache file"
                );
            }
        }
        if let Some(entry) = selection.winner {
            return Ok(Some((CacheTier::Writable, entry)));
        }

        for (i, dir) in self.config.readonly_cache_directories.iter().enumerate() {
            if let Some(entry) = select(scan_directory(dir, hash)?, now).winner {
                return Ok(Some((CacheTier::ReadOnly(i), entry)));
            }
        }

        tracing::debug!(hash = %hash, "Cache miss");
        Ok(None)
    }

    fn invoke(
        &self,
        plugin: &dyn FetchPlugin,
        descriptor: &FetchDescriptor,
    ) -> OrderResult<ResultBundle> {
        self.counters.plugin_calls.fetch_add(1, Ordering::Relaxed);

        let location = plugin
            .needs_data_location()
            .then(|| self.config.data_location.as_str());
        let raw = plugin
            .retrieve(location, &descriptor.arguments)
            .map_err(|source| PluginError::RetrieveFailed {
                plugin: descriptor.plugin.clone(),
                source,
            })?;

        ResultBundle::from_value(raw).map_err(|other| {
            PluginError::ContractViolation {
                plugin: descriptor.plugin.clone(),
                reason: format!("expected an object result bundle, got {}", value_kind(&other)),
            }
            .into()
        })
    }
}

// ============================================================================
// FILE I/O
// ============================================================================

fn read_bundle(path: &Path) -> OrderResult<ResultBundle> {
    let text = fs::read_to_string(path).map_err(|e| CacheError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| {
        CacheError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Write to a temporary file next to the target, then rename it into
/// place so readers only ever see complete files. The temporary file is
/// removed when writing or renaming fails.
fn write_bundle(path: &Path, bundle: &ResultBundle) -> OrderResult<()> {
    let io_error = |p: &Path, e: std::io::Error| CacheError::Io {
        path: p.display().to_string(),
        reason: e.to_string(),
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

    let json = serde_json::to_vec(bundle).map_err(|e| CacheError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut file = NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e))?;
    file.write_all(&json).map_err(|e| io_error(file.path(), e))?;
    file.persist(path).map_err(|e| io_error(path, e.error))?;
    Ok(())
}
