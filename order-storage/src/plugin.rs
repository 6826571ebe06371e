//! Fetch plugin contract and the plugin registry.
//!
//! A plugin turns a set of named arguments into a [`ResultBundle`]. Plugins
//! are registered by name before first use; the registry fails fast on name
//! collisions and on lookups of unknown names.

use order_core::{canonical_cache_key, Arguments, FetchError, OrderResult, PluginError};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

// ============================================================================
// PLUGIN CONTRACT
// ============================================================================

/// Interface every data source implements.
///
/// `retrieve` must be deterministic with respect to its arguments, which is
/// what makes its results cacheable. The returned value must be a JSON object;
/// anything else is reported as a contract violation by the data provider.
pub trait FetchPlugin: Send + Sync {
    /// Globally unique plugin name.
    fn name(&self) -> &str;

    /// Whether `retrieve` receives the provider's data location.
    fn needs_data_location(&self) -> bool {
        false
    }

    /// How long a cached result stays valid. `None` or zero never expires.
    fn lifetime(&self) -> Option<Duration> {
        None
    }

    /// Order-independent normalization of the arguments, used for the cache hash.
    fn cache_key(&self, arguments: &Arguments) -> String {
        canonical_cache_key(arguments)
    }

    /// Fetch the result bundle.
    fn retrieve(
        &self,
        data_location: Option<&str>,
        arguments: &Arguments,
    ) -> Result<Value, FetchError>;
}

/// Constructor stored in the registry.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn FetchPlugin> + Send + Sync>;

// ============================================================================
// REGISTRY
// ============================================================================

static GLOBAL_REGISTRY: Lazy<Arc<PluginRegistry>> = Lazy::new(|| Arc::new(PluginRegistry::new()));

/// Name-to-constructor table of fetch plugins.
#[derive(Default)]
pub struct PluginRegistry {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<PluginRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Register a plugin constructor. The plugin is instantiated once to
    /// learn its name; registering a name twice fails.
    pub fn register<F>(&self, factory: F) -> OrderResult<()>
    where
        F: Fn() -> Box<dyn FetchPlugin> + Send + Sync + 'static,
    {
        let name = factory().name().to_string();
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        if factories.contains_key(&name) {
            return Err(PluginError::DuplicatePlugin { name }.into());
        }
        factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Whether a plugin with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered plugin names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Instantiate the plugin registered under `name`.
    pub fn create(&self, name: &str) -> OrderResult<Box<dyn FetchPlugin>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::UnknownPlugin {
                name: name.to_string(),
            })?;
        Ok(factory())
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}
