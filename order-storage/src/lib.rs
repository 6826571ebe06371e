//! ORDER Storage - Plugins and the Result Cache
//!
//! Fetch plugins produce result bundles; the [`DataProvider`] decides whether
//! a bundle comes from one of the cache tiers or from a live plugin call, and
//! persists fresh bundles once the caller has consumed them.

pub mod cache;
pub mod plugin;

pub use cache::{
    global_provider, init_provider, CacheEntry, CacheStats, CacheTier, Consumed, DataProvider,
};
pub use plugin::{FetchPlugin, PluginFactory, PluginRegistry};
