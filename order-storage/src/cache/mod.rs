//! Tiered on-disk cache of plugin result bundles.
//!
//! Cached bundles are addressed by a hash over the data location identity
//! and the plugin's cache key. Files may carry an expiry timestamp in their
//! name; see [`entry`] for the naming scheme.
//!
//! # Example
//!
//! ```ignore
//! let provider = DataProvider::new(config, registry)?;
//! let n_events: u64 = provider.materialize(&descriptor, |bundle| {
//!     let value = bundle.get("n_events").and_then(|v| v.as_u64()).unwrap_or_default();
//!     Ok(Consumed::Cache(value))
//! })?;
//! ```

pub mod entry;
pub mod provider;

pub use entry::{scan_directory, select, CacheEntry, Selection};
pub use provider::{
    global_provider, init_provider, CacheStats, CacheTier, Consumed, DataProvider,
};
