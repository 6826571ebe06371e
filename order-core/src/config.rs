//! Provider configuration types

use crate::error::{ConfigError, OrderResult};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DATA_LOCATION: &str = "ORDER_DATA_LOCATION";
pub const ENV_CACHE_DIRECTORY: &str = "ORDER_CACHE_DIRECTORY";
pub const ENV_READONLY_CACHE_DIRECTORIES: &str = "ORDER_READONLY_CACHE_DIRECTORIES";
pub const ENV_CLEAR_CACHE: &str = "ORDER_CLEAR_CACHE";
pub const ENV_CACHE_ONLY: &str = "ORDER_CACHE_ONLY";

/// Cache directory used when none is configured, relative to the working directory.
pub const DEFAULT_CACHE_DIRECTORY: &str = ".order_cache";

static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+)://(.*)$").expect("scheme pattern is valid"));
static ENV_VAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(?:\{(\w+)\}|(\w+))").expect("env var pattern is valid")
});

/// Configuration of the data provider and its cache tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// URI of the catalog data (`file://...`, `https://...`).
    pub data_location: String,
    /// The single writable cache directory.
    pub cache_directory: PathBuf,
    /// Read-only fallback cache directories, searched in order.
    pub readonly_cache_directories: Vec<PathBuf>,
    /// Recursively delete the writable cache directory when the provider starts.
    pub clear_cache: bool,
    /// Refuse live plugin calls; only cached results may be used.
    pub cache_only: bool,
}

impl ProviderConfig {
    pub fn new(data_location: impl AsRef<str>, cache_directory: impl AsRef<str>) -> Self {
        Self {
            data_location: normalize_data_location(data_location.as_ref()),
            cache_directory: PathBuf::from(expand_env(cache_directory.as_ref())),
            readonly_cache_directories: Vec::new(),
            clear_cache: false,
            cache_only: false,
        }
    }

    /// Set the read-only cache directories.
    pub fn with_readonly_cache_directories<I, S>(mut self, directories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.readonly_cache_directories = directories
            .into_iter()
            .map(|d| PathBuf::from(expand_env(d.as_ref())))
            .collect();
        self
    }

    /// Enable or disable clearing the writable cache at startup.
    pub fn with_clear_cache(mut self, clear_cache: bool) -> Self {
        self.clear_cache = clear_cache;
        self
    }

    /// Enable or disable cache-only mode.
    pub fn with_cache_only(mut self, cache_only: bool) -> Self {
        self.cache_only = cache_only;
        self
    }

    /// Build the configuration from `ORDER_*` environment variables.
    pub fn from_env() -> OrderResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> OrderResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_location = lookup(ENV_DATA_LOCATION).ok_or_else(|| ConfigError::MissingRequired {
            field: ENV_DATA_LOCATION.to_string(),
        })?;

        let cache_directory = lookup(ENV_CACHE_DIRECTORY).unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_default()
                .join(DEFAULT_CACHE_DIRECTORY)
                .to_string_lossy()
                .into_owned()
        });

        let readonly = lookup(ENV_READONLY_CACHE_DIRECTORIES)
            .map(|dirs| {
                dirs.split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let clear_cache = match lookup(ENV_CLEAR_CACHE) {
            Some(flag) => flag_to_bool(ENV_CLEAR_CACHE, &flag)?,
            None => false,
        };
        let cache_only = match lookup(ENV_CACHE_ONLY) {
            Some(flag) => flag_to_bool(ENV_CACHE_ONLY, &flag)?,
            None => false,
        };

        let config = Self::new(data_location, cache_directory)
            .with_readonly_cache_directories(readonly)
            .with_clear_cache(clear_cache)
            .with_cache_only(cache_only);
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - data_location is not empty
    /// - cache_directory is not empty
    /// - cache_directory is not among readonly_cache_directories
    pub fn validate(&self) -> OrderResult<()> {
        if split_scheme(&self.data_location).map_or(true, |(_, rest)| rest.is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "data_location".to_string(),
                value: self.data_location.clone(),
                reason: "data_location must not be empty".to_string(),
            }
            .into());
        }

        if self.cache_directory.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "cache_directory".to_string(),
                value: String::new(),
                reason: "cache_directory must not be empty".to_string(),
            }
            .into());
        }

        let writable = comparable_path(&self.cache_directory);
        if self
            .readonly_cache_directories
            .iter()
            .any(|d| comparable_path(d) == writable)
        {
            return Err(ConfigError::OverlappingCacheDirectory {
                path: self.cache_directory.display().to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Local filesystem path of the data location, if it uses `file://`.
    pub fn local_data_path(&self) -> Option<PathBuf> {
        local_path(&self.data_location)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Interpret a configuration flag.
pub fn flag_to_bool(field: &str, flag: &str) -> OrderResult<bool> {
    match flag.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: flag.to_string(),
            reason: "cannot interpret as bool".to_string(),
        }
        .into()),
    }
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references. Unknown
/// variables are left untouched.
pub fn expand_env(raw: &str) -> String {
    let expanded = ENV_VAR_RE.replace_all(raw, |caps: &Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
    });

    match expanded.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => format!("{}{}", home.display(), rest),
            None => expanded.into_owned(),
        },
        _ => expanded.into_owned(),
    }
}

/// Expand a data location and give it a `file://` scheme when it has none.
pub fn normalize_data_location(raw: &str) -> String {
    let expanded = expand_env(raw.trim());
    if SCHEME_RE.is_match(&expanded) {
        expanded
    } else {
        format!("file://{}", expanded)
    }
}

/// Split a location into `(scheme, remainder)`.
pub fn split_scheme(location: &str) -> Option<(&str, &str)> {
    SCHEME_RE.captures(location).and_then(|caps| {
        let scheme = caps.get(1)?.as_str();
        let rest = caps.get(2)?.as_str();
        Some((scheme, rest))
    })
}

/// Whether the location points at the local filesystem.
pub fn is_local(location: &str) -> bool {
    matches!(split_scheme(location), Some(("file", _)))
}

/// Filesystem path of a `file://` location.
pub fn local_path(location: &str) -> Option<PathBuf> {
    match split_scheme(location) {
        Some(("file", rest)) => Some(PathBuf::from(rest)),
        _ => None,
    }
}

/// Canonical identity of a data location for cache hashing: the real path
/// for existing local locations, the location string otherwise.
pub fn location_identity(location: &str) -> String {
    match local_path(location).and_then(|p| p.canonicalize().ok()) {
        Some(real) => format!("file://{}", real.display()),
        None => location.to_string(),
    }
}

fn comparable_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        path.components().collect::<PathBuf>()
    })
}
