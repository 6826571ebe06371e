//! Error types for order operations

use thiserror::Error;

/// Provider configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Cache directory {path} must not also be listed as a read-only cache directory")]
    OverlappingCacheDirectory { path: String },

    #[error("The process-wide data provider is already initialized")]
    AlreadyInitialized,
}

/// Failures reported by a plugin's `retrieve` implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("missing argument '{argument}'")]
    MissingArgument { argument: String },

    #[error("invalid argument '{argument}': {reason}")]
    InvalidArgument { argument: String, reason: String },

    #[error("data location {location} is not supported: {reason}")]
    UnsupportedLocation { location: String, reason: String },

    #[error("I/O error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("cannot parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("no entry named '{name}' found in {location}")]
    NotFound { name: String, location: String },
}

/// Plugin registry and plugin contract errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("Unknown plugin '{name}'")]
    UnknownPlugin { name: String },

    #[error("Cannot register plugin '{name}': name already registered")]
    DuplicatePlugin { name: String },

    #[error("Plugin '{plugin}' violated its contract: {reason}")]
    ContractViolation { plugin: String, reason: String },

    #[error("Plugin '{plugin}' failed to retrieve data: {source}")]
    RetrieveFailed {
        plugin: String,
        #[source]
        source: FetchError,
    },
}

/// On-disk cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache-only mode is active, refusing to invoke plugin '{plugin}'")]
    CacheOnlyViolation { plugin: String },

    #[error("Cache I/O failed at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Cache file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },
}

/// Errors raised while turning a fetched bundle into field values or objects.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MaterializeError {
    #[error("Plugin '{plugin}' did not provide key '{key}'")]
    Incomplete { plugin: String, key: String },

    #[error("Unknown lazy field '{field}'")]
    UnknownField { field: String },

    #[error("Invalid value for lazy field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error(
        "Lazy {type_name} ({expected_name}, {expected_id}) materialized into ({found_name}, {found_id})"
    )]
    IdentityMismatch {
        type_name: String,
        expected_name: String,
        expected_id: u64,
        found_name: String,
        found_id: u64,
    },
}

/// Unique object index errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("Duplicate {type_name} object with name '{name}'")]
    DuplicateName { type_name: String, name: String },

    #[error("Duplicate {type_name} object with id {id}")]
    DuplicateId { type_name: String, id: u64 },

    #[error("{type_name} object '{key}' not found in index")]
    NotFound { type_name: String, key: String },

    #[error("Index of {expected} objects cannot hold a {found} object")]
    TypeMismatch { expected: String, found: String },

    #[error("Referenced {type_name} object '{name}' no longer exists")]
    ReferenceDropped { type_name: String, name: String },

    #[error("{type_name} object '{name}' is already borrowed")]
    Busy { type_name: String, name: String },
}

/// Model validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Master error type for all order errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Materialize error: {0}")]
    Materialize(#[from] MaterializeError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Result type alias for order operations.
pub type OrderResult<T> = Result<T, OrderError>;

// =============================================================================
// TESTS
// =============================================================================
