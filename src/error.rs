//! Error types for the object cache
//!
//! `StorageError` is raised by the disk store, `CacheError` is what callers
//! of the delegate and contexts see. Converting one into the other is the
//! only mapping step between the two layers.

use thiserror::Error;

// == Storage Error Enum ==
/// Errors raised by the disk store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Key is absent or its entry has expired
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Stored value exists but is not of the requested type
    #[error("Stored value has an unexpected type: {0}")]
    TypeNotMatch(String),

    /// Entry metadata could not be read or is inconsistent
    #[error("Malformed entry attributes: {0}")]
    MalformedFileAttributes(String),

    /// Stored bytes could not be decoded
    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    /// Value could not be encoded for storage
    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    /// Storage has been torn down
    #[error("Storage has been deallocated")]
    Deallocated,

    /// Value could not be transformed to or from bytes
    #[error("Transform failed: {0}")]
    TransformerFail(String),

    /// Underlying filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// == Cache Error Enum ==
/// Errors surfaced to cache callers.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key absent or expired at load time
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Decoded value does not match the requested type
    #[error("Type mismatch for key: {0}")]
    TypeMismatch(String),

    #[error("Malformed attributes: {0}")]
    MalformedAttributes(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    /// Disk store is gone or its folder cannot be used
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Transform failed: {0}")]
    TransformFailed(String),

    /// Collection index is missing or malformed, or one of its members failed to load
    #[error("Not a conforming cacheable collection: {0}")]
    NotConformingCacheable(String),

    /// Collection member at `index` has no usable identifier
    #[error("Collection member at index {index} has no identifier")]
    MissingIdentifier { index: usize },

    /// Shared manager was initialised twice
    #[error("Cache manager already initialised")]
    AlreadyInitialised,
}

impl CacheError {
    /// Returns true for errors meaning "nothing stored under this key".
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

// == Storage -> Cache Mapping ==
impl From<StorageError> for CacheError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => CacheError::NotFound(key),
            StorageError::TypeNotMatch(msg) => CacheError::TypeMismatch(msg),
            StorageError::MalformedFileAttributes(msg) => CacheError::MalformedAttributes(msg),
            StorageError::DecodingFailed(msg) => CacheError::DecodingFailed(msg),
            StorageError::EncodingFailed(msg) => CacheError::EncodingFailed(msg),
            StorageError::Deallocated => {
                CacheError::StoreUnavailable("storage has been deallocated".to_string())
            }
            StorageError::TransformerFail(msg) => CacheError::TransformFailed(msg),
            StorageError::Io(e) => CacheError::StoreUnavailable(e.to_string()),
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Result type used inside the disk store.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
