//! Object Cache - typed, disk-backed caching for in-memory models
//!
//! Models are encoded to text, persisted on disk with optional expiry, and
//! kept consistent in memory across every context that holds them.

pub mod attributes;
pub mod codec;
pub mod config;
pub mod context;
pub mod delegate;
pub mod error;
pub mod manager;
pub mod store;
pub mod tasks;

pub use attributes::CachedAttributes;
pub use codec::{Cacheable, CacheableValue};
pub use config::{CacheConfig, Expiry};
pub use context::{CacheContext, ContextObserver, PendingFetch};
pub use delegate::CacheDelegate;
pub use error::{CacheError, Result, StorageError};
pub use manager::{CacheManager, UpdateContext};
pub use store::DiskStore;
pub use tasks::spawn_cleanup_task;
