//! Configuration Module
//!
//! Describes where the disk cache lives, how long entries survive and how
//! large the storage folder may grow.

use std::env;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// == Expiry ==
/// Expiry policy applied to an entry at write time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expiry {
    /// Entry never expires
    #[default]
    Never,
    /// Entry expires the given number of seconds after it was written
    Seconds(u64),
    /// Entry expires at a fixed point in time
    Date(DateTime<Utc>),
}

impl Expiry {
    /// Resolves the policy to an absolute deadline for an entry written at `now`.
    ///
    /// Returns `None` for [`Expiry::Never`].
    pub fn deadline_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Expiry::Never => None,
            Expiry::Seconds(secs) => {
                let secs = i64::try_from(*secs).unwrap_or(i64::MAX);
                Some(
                    Duration::try_seconds(secs)
                        .and_then(|d| now.checked_add_signed(d))
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                )
            }
            Expiry::Date(date) => Some(*date),
        }
    }
}

// == Cache Config ==
/// Cache configuration parameters.
///
/// Supplied once when the [`CacheManager`](crate::CacheManager) is
/// initialised and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Name of the storage area, used as the folder name inside `directory`
    pub name: String,
    /// Expiry applied to every write that does not override it
    pub expiry: Expiry,
    /// Maximum size of the storage folder in bytes, 0 = unbounded
    pub max_size: u64,
    /// Parent folder of the storage area, defaults to the user cache dir
    pub directory: Option<PathBuf>,
    /// Interval in seconds between background purges of expired entries
    pub cleanup_interval: u64,
}

impl CacheConfig {
    /// Creates a configuration with the given storage name and defaults
    /// for everything else.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_cleanup_interval(mut self, secs: u64) -> Self {
        self.cleanup_interval = secs;
        self
    }

    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_NAME` - Storage folder name (default: object_cache)
    /// - `CACHE_EXPIRY_SECS` - Default expiry in seconds (default: never)
    /// - `CACHE_MAX_SIZE` - Maximum storage size in bytes (default: 0, unbounded)
    /// - `CACHE_DIRECTORY` - Parent folder of the storage area (default: user cache dir)
    /// - `CLEANUP_INTERVAL` - Purge frequency in seconds (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            name: env::var("CACHE_NAME")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.name),
            expiry: env::var("CACHE_EXPIRY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Expiry::Seconds)
                .unwrap_or(defaults.expiry),
            max_size: env::var("CACHE_MAX_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_size),
            directory: env::var("CACHE_DIRECTORY").ok().map(PathBuf::from),
            cleanup_interval: env::var("CLEANUP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cleanup_interval),
        }
    }

    /// Folder holding this configuration's entries.
    pub fn storage_path(&self) -> PathBuf {
        let base = self
            .directory
            .clone()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(env::temp_dir);
        base.join(&self.name)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "object_cache".to_string(),
            expiry: Expiry::Never,
            max_size: 0,
            directory: None,
            cleanup_interval: 60,
        }
    }
}
