//! Disk Entry Module
//!
//! Metadata kept for every key written to the disk store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Expiry;
use crate::store::BLOB_EXTENSION;

// == Disk Entry ==
/// Describes where a value lives on disk and when it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskEntry {
    /// Name of the blob file inside the storage folder
    pub file_name: String,
    /// Size of the stored value in bytes
    pub size: u64,
    /// When the value was last written
    pub written_at: DateTime<Utc>,
    /// Expiration time, None = never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl DiskEntry {
    // == Constructor ==
    /// Creates metadata for `key` holding `size` bytes, written now.
    pub fn new(key: &str, size: u64, expiry: Expiry) -> Self {
        let now = Utc::now();
        Self {
            file_name: blob_file_name(key),
            size,
            written_at: now,
            expires_at: expiry.deadline_from(now),
        }
    }

    // == Is Expired ==
    /// An entry is expired once the current time reaches its deadline.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }
}

// == Utility Functions ==
/// File name for a key: hex SHA-256 of the key, so any key is a safe path.
pub fn blob_file_name(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{}.{}", hex::encode(digest), BLOB_EXTENSION)
}
