//! Disk Store Module
//!
//! Key-addressed persistent text store with per-entry expiry and an
//! aggregate size limit. Safe to share between tasks without extra locking.

mod disk;
mod entry;
mod order;
mod stats;


// Re-export public types
pub use disk::DiskStore;
pub use entry::DiskEntry;
pub use order::WriteOrder;
pub use stats::StoreStats;

// == Public Constants ==
/// Snapshot of per-key entry metadata inside the storage folder
pub const MANIFEST_FILE: &str = "manifest.json";

/// Append-only log of manifest changes since the last snapshot
pub const JOURNAL_FILE: &str = "manifest.journal";

/// Extension of the files holding entry values
pub const BLOB_EXTENSION: &str = "blob";

/// Extension of files being written before they are renamed into place
pub const TEMP_EXTENSION: &str = "tmp";
