//! Disk Store
//!
//! Every value is written verbatim to its own file. Per-key metadata (file
//! name, size, expiry) lives in a manifest snapshot plus an append-only
//! journal of changes since that snapshot. Each write appends to the
//! journal; the snapshot is rewritten only once the journal outgrows the
//! live entries. All state sits behind one async lock, so the store can be
//! shared freely.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{CacheConfig, Expiry};
use crate::error::{StorageError, StorageResult};
use crate::store::{
    DiskEntry, StoreStats, WriteOrder, BLOB_EXTENSION, JOURNAL_FILE, MANIFEST_FILE,
    TEMP_EXTENSION,
};

/// Journal length below which the snapshot is never rewritten
const MIN_COMPACTION_RECORDS: usize = 64;

/// One manifest change, stored as a line of the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalRecord {
    Put { key: String, entry: DiskEntry },
    Drop { key: String },
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<String, DiskEntry>,
    order: WriteOrder,
    stats: StoreStats,
    total_size: u64,
    /// Changes made under the current lock, not yet in the journal
    unsynced: Vec<JournalRecord>,
    /// Records in the journal since the last snapshot
    journal_len: usize,
}

// == Disk Store ==
/// Persistent key/value store for text blobs.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    default_expiry: Expiry,
    max_size: u64,
    state: RwLock<StoreState>,
}

impl DiskStore {
    // == Open ==
    /// Opens (or creates) the storage folder described by `config`.
    ///
    /// The journal is replayed onto the snapshot and folded into a fresh
    /// snapshot. A snapshot that cannot be parsed is discarded together with
    /// the journal and the blobs they described; the store then starts empty.
    pub async fn open(config: &CacheConfig) -> StorageResult<Self> {
        let root = config.storage_path();
        fs::create_dir_all(&root).await?;

        let (entries, replayed) = match load_snapshot(&root).await {
            Some(mut entries) => {
                let replayed = replay_journal(&root, &mut entries).await;
                (entries, replayed)
            }
            None => (HashMap::new(), 0),
        };
        sweep_orphans(&root, &entries).await?;

        let mut live: Vec<(&String, &DiskEntry)> = entries.iter().collect();
        live.sort_by_key(|(_, entry)| entry.written_at);
        let order = WriteOrder::from_oldest_first(live.iter().map(|(key, _)| (*key).clone()));
        let total_size: u64 = entries.values().map(|entry| entry.size).sum();

        info!(
            path = %root.display(),
            entries = entries.len(),
            bytes = total_size,
            replayed,
            "disk store opened"
        );

        let store = Self {
            root,
            default_expiry: config.expiry,
            max_size: config.max_size,
            state: RwLock::new(StoreState {
                entries,
                order,
                stats: StoreStats::new(),
                total_size,
                unsynced: Vec::new(),
                journal_len: 0,
            }),
        };
        store.write_snapshot(&*store.state.read().await).await?;
        Ok(store)
    }

    /// Storage folder of this store.
    pub fn path(&self) -> &Path {
        &self.root
    }

    // == Get ==
    /// Reads the value stored under `key`.
    ///
    /// Expired entries are removed and reported as `NotFound`.
    pub async fn get(&self, key: &str) -> StorageResult<String> {
        // Write lock: reads update stats and may drop expired entries
        let mut state = self.state.write().await;

        let Some(entry) = state.entries.get(key).cloned() else {
            state.stats.record_miss();
            debug!(key, "disk cache miss");
            return Err(StorageError::NotFound(key.to_string()));
        };

        if entry.is_expired() {
            self.forget(&mut state, key).await;
            state.stats.record_expiration();
            state.stats.record_miss();
            self.sync_manifest(&mut state).await?;
            debug!(key, "disk cache entry expired");
            return Err(StorageError::NotFound(key.to_string()));
        }

        let bytes = match fs::read(self.root.join(&entry.file_name)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(key, "blob missing for manifest entry, dropping it");
                self.forget(&mut state, key).await;
                state.stats.record_miss();
                self.sync_manifest(&mut state).await?;
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let value = String::from_utf8(bytes)
            .map_err(|e| StorageError::DecodingFailed(format!("{key}: {e}")))?;

        state.stats.record_hit();
        debug!(key, "disk cache hit");
        Ok(value)
    }

    // == Set ==
    /// Writes `value` under `key`, replacing any previous value.
    ///
    /// `expiry` of `None` applies the configured default. Writing past the
    /// size limit evicts the oldest entries.
    pub async fn set(&self, key: &str, value: &str, expiry: Option<Expiry>) -> StorageResult<()> {
        let expiry = expiry.unwrap_or(self.default_expiry);
        let entry = DiskEntry::new(key, value.len() as u64, expiry);

        let mut state = self.state.write().await;
        write_atomic(&self.root.join(&entry.file_name), value.as_bytes()).await?;

        let size = entry.size;
        if let Some(previous) = state.entries.insert(key.to_string(), entry.clone()) {
            state.total_size = state.total_size.saturating_sub(previous.size);
        }
        state.total_size += size;
        state.order.touch(key);
        state.unsynced.push(JournalRecord::Put {
            key: key.to_string(),
            entry,
        });

        self.enforce_size_limit(&mut state).await;
        self.sync_manifest(&mut state).await
    }

    // == Remove ==
    /// Removes `key`. Returns whether an entry existed.
    pub async fn remove(&self, key: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        if self.forget(&mut state, key).await.is_none() {
            return Ok(false);
        }
        self.sync_manifest(&mut state).await?;
        Ok(true)
    }

    /// True if `key` holds a live entry.
    pub async fn contains(&self, key: &str) -> bool {
        let state = self.state.read().await;
        state
            .entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    // == Purge Expired ==
    /// Removes every expired entry, returning how many were dropped.
    pub async fn purge_expired(&self) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let removed = self.purge_expired_locked(&mut state).await;
        self.sync_manifest(&mut state).await?;
        Ok(removed)
    }

    /// Removes every entry.
    pub async fn clear(&self) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let keys: Vec<String> = state.entries.keys().cloned().collect();
        for key in keys {
            self.forget(&mut state, &key).await;
        }
        state.order.clear();
        self.sync_manifest(&mut state).await
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Combined size of all stored values in bytes.
    pub async fn total_size(&self) -> u64 {
        self.state.read().await.total_size
    }

    pub async fn stats(&self) -> StoreStats {
        let state = self.state.read().await;
        let mut stats = state.stats.clone();
        stats.total_entries = state.entries.len();
        stats.total_size = state.total_size;
        stats
    }

    // == Internals ==
    async fn forget(&self, state: &mut StoreState, key: &str) -> Option<DiskEntry> {
        let entry = state.entries.remove(key)?;
        state.order.remove(key);
        state.total_size = state.total_size.saturating_sub(entry.size);
        state.unsynced.push(JournalRecord::Drop {
            key: key.to_string(),
        });
        remove_file_quietly(&self.root.join(&entry.file_name)).await;
        Some(entry)
    }

    async fn purge_expired_locked(&self, state: &mut StoreState) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.forget(state, key).await;
            state.stats.record_expiration();
        }
        expired.len()
    }

    /// Once over the limit, drop expired entries and then the oldest writes
    /// until the store is at most half full.
    async fn enforce_size_limit(&self, state: &mut StoreState) {
        if self.max_size == 0 || state.total_size <= self.max_size {
            return;
        }

        self.purge_expired_locked(state).await;

        let target = self.max_size / 2;
        while state.total_size > target {
            let Some(oldest) = state.order.pop_oldest() else {
                break;
            };
            if self.forget(state, &oldest).await.is_some() {
                state.stats.record_eviction();
                debug!(key = %oldest, "evicted to honour size limit");
            }
        }
    }

    /// Appends pending changes to the journal, or folds everything into a
    /// new snapshot once the journal is longer than the live entries.
    async fn sync_manifest(&self, state: &mut StoreState) -> StorageResult<()> {
        if state.unsynced.is_empty() {
            return Ok(());
        }
        let records = std::mem::take(&mut state.unsynced);
        let threshold = state.entries.len().max(MIN_COMPACTION_RECORDS);

        if state.journal_len + records.len() > threshold {
            self.write_snapshot(state).await?;
            state.journal_len = 0;
            return Ok(());
        }

        append_journal(&self.root.join(JOURNAL_FILE), &records).await?;
        state.journal_len += records.len();
        Ok(())
    }

    async fn write_snapshot(&self, state: &StoreState) -> StorageResult<()> {
        let json = serde_json::to_vec(&state.entries)
            .map_err(|e| StorageError::EncodingFailed(e.to_string()))?;
        write_atomic(&self.root.join(MANIFEST_FILE), &json).await?;
        remove_file_quietly(&self.root.join(JOURNAL_FILE)).await;
        debug!(entries = state.entries.len(), "manifest snapshot written");
        Ok(())
    }
}

// == Utility Functions ==
/// Reads the manifest snapshot. A missing snapshot is an empty store;
/// `None` means the snapshot exists but cannot be used.
async fn load_snapshot(root: &Path) -> Option<HashMap<String, DiskEntry>> {
    let path = root.join(MANIFEST_FILE);
    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Some(HashMap::new()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read manifest, starting empty");
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(entries) => Some(entries),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed manifest, starting empty");
            None
        }
    }
}

/// Applies journal records on top of `entries`, returning how many applied.
///
/// A line that does not parse (a write cut short) is skipped.
async fn replay_journal(root: &Path, entries: &mut HashMap<String, DiskEntry>) -> usize {
    let path = root.join(JOURNAL_FILE);
    let text = match fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "cannot read manifest journal");
            }
            return 0;
        }
    };

    let mut applied = 0;
    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        match serde_json::from_str::<JournalRecord>(line) {
            Ok(JournalRecord::Put { key, entry }) => {
                entries.insert(key, entry);
                applied += 1;
            }
            Ok(JournalRecord::Drop { key }) => {
                entries.remove(&key);
                applied += 1;
            }
            Err(e) => warn!(error = %e, "skipping unreadable journal record"),
        }
    }
    applied
}

async fn append_journal(path: &Path, records: &[JournalRecord]) -> StorageResult<()> {
    let mut lines = String::new();
    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| StorageError::EncodingFailed(e.to_string()))?;
        lines.push_str(&line);
        lines.push('\n');
    }

    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?
        .write_all(lines.as_bytes())
        .await?;
    Ok(())
}

/// Deletes blob files no manifest entry points at, and temp files left by
/// interrupted writes.
async fn sweep_orphans(root: &Path, entries: &HashMap<String, DiskEntry>) -> StorageResult<()> {
    let mut dir = fs::read_dir(root).await?;
    let mut removed = 0usize;
    while let Some(item) = dir.next_entry().await? {
        let path = item.path();
        let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
            continue;
        };
        let orphaned = match extension {
            TEMP_EXTENSION => true,
            BLOB_EXTENSION => !path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| entries.values().any(|entry| entry.file_name == name))
                .unwrap_or(false),
            _ => false,
        };
        if orphaned {
            remove_file_quietly(&path).await;
            removed += 1;
        }
    }
    if removed > 0 {
        debug!(removed, "removed orphaned files");
    }
    Ok(())
}

async fn write_atomic(path: &Path, content: &[u8]) -> StorageResult<()> {
    let temp_path = path.with_extension(TEMP_EXTENSION);
    fs::write(&temp_path, content).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

async fn remove_file_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}
