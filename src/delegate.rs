//! Cache Delegate
//!
//! Translates typed load/store/delete requests into disk store operations.
//!
//! A collection is stored as an index (a JSON array of member identifiers)
//! under the collection key, with every member stored under its own
//! identifier. Re-storing one member therefore updates every collection
//! that references it without touching the indexes.

use tracing::{debug, warn};

use crate::codec::{self, Cacheable};
use crate::config::{CacheConfig, Expiry};
use crate::error::{CacheError, Result};
use crate::store::DiskStore;

// == Cache Delegate ==
/// Engine between in-memory models and the disk store.
///
/// Holds no state besides the store, so a single instance is shared by
/// every context in the process.
#[derive(Debug)]
pub struct CacheDelegate {
    store: DiskStore,
}

impl CacheDelegate {
    /// Opens the disk store described by `config`.
    pub async fn open(config: &CacheConfig) -> Result<Self> {
        let store = DiskStore::open(config).await?;
        Ok(Self::with_store(store))
    }

    pub fn with_store(store: DiskStore) -> Self {
        Self { store }
    }

    /// Underlying disk store.
    pub fn store(&self) -> &DiskStore {
        &self.store
    }

    // == Load Single ==
    /// Loads the value stored under `key`.
    ///
    /// # Errors
    /// - `NotFound` when the key is absent or expired
    /// - `TypeMismatch` when the stored text does not decode as `T`
    /// - other store failures, mapped from the disk store
    pub async fn load_single<T: Cacheable>(&self, key: &str) -> Result<T> {
        let encoded = self.store.get(key).await?;
        T::decode(&encoded).ok_or_else(|| CacheError::TypeMismatch(key.to_string()))
    }

    // == Store Single ==
    /// Writes `entity` under `key` with the configured default expiry.
    ///
    /// Best effort: failures are logged and dropped, since the in-memory copy
    /// stays authoritative.
    pub async fn store_single<T: Cacheable>(&self, entity: &T, key: &str) {
        self.store_single_with_expiry(entity, key, None).await;
    }

    /// Like [`store_single`](Self::store_single) with an explicit expiry;
    /// `None` uses the configured default.
    ///
    /// An entity with no encoding clears whatever was stored under `key`, so
    /// the disk never holds an older value than memory.
    pub async fn store_single_with_expiry<T: Cacheable>(
        &self,
        entity: &T,
        key: &str,
        expiry: Option<Expiry>,
    ) {
        match entity.encode() {
            Some(encoded) => self.write_encoded(key, &encoded, expiry).await,
            None => {
                debug!(key, "entity has no encoding, clearing stale entry");
                self.delete(key).await;
            }
        }
    }

    // == Load Collection ==
    /// Loads every member listed in the index stored under `key`, in index order.
    ///
    /// All or nothing: a missing or malformed index, or any member that
    /// fails to load, fails the whole collection with `NotConformingCacheable`.
    pub async fn load_collection<T: Cacheable>(&self, key: &str) -> Result<Vec<T>> {
        let index = self
            .store
            .get(key)
            .await
            .map_err(|e| CacheError::NotConformingCacheable(format!("{key}: {e}")))?;

        let ids = codec::decode_index(&index).ok_or_else(|| {
            CacheError::NotConformingCacheable(format!("{key}: malformed collection index"))
        })?;

        let mut members = Vec::with_capacity(ids.len());
        for id in &ids {
            let member = self.load_single::<T>(id).await.map_err(|e| {
                CacheError::NotConformingCacheable(format!("{key}: member {id}: {e}"))
            })?;
            members.push(member);
        }

        debug!(key, members = members.len(), "loaded collection");
        Ok(members)
    }

    // == Store Collection ==
    /// Writes each member under its own identifier, then the index under `key`.
    ///
    /// # Errors
    /// `MissingIdentifier` if any member lacks a non-empty identifier and
    /// `EncodingFailed` if any member has no encoding; nothing is written in
    /// either case. Disk failures are logged and dropped.
    pub async fn store_collection<T: Cacheable>(&self, entities: &[T], key: &str) -> Result<()> {
        self.store_collection_with_expiry(entities, key, None).await
    }

    pub async fn store_collection_with_expiry<T: Cacheable>(
        &self,
        entities: &[T],
        key: &str,
        expiry: Option<Expiry>,
    ) -> Result<()> {
        let ids = member_ids(entities)?;
        let encoded = member_encodings(entities, key)?;

        for (id, member) in ids.iter().zip(&encoded) {
            self.write_encoded(id, member, expiry).await;
        }

        // A list of strings always serializes
        let index = codec::encode_index(&ids)
            .map_err(|e| CacheError::EncodingFailed(format!("{key}: {e}")))?;
        self.write_encoded(key, &index, expiry).await;

        debug!(key, members = ids.len(), "stored collection");
        Ok(())
    }

    // == Delete ==
    /// Removes the entry at `key`.
    ///
    /// For a collection only the index goes; members may be shared with
    /// other collections and stay loadable by identifier.
    pub async fn delete(&self, key: &str) {
        match self.store.remove(key).await {
            Ok(true) => debug!(key, "deleted cache entry"),
            Ok(false) => debug!(key, "nothing to delete"),
            Err(e) => warn!(key, error = %e, "failed to delete cache entry"),
        }
    }

    async fn write_encoded(&self, key: &str, encoded: &str, expiry: Option<Expiry>) {
        if let Err(e) = self.store.set(key, encoded, expiry).await {
            warn!(key, error = %e, "failed to write cache entry");
        }
    }
}

fn member_ids<T: Cacheable>(entities: &[T]) -> Result<Vec<&str>> {
    entities
        .iter()
        .enumerate()
        .map(|(index, entity)| match entity.identifier() {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(CacheError::MissingIdentifier { index }),
        })
        .collect()
}

fn member_encodings<T: Cacheable>(entities: &[T], key: &str) -> Result<Vec<String>> {
    entities
        .iter()
        .enumerate()
        .map(|(index, entity)| {
            entity.encode().ok_or_else(|| {
                CacheError::EncodingFailed(format!("{key}: member {index} has no encoding"))
            })
        })
        .collect()
}
