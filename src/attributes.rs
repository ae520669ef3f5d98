//! Cached Attributes
//!
//! Key/value convenience layer for plain serde values that do not define an
//! identifier of their own. Values are wrapped in [`CacheableValue`] and
//! stored under their key.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::codec::CacheableValue;
use crate::error::{CacheError, Result};
use crate::manager::CacheManager;

pub struct CachedAttributes {
    manager: Arc<CacheManager>,
}

impl CachedAttributes {
    pub fn new(manager: &Arc<CacheManager>) -> Self {
        Self {
            manager: manager.clone(),
        }
    }

    /// Attributes bound to the process-wide manager.
    ///
    /// # Panics
    /// If the shared manager has not been initialised.
    pub fn from_shared() -> Self {
        Self::new(&CacheManager::shared())
    }

    /// Writes `attribute` under its identifier in the background.
    ///
    /// Returns `None` when there is nothing to write: no key, or no value.
    pub fn save<T>(&self, attribute: CacheableValue<T>) -> Option<JoinHandle<()>>
    where
        T: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static,
    {
        let key = attribute.id.clone().filter(|id| !id.is_empty())?;
        attribute.value.as_ref()?;

        let delegate = self.manager.delegate().clone();
        Some(self.manager.spawn(async move {
            delegate.store_single(&attribute, &key).await;
        }))
    }

    /// Loads the attribute stored under `key`, with its identifier restored.
    ///
    /// # Errors
    /// `NotFound` for a missing key, `TypeMismatch` when the stored value
    /// does not decode as `T`.
    pub async fn get<T>(&self, key: &str) -> Result<CacheableValue<T>>
    where
        T: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static,
    {
        let mut attribute: CacheableValue<T> = self.manager.delegate().load_single(key).await?;
        if attribute.value.is_none() {
            return Err(CacheError::TypeMismatch(key.to_string()));
        }
        attribute.id = Some(key.to_string());
        Ok(attribute)
    }

    /// Deletes the attribute stored under `key` in the background.
    pub fn delete(&self, key: impl Into<String>) -> JoinHandle<()> {
        let key = key.into();
        let delegate = self.manager.delegate().clone();
        self.manager.spawn(async move {
            delegate.delete(&key).await;
        })
    }
}
