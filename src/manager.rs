//! Cache Manager
//!
//! One manager per process. It owns the shared [`CacheDelegate`], runs the
//! background writes and fetches issued by contexts, and keeps the
//! identifier-keyed registry used to propagate model changes between
//! contexts holding the same model.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::delegate::CacheDelegate;
use crate::error::{CacheError, Result};

/// Opaque value passed along with a change to the observers it reaches.
pub type UpdateContext = Arc<dyn Any + Send + Sync>;

/// Receives changes made through other contexts to a model it holds.
pub(crate) trait ModelListener: Send + Sync {
    fn model_updated(&self, model: &(dyn Any + Send + Sync), context: Option<&UpdateContext>);

    fn model_deleted(&self, context: Option<&UpdateContext>);
}

struct Registration {
    token: u64,
    listener: Weak<dyn ModelListener>,
}

static SHARED: OnceLock<Arc<CacheManager>> = OnceLock::new();

// == Cache Manager ==
pub struct CacheManager {
    config: CacheConfig,
    delegate: Arc<CacheDelegate>,
    runtime: Handle,
    listeners: Mutex<HashMap<String, Vec<Registration>>>,
    next_token: AtomicU64,
}

impl CacheManager {
    // == Initialise ==
    /// Opens the disk store for `config` and returns the manager.
    ///
    /// Must be called from within a tokio runtime; background work issued by
    /// contexts runs on that runtime.
    pub async fn initialise(config: CacheConfig) -> Result<Arc<Self>> {
        let delegate = CacheDelegate::open(&config).await?;
        info!(name = %config.name, "cache manager initialised");
        Ok(Arc::new(Self {
            config,
            delegate: Arc::new(delegate),
            runtime: Handle::current(),
            listeners: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }))
    }

    /// Initialises the process-wide manager returned by [`shared`](Self::shared).
    ///
    /// # Errors
    /// `AlreadyInitialised` on any call after the first successful one.
    pub async fn initialise_shared(config: CacheConfig) -> Result<Arc<Self>> {
        if SHARED.get().is_some() {
            return Err(CacheError::AlreadyInitialised);
        }
        let manager = Self::initialise(config).await?;
        SHARED
            .set(manager.clone())
            .map_err(|_| CacheError::AlreadyInitialised)?;
        Ok(manager)
    }

    /// Process-wide manager.
    ///
    /// # Panics
    /// If [`initialise_shared`](Self::initialise_shared) has not completed.
    /// Using the cache before it is configured is a programming error.
    pub fn shared() -> Arc<Self> {
        match SHARED.get() {
            Some(manager) => manager.clone(),
            None => panic!(
                "cache manager used before initialisation: call CacheManager::initialise_shared first"
            ),
        }
    }

    pub fn try_shared() -> Option<Arc<Self>> {
        SHARED.get().cloned()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn delegate(&self) -> &Arc<CacheDelegate> {
        &self.delegate
    }

    /// Number of live contexts currently holding the model `id`.
    pub fn listener_count(&self, id: &str) -> usize {
        self.registry()
            .get(id)
            .map(|regs| regs.iter().filter(|r| r.listener.strong_count() > 0).count())
            .unwrap_or(0)
    }

    // == Background Work ==
    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    // == Listener Registry ==
    pub(crate) fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register(&self, id: &str, token: u64, listener: Weak<dyn ModelListener>) {
        let mut registry = self.registry();
        let regs = registry.entry(id.to_string()).or_default();
        regs.retain(|r| r.token != token && r.listener.strong_count() > 0);
        regs.push(Registration { token, listener });
    }

    pub(crate) fn unregister(&self, id: &str, token: u64) {
        let mut registry = self.registry();
        if let Some(regs) = registry.get_mut(id) {
            regs.retain(|r| r.token != token && r.listener.strong_count() > 0);
            if regs.is_empty() {
                registry.remove(id);
            }
        }
    }

    /// Hands `model` to every other context holding `id`.
    pub(crate) fn publish_update(
        &self,
        id: &str,
        model: &(dyn Any + Send + Sync),
        origin: u64,
        context: Option<&UpdateContext>,
    ) {
        let listeners = self.listeners_for(id, origin);
        if !listeners.is_empty() {
            debug!(id, receivers = listeners.len(), "propagating model update");
        }
        for listener in listeners {
            listener.model_updated(model, context);
        }
    }

    /// Tells every other context holding `id` that the model is gone.
    pub(crate) fn publish_delete(&self, id: &str, origin: u64, context: Option<&UpdateContext>) {
        let listeners = self.listeners_for(id, origin);
        if !listeners.is_empty() {
            debug!(id, receivers = listeners.len(), "propagating model deletion");
        }
        for listener in listeners {
            listener.model_deleted(context);
        }
    }

    /// Live listeners for `id` except `origin`. The registry lock is released
    /// before any listener runs.
    fn listeners_for(&self, id: &str, origin: u64) -> Vec<Arc<dyn ModelListener>> {
        let mut registry = self.registry();
        let Some(regs) = registry.get_mut(id) else {
            return Vec::new();
        };
        regs.retain(|r| r.listener.strong_count() > 0);
        regs.iter()
            .filter(|r| r.token != origin)
            .filter_map(|r| r.listener.upgrade())
            .collect()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Registration>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("delegate", &self.delegate)
            .finish_non_exhaustive()
    }
}
