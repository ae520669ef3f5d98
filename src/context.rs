//! Cache Context
//!
//! Typed access point for one in-memory model. A context holds the current
//! value, writes it through the shared delegate in the background, and
//! follows changes other contexts make to the model with the same
//! identifier.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::codec::Cacheable;
use crate::error::{CacheError, Result};
use crate::manager::{CacheManager, ModelListener, UpdateContext};

// == Context Observer ==
/// Notified when another context changes the model this context holds.
///
/// `data` is `None` when the model was removed.
pub trait ContextObserver<T>: Send + Sync {
    fn updated_data(&self, data: Option<&T>, context: Option<&UpdateContext>);
}

impl<T, F> ContextObserver<T> for F
where
    F: Fn(Option<&T>, Option<&UpdateContext>) + Send + Sync,
{
    fn updated_data(&self, data: Option<&T>, context: Option<&UpdateContext>) {
        self(data, context)
    }
}

enum Pending<T> {
    Updated(T, Option<UpdateContext>),
    Deleted(Option<UpdateContext>),
}

struct ContextState<T> {
    data: Option<T>,
    cache_key: Option<String>,
    /// Identifier this context is registered under with the manager
    listening: Option<String>,
    paused: bool,
    pending: Option<Pending<T>>,
}

struct ContextInner<T: Cacheable> {
    token: u64,
    manager: Arc<CacheManager>,
    this: Weak<ContextInner<T>>,
    state: Mutex<ContextState<T>>,
    observer: Mutex<Option<Arc<dyn ContextObserver<T>>>>,
}

// == Cache Context ==
/// Per-type facade over the shared cache.
pub struct CacheContext<T: Cacheable> {
    inner: Arc<ContextInner<T>>,
}

impl<T: Cacheable> CacheContext<T> {
    pub fn new(manager: &Arc<CacheManager>) -> Self {
        let token = manager.next_token();
        let inner = Arc::new_cyclic(|this| ContextInner {
            token,
            manager: manager.clone(),
            this: this.clone(),
            state: Mutex::new(ContextState {
                data: None,
                cache_key: None,
                listening: None,
                paused: false,
                pending: None,
            }),
            observer: Mutex::new(None),
        });
        Self { inner }
    }

    /// Context bound to the process-wide manager.
    ///
    /// # Panics
    /// If the shared manager has not been initialised.
    pub fn from_shared() -> Self {
        Self::new(&CacheManager::shared())
    }

    /// Installs the observer told about changes coming from other contexts.
    pub fn set_observer(&self, observer: Arc<dyn ContextObserver<T>>) {
        *lock(&self.inner.observer) = Some(observer);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state().paused
    }

    /// Pauses or resumes delivery of changes from other contexts.
    ///
    /// While paused, incoming changes are held back (the latest one wins)
    /// and applied when the context is resumed, unless a direct `set`,
    /// `fetch` or `remove` replaced the value in the meantime. Those direct
    /// calls are never held back.
    pub fn set_paused(&self, paused: bool) {
        let pending = {
            let mut state = self.inner.state();
            state.paused = paused;
            if paused {
                None
            } else {
                state.pending.take()
            }
        };

        match pending {
            Some(Pending::Updated(value, context)) => self.inner.apply_update(value, context),
            Some(Pending::Deleted(context)) => self.inner.apply_delete(context),
            None => {}
        }
    }

    /// Current in-memory value.
    pub fn data(&self) -> Option<T> {
        self.inner.state().data.clone()
    }

    /// Key this context reads from and writes to, once known.
    pub fn cache_key(&self) -> Option<String> {
        self.inner.state().cache_key.clone()
    }

    // == Set ==
    /// Replaces the in-memory value and shares it with other contexts
    /// holding the same identifier.
    ///
    /// With `update_cache`, the value is written under the context's cache
    /// key (or its identifier) in the background; the returned handle can be
    /// awaited but dropping it does not cancel the write. Write failures
    /// never reach the caller.
    pub fn set(
        &self,
        value: T,
        update_cache: bool,
        context: Option<UpdateContext>,
    ) -> Option<JoinHandle<()>> {
        let id = value.identifier().filter(|id| !id.is_empty()).map(str::to_owned);

        let key = {
            let mut state = self.inner.state();
            state.data = Some(value.clone());
            // A direct write supersedes any change parked while paused
            state.pending = None;
            match &id {
                Some(id) => self.inner.listen_to(&mut state, id),
                None => self.inner.stop_listening(&mut state),
            }
            state.cache_key.clone().or_else(|| id.clone())
        };

        if let Some(id) = &id {
            self.inner
                .manager
                .publish_update(id, &value, self.inner.token, context.as_ref());
        }

        if !update_cache {
            return None;
        }
        let Some(key) = key else {
            debug!("value has no identifier and no cache key, not caching");
            return None;
        };

        let delegate = self.inner.manager.delegate().clone();
        Some(self.inner.manager.spawn(async move {
            delegate.store_single(&value, &key).await;
        }))
    }

    // == Fetch ==
    /// Loads the value stored under `key` in the background.
    ///
    /// On success the value becomes this context's current value and the
    /// context starts following its identifier. The result is delivered
    /// exactly once; dropping the handle does not stop the load.
    pub fn fetch(&self, key: impl Into<String>) -> PendingFetch<T> {
        let key = key.into();
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();

        self.inner.manager.spawn(async move {
            let result = inner.manager.delegate().load_single::<T>(&key).await;
            match &result {
                Ok(value) => inner.install(value.clone(), key),
                Err(e) => debug!(key = %key, error = %e, "cache fetch failed"),
            }
            // Receiver may be gone; the result is simply dropped then
            let _ = tx.send(result);
        });

        PendingFetch { rx }
    }

    // == Remove ==
    /// Removes `value` from memory here and in every context holding the same
    /// identifier, and with `update_cache` deletes its cache entry.
    pub fn remove(
        &self,
        value: &T,
        update_cache: bool,
        context: Option<UpdateContext>,
    ) -> Option<JoinHandle<()>> {
        let id = value.identifier().filter(|id| !id.is_empty()).map(str::to_owned);

        let key = {
            let mut state = self.inner.state();
            let holds_value = match (&id, &state.data) {
                (Some(id), Some(current)) => current.identifier() == Some(id.as_str()),
                (None, Some(current)) => current.is_equal(value),
                (_, None) => false,
            };
            if holds_value {
                state.data = None;
                state.pending = None;
                self.inner.stop_listening(&mut state);
            }
            id.clone().or_else(|| state.cache_key.clone())
        };

        if let Some(id) = &id {
            self.inner
                .manager
                .publish_delete(id, self.inner.token, context.as_ref());
        }

        if !update_cache {
            return None;
        }
        let key = key?;
        let delegate = self.inner.manager.delegate().clone();
        Some(self.inner.manager.spawn(async move {
            delegate.delete(&key).await;
        }))
    }
}

impl<T: Cacheable> ContextInner<T> {
    fn state(&self) -> MutexGuard<'_, ContextState<T>> {
        lock(&self.state)
    }

    fn install(&self, value: T, key: String) {
        let mut state = self.state();
        match value.identifier().filter(|id| !id.is_empty()) {
            Some(id) => self.listen_to(&mut state, id),
            None => self.stop_listening(&mut state),
        }
        state.data = Some(value);
        state.cache_key = Some(key);
        state.pending = None;
    }

    fn listen_to(&self, state: &mut ContextState<T>, id: &str) {
        if state.listening.as_deref() == Some(id) {
            return;
        }
        self.stop_listening(state);
        let this = self.this.clone();
        self.manager.register(id, self.token, this);
        state.listening = Some(id.to_string());
    }

    fn stop_listening(&self, state: &mut ContextState<T>) {
        if let Some(previous) = state.listening.take() {
            self.manager.unregister(&previous, self.token);
        }
    }

    fn apply_update(&self, value: T, context: Option<UpdateContext>) {
        self.state().data = Some(value.clone());
        self.notify(Some(&value), context.as_ref());
    }

    fn apply_delete(&self, context: Option<UpdateContext>) {
        {
            let mut state = self.state();
            state.data = None;
            self.stop_listening(&mut state);
        }
        self.notify(None, context.as_ref());
    }

    fn notify(&self, data: Option<&T>, context: Option<&UpdateContext>) {
        let observer = lock(&self.observer).clone();
        if let Some(observer) = observer {
            observer.updated_data(data, context);
        }
    }
}

impl<T: Cacheable> ModelListener for ContextInner<T> {
    fn model_updated(&self, model: &(dyn Any + Send + Sync), context: Option<&UpdateContext>) {
        let Some(value) = model.downcast_ref::<T>() else {
            debug!("ignoring update for a model of another type");
            return;
        };

        {
            let mut state = self.state();
            if state.paused {
                state.pending = Some(Pending::Updated(value.clone(), context.cloned()));
                return;
            }
        }
        self.apply_update(value.clone(), context.cloned());
    }

    fn model_deleted(&self, context: Option<&UpdateContext>) {
        {
            let mut state = self.state();
            if state.paused {
                state.pending = Some(Pending::Deleted(context.cloned()));
                return;
            }
        }
        self.apply_delete(context.cloned());
    }
}

impl<T: Cacheable> Drop for ContextInner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = state.listening.take() {
            self.manager.unregister(&id, self.token);
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// == Pending Fetch ==
/// Result of [`CacheContext::fetch`], resolved once the load completes.
#[must_use = "the fetch runs regardless, but its result is lost if this is dropped"]
pub struct PendingFetch<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for PendingFetch<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CacheError::StoreUnavailable(
                "fetch task ended without a result".to_string(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_json, encode_json};
    use crate::config::CacheConfig;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: String,
        value: i64,
    }

    impl Item {
        fn new(id: &str, value: i64) -> Self {
            Self {
                id: id.to_string(),
                value,
            }
        }
    }

    impl Cacheable for Item {
        fn decode(encoded: &str) -> Option<Self> {
            decode_json(encoded)
        }

        fn encode(&self) -> Option<String> {
            encode_json(self)
        }

        fn identifier(&self) -> Option<&str> {
            Some(&self.id)
        }

        fn is_equal(&self, other: &Self) -> bool {
            self == other
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: StdMutex<Vec<(Option<i64>, Option<String>)>>,
    }

    impl ContextObserver<Item> for Recorder {
        fn updated_data(&self, data: Option<&Item>, context: Option<&UpdateContext>) {
            let tag = context.and_then(|c| c.downcast_ref::<String>()).cloned();
            self.seen.lock().unwrap().push((data.map(|i| i.value), tag));
        }
    }

    async fn manager(dir: &TempDir) -> Arc<CacheManager> {
        CacheManager::initialise(CacheConfig::new("T").with_directory(dir.path()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_context_is_empty() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let context: CacheContext<Item> = CacheContext::new(&manager);

        assert!(context.data().is_none());
        assert!(context.cache_key().is_none());
        assert!(!context.is_paused());
    }

    #[tokio::test]
    async fn test_set_updates_memory_and_cache() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let context = CacheContext::new(&manager);

        let handle = context.set(Item::new("a", 1), true, None).unwrap();
        assert_eq!(context.data(), Some(Item::new("a", 1)));

        handle.await.unwrap();
        let stored: Item = manager.delegate().load_single("a").await.unwrap();
        assert_eq!(stored, Item::new("a", 1));
    }

    #[tokio::test]
    async fn test_set_without_cache_update_skips_disk() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let context = CacheContext::new(&manager);

        assert!(context.set(Item::new("a", 1), false, None).is_none());
        assert_eq!(context.data(), Some(Item::new("a", 1)));
        assert!(manager.delegate().store().is_empty().await);
    }

    #[tokio::test]
    async fn test_set_primitive_without_key_is_memory_only() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let context: CacheContext<i64> = CacheContext::new(&manager);

        assert!(context.set(5, true, None).is_none());
        assert_eq!(context.data(), Some(5));
    }

    #[tokio::test]
    async fn test_fetch_installs_value_and_key() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        manager.delegate().store_single(&42i64, "answer").await;

        let context: CacheContext<i64> = CacheContext::new(&manager);
        let value = context.fetch("answer").await.unwrap();

        assert_eq!(value, 42);
        assert_eq!(context.data(), Some(42));
        assert_eq!(context.cache_key().as_deref(), Some("answer"));

        // Later writes go to the fetched key
        context.set(43, true, None).unwrap().await.unwrap();
        let stored: i64 = manager.delegate().load_single("answer").await.unwrap();
        assert_eq!(stored, 43);
    }

    #[tokio::test]
    async fn test_fetch_missing_key_rejects() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let context: CacheContext<i64> = CacheContext::new(&manager);

        let result = context.fetch("missing").await;

        assert!(matches!(result, Err(CacheError::NotFound(_))));
        assert!(context.data().is_none());
    }

    #[tokio::test]
    async fn test_dropped_fetch_still_completes() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        manager.delegate().store_single(&7i64, "seven").await;

        let context: CacheContext<i64> = CacheContext::new(&manager);
        drop(context.fetch("seven"));

        for _ in 0..100 {
            if context.data().is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(context.data(), Some(7));
    }

    #[tokio::test]
    async fn test_update_propagates_to_other_context() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let first = CacheContext::new(&manager);
        let second = CacheContext::new(&manager);
        let recorder = Arc::new(Recorder::default());
        second.set_observer(recorder.clone());

        first.set(Item::new("a", 1), false, None);
        second.set(Item::new("a", 1), false, None);

        let tag: UpdateContext = Arc::new("from-first".to_string());
        first.set(Item::new("a", 2), false, Some(tag));

        assert_eq!(second.data(), Some(Item::new("a", 2)));
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![(Some(2), Some("from-first".to_string()))]);
    }

    #[tokio::test]
    async fn test_originating_context_is_not_notified() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let context = CacheContext::new(&manager);
        let recorder = Arc::new(Recorder::default());
        context.set_observer(recorder.clone());

        context.set(Item::new("a", 1), false, None);
        context.set(Item::new("a", 2), false, None);

        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_identifiers_are_not_touched() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let first = CacheContext::new(&manager);
        let second = CacheContext::new(&manager);

        first.set(Item::new("a", 1), false, None);
        second.set(Item::new("b", 1), false, None);
        first.set(Item::new("a", 5), false, None);

        assert_eq!(second.data(), Some(Item::new("b", 1)));
    }

    #[tokio::test]
    async fn test_paused_context_defers_updates() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let first = CacheContext::new(&manager);
        let second = CacheContext::new(&manager);
        let recorder = Arc::new(Recorder::default());
        second.set_observer(recorder.clone());

        first.set(Item::new("a", 1), false, None);
        second.set(Item::new("a", 1), false, None);

        second.set_paused(true);
        first.set(Item::new("a", 2), false, None);
        first.set(Item::new("a", 3), false, None);

        assert_eq!(second.data(), Some(Item::new("a", 1)));
        assert!(recorder.seen.lock().unwrap().is_empty());

        second.set_paused(false);
        assert_eq!(second.data(), Some(Item::new("a", 3)));
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_own_write_while_paused_discards_parked_update() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let first = CacheContext::new(&manager);
        let second = CacheContext::new(&manager);

        first.set(Item::new("a", 1), false, None);
        second.set(Item::new("a", 1), false, None);

        second.set_paused(true);
        first.set(Item::new("a", 2), false, None);
        second.set(Item::new("a", 3), false, None);
        second.set_paused(false);

        assert_eq!(first.data(), Some(Item::new("a", 3)));
        assert_eq!(second.data(), Some(Item::new("a", 3)));
    }

    #[tokio::test]
    async fn test_paused_context_defers_delete() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let first = CacheContext::new(&manager);
        let second = CacheContext::new(&manager);
        let recorder = Arc::new(Recorder::default());
        second.set_observer(recorder.clone());

        first.set(Item::new("a", 1), false, None);
        second.set(Item::new("a", 1), false, None);

        second.set_paused(true);
        first.remove(&Item::new("a", 1), false, None);

        assert_eq!(second.data(), Some(Item::new("a", 1)));
        assert_eq!(manager.listener_count("a"), 1);

        second.set_paused(false);
        assert!(second.data().is_none());
        assert_eq!(recorder.seen.lock().unwrap().clone(), vec![(None, None)]);
        assert_eq!(manager.listener_count("a"), 0);
    }

    #[tokio::test]
    async fn test_pause_does_not_block_direct_calls() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        manager.delegate().store_single(&Item::new("a", 9), "a").await;
        let context: CacheContext<Item> = CacheContext::new(&manager);

        context.set_paused(true);
        context.set(Item::new("b", 1), false, None);
        assert_eq!(context.data(), Some(Item::new("b", 1)));

        let fetched = context.fetch("a").await.unwrap();
        assert_eq!(fetched, Item::new("a", 9));
        assert_eq!(context.data(), Some(Item::new("a", 9)));
    }

    #[tokio::test]
    async fn test_fetched_model_follows_updates() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        manager.delegate().store_single(&Item::new("a", 1), "a").await;

        let reader: CacheContext<Item> = CacheContext::new(&manager);
        reader.fetch("a").await.unwrap();

        let writer = CacheContext::new(&manager);
        writer.set(Item::new("a", 50), false, None);

        assert_eq!(reader.data(), Some(Item::new("a", 50)));
    }

    #[tokio::test]
    async fn test_remove_clears_everywhere_and_deletes_entry() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let first = CacheContext::new(&manager);
        let second = CacheContext::new(&manager);
        let recorder = Arc::new(Recorder::default());
        second.set_observer(recorder.clone());

        first.set(Item::new("a", 1), true, None).unwrap().await.unwrap();
        second.set(Item::new("a", 1), false, None);

        first
            .remove(&Item::new("a", 1), true, None)
            .unwrap()
            .await
            .unwrap();

        assert!(first.data().is_none());
        assert!(second.data().is_none());
        assert_eq!(recorder.seen.lock().unwrap().clone(), vec![(None, None)]);
        assert!(!manager.delegate().store().contains("a").await);
        assert_eq!(manager.listener_count("a"), 0);
    }

    #[tokio::test]
    async fn test_remove_without_cache_update_keeps_entry() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let context = CacheContext::new(&manager);

        context.set(Item::new("a", 1), true, None).unwrap().await.unwrap();
        assert!(context.remove(&Item::new("a", 1), false, None).is_none());

        assert!(context.data().is_none());
        assert!(manager.delegate().store().contains("a").await);
    }

    #[tokio::test]
    async fn test_dropping_context_unregisters() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let context = CacheContext::new(&manager);

        context.set(Item::new("a", 1), false, None);
        assert_eq!(manager.listener_count("a"), 1);

        drop(context);
        assert_eq!(manager.listener_count("a"), 0);
    }

    #[tokio::test]
    async fn test_closure_observer() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let first = CacheContext::new(&manager);
        let second: CacheContext<Item> = CacheContext::new(&manager);
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let counter = hits.clone();
        second.set_observer(Arc::new(
            move |_data: Option<&Item>, _context: Option<&UpdateContext>| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            },
        ));

        second.set(Item::new("a", 1), false, None);
        first.set(Item::new("a", 2), false, None);

        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
