//! Keyed registry of lazily created stores.
//!
//! [`Stores`] maps the hash of a key to a [`Store`]. The store for a key is built by
//! the initializer the first time the key is touched, and lives as long as the
//! registry. Lifecycle hooks registered on the registry apply to every per-key store
//! and receive the key they belong to.
//!
//! # Example
//!
//! ```
//! use syncwell::stores::Stores;
//!
//! #[derive(Clone, PartialEq, Debug)]
//! struct Draft {
//!     text: String,
//! }
//!
//! let drafts = Stores::new(|_key: &u32, _hash: &str| Draft { text: String::new() });
//!
//! drafts.set(&1, |d| d.text = "hello".to_string());
//! assert_eq!(drafts.get(&1).text, "hello");
//! assert_eq!(drafts.get(&2).text, "");
//! ```

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::key::StoreKey;
use crate::store::{ChangeFilter, Listener, Store, StoreHooks, Subscription, selector};

/// Lifecycle callback receiving the key and its current state.
pub type KeyEvent<K, T> = Arc<dyn Fn(&K, &T) + Send + Sync>;

/// Registry-level intercept: `(key, next, prev)`.
pub type KeyIntercept<K, T> = Arc<dyn Fn(&K, &mut T, &T) + Send + Sync>;

type Initializer<K, T> = Arc<dyn Fn(&K, &str) -> T + Send + Sync>;

/// Hooks and defaults shared by every store of a registry.
pub struct StoresOptions<K, T> {
    pub intercept: Option<KeyIntercept<K, T>>,
    pub on_first_subscribe: Option<KeyEvent<K, T>>,
    pub on_subscribe: Option<KeyEvent<K, T>>,
    pub on_unsubscribe: Option<KeyEvent<K, T>>,
    pub on_last_unsubscribe: Option<KeyEvent<K, T>>,
    /// Fires once, synchronously, when the store for a key is first built.
    pub on_store_initialized: Option<Arc<dyn Fn(&K, &str) + Send + Sync>>,
    /// Fires with `(next, prev)` when a binding moves to a key with another hash,
    /// before the next key's state is read.
    pub on_before_change_key: Option<Arc<dyn Fn(&K, &K) + Send + Sync>>,
    /// Change filter used by bindings that do not bring their own.
    pub default_deps: Option<ChangeFilter<T>>,
}

impl<K, T> Default for StoresOptions<K, T> {
    fn default() -> Self {
        Self {
            intercept: None,
            on_first_subscribe: None,
            on_subscribe: None,
            on_unsubscribe: None,
            on_last_unsubscribe: None,
            on_store_initialized: None,
            on_before_change_key: None,
            default_deps: None,
        }
    }
}

struct Slot<K, T> {
    key: K,
    store: Store<T>,
}

struct StoresInner<K, T> {
    stores: DashMap<String, Slot<K, T>>,
    initializer: Initializer<K, T>,
    options: StoresOptions<K, T>,
}

/// A map from key hash to a lazily created [`Store`].
///
/// At most one store exists per distinct key hash for the lifetime of the registry.
pub struct Stores<K, T> {
    inner: Arc<StoresInner<K, T>>,
}

impl<K, T> Clone for Stores<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, T> Stores<K, T>
where
    K: StoreKey,
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a registry whose stores start from `initializer(key, key_hash)`.
    pub fn new(initializer: impl Fn(&K, &str) -> T + Send + Sync + 'static) -> Self {
        Self::with_options(initializer, StoresOptions::default())
    }

    /// Creates a registry with hooks.
    pub fn with_options(
        initializer: impl Fn(&K, &str) -> T + Send + Sync + 'static,
        options: StoresOptions<K, T>,
    ) -> Self {
        Self {
            inner: Arc::new(StoresInner {
                stores: DashMap::new(),
                initializer: Arc::new(initializer),
                options,
            }),
        }
    }

    /// Returns the store for `key`, building it on first access.
    pub fn store(&self, key: &K) -> Store<T> {
        let hash = key.key_hash();
        if let Some(slot) = self.inner.stores.get(&hash) {
            return slot.store.clone();
        }

        // Built outside the map so the initializer may touch the registry.
        let initial = (self.inner.initializer)(key, &hash);
        let candidate = Store::with_hooks(initial, self.hooks_for(key));

        let store = match self.inner.stores.entry(hash.clone()) {
            Entry::Occupied(slot) => return slot.get().store.clone(),
            Entry::Vacant(slot) => {
                slot.insert(Slot {
                    key: key.clone(),
                    store: candidate.clone(),
                });
                candidate
            }
        };

        tracing::debug!(key = %hash, "store initialized");
        if let Some(hook) = &self.inner.options.on_store_initialized {
            hook(key, &hash);
        }
        store
    }

    /// Current state for `key`.
    pub fn get(&self, key: &K) -> T {
        self.store(key).get()
    }

    /// Updates the state for `key` and notifies its listeners.
    pub fn set(&self, key: &K, update: impl FnOnce(&mut T)) {
        self.store(key).set(update);
    }

    /// Updates the state for `key` without notifying.
    pub fn set_silent(&self, key: &K, update: impl FnOnce(&mut T)) {
        self.store(key).set_silent(update);
    }

    /// Subscribes to every change of `key`'s state.
    pub fn subscribe(
        &self,
        key: &K,
        listener: impl Fn(&T) + Send + Sync + 'static,
    ) -> Subscription {
        self.store(key).subscribe(listener)
    }

    /// Subscribes to changes of the value projected by `select`.
    pub fn subscribe_with<D, S>(
        &self,
        key: &K,
        listener: impl Fn(&T) + Send + Sync + 'static,
        select: S,
    ) -> Subscription
    where
        S: Fn(&T) -> D + Send + Sync + 'static,
        D: PartialEq,
    {
        self.store(key).subscribe_with(listener, select)
    }

    /// Number of listeners on `key`. Does not build a store.
    pub fn subscriber_count(&self, key: &K) -> usize {
        self.inner
            .stores
            .get(&key.key_hash())
            .map_or(0, |slot| slot.store.subscriber_count())
    }

    /// States of every key touched so far.
    pub fn get_all(&self) -> Vec<T> {
        self.slots().into_iter().map(|(_, store)| store.get()).collect()
    }

    /// States of the keys that currently have at least one listener.
    pub fn get_all_with_subscriber(&self) -> Vec<T> {
        self.slots()
            .into_iter()
            .filter(|(_, store)| store.subscriber_count() > 0)
            .map(|(_, store)| store.get())
            .collect()
    }

    /// Keys that currently have at least one listener.
    pub fn keys_with_subscriber(&self) -> Vec<K> {
        self.slots()
            .into_iter()
            .filter(|(_, store)| store.subscriber_count() > 0)
            .map(|(key, _)| key)
            .collect()
    }

    /// Every key touched so far.
    pub fn keys(&self) -> Vec<K> {
        self.slots().into_iter().map(|(key, _)| key).collect()
    }

    /// Applies the same update to every existing store.
    pub fn set_all(&self, update: impl Fn(&mut T)) {
        for (_, store) in self.slots() {
            store.set(&update);
        }
    }

    /// Applies the same update to every existing store, silently.
    pub fn set_all_silent(&self, update: impl Fn(&mut T)) {
        for (_, store) in self.slots() {
            store.set_silent(&update);
        }
    }

    /// Number of stores built so far.
    pub fn len(&self) -> usize {
        self.inner.stores.len()
    }

    /// Returns `true` if no key has been touched yet.
    pub fn is_empty(&self) -> bool {
        self.inner.stores.is_empty()
    }

    /// Creates a binding site that follows one key at a time.
    ///
    /// The binding uses the registry's `default_deps` filter, if any.
    pub fn bind(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> StoreBinding<K, T> {
        StoreBinding {
            stores: self.clone(),
            listener: Arc::new(listener),
            filter: self.inner.options.default_deps.clone(),
            current: None,
        }
    }

    /// Creates a binding site with its own dependency selector.
    pub fn bind_with<D, S>(
        &self,
        listener: impl Fn(&T) + Send + Sync + 'static,
        select: S,
    ) -> StoreBinding<K, T>
    where
        S: Fn(&T) -> D + Send + Sync + 'static,
        D: PartialEq,
    {
        StoreBinding {
            stores: self.clone(),
            listener: Arc::new(listener),
            filter: Some(selector(select)),
            current: None,
        }
    }

    // Snapshot so no shard lock is held while stores run hooks or listeners.
    fn slots(&self) -> Vec<(K, Store<T>)> {
        self.inner
            .stores
            .iter()
            .map(|slot| (slot.key.clone(), slot.store.clone()))
            .collect()
    }

    fn before_change_key(&self, next: &K, prev: &K) {
        if let Some(hook) = &self.inner.options.on_before_change_key {
            hook(next, prev);
        }
    }

    fn hooks_for(&self, key: &K) -> StoreHooks<T> {
        let options = &self.inner.options;
        let event = |hook: &Option<KeyEvent<K, T>>| {
            hook.clone().map(|hook| {
                let key = key.clone();
                Arc::new(move |state: &T| hook(&key, state)) as Arc<dyn Fn(&T) + Send + Sync>
            })
        };

        StoreHooks {
            intercept: options.intercept.clone().map(|intercept| {
                let key = key.clone();
                Arc::new(move |next: &mut T, prev: &T| intercept(&key, next, prev))
                    as Arc<dyn Fn(&mut T, &T) + Send + Sync>
            }),
            on_first_subscribe: event(&options.on_first_subscribe),
            on_subscribe: event(&options.on_subscribe),
            on_unsubscribe: event(&options.on_unsubscribe),
            on_last_unsubscribe: event(&options.on_last_unsubscribe),
        }
    }
}

impl<K, T> fmt::Debug for Stores<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stores")
            .field("len", &self.inner.stores.len())
            .finish()
    }
}

struct Bound<K> {
    key: K,
    hash: String,
    _subscription: Subscription,
}

/// A binding site: one consumer that reads and follows a possibly changing key.
///
/// Each call to [`StoreBinding::use_key`] with a key of a different hash fires the
/// registry's `on_before_change_key` hook once, reads the new key's state, and moves
/// the listener from the old key's store to the new one.
pub struct StoreBinding<K, T> {
    stores: Stores<K, T>,
    listener: Listener<T>,
    filter: Option<ChangeFilter<T>>,
    current: Option<Bound<K>>,
}

impl<K, T> StoreBinding<K, T>
where
    K: StoreKey,
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Reads the state for `key`, switching the subscription if the key changed.
    pub fn use_key(&mut self, key: K) -> T {
        let hash = key.key_hash();
        if let Some(bound) = &self.current {
            if bound.hash == hash {
                return self.stores.get(&key);
            }
            self.stores.before_change_key(&key, &bound.key);
        }

        let store = self.stores.store(&key);
        let state = store.get();

        self.current = None;
        let subscription = store.subscribe_filtered(Arc::clone(&self.listener), self.filter.clone());
        self.current = Some(Bound {
            key,
            hash,
            _subscription: subscription,
        });
        state
    }

    /// The key currently followed, if any.
    pub fn key(&self) -> Option<&K> {
        self.current.as_ref().map(|bound| &bound.key)
    }

    /// Stops following the current key.
    pub fn release(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde::Serialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Serialize, Clone, Debug, PartialEq)]
    struct Key {
        id: u32,
    }

    #[derive(Clone, Debug, PartialEq, Default)]
    struct Counter {
        count: u32,
        touched: bool,
    }

    fn registry() -> Stores<Key, Counter> {
        Stores::new(|_: &Key, _: &str| Counter::default())
    }

    #[test]
    fn test_stores_are_isolated_per_key() {
        let stores = registry();
        stores.set(&Key { id: 1 }, |c| c.count = 5);

        assert_eq!(stores.get(&Key { id: 1 }).count, 5);
        assert_eq!(stores.get(&Key { id: 2 }).count, 0);
        assert_eq!(stores.len(), 2);
    }

    #[test]
    fn test_initializer_runs_once_per_hash() {
        let inits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&inits);
        let initialized = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&initialized);

        let stores = Stores::with_options(
            move |key: &serde_json::Value, _: &str| {
                seen.fetch_add(1, Ordering::SeqCst);
                key.clone()
            },
            StoresOptions {
                on_store_initialized: Some(Arc::new(move |_: &serde_json::Value, hash: &str| {
                    log.lock().push(hash.to_string());
                })),
                ..StoresOptions::default()
            },
        );

        let a = serde_json::json!({ "page": 1, "sort": "asc" });
        let b = serde_json::json!({ "sort": "asc", "page": 1 });
        stores.get(&a);
        stores.get(&b);
        stores.set(&a, |_| {});

        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(*initialized.lock(), vec![r#"{"page":1,"sort":"asc"}"#]);
    }

    #[test]
    fn test_get_all_with_subscriber() {
        let stores = registry();
        stores.set(&Key { id: 1 }, |c| c.count = 1);
        stores.set(&Key { id: 2 }, |c| c.count = 2);

        let _sub = stores.subscribe(&Key { id: 2 }, |_| {});

        assert_eq!(stores.get_all().len(), 2);
        let active = stores.get_all_with_subscriber();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].count, 2);
        assert_eq!(stores.keys_with_subscriber(), vec![Key { id: 2 }]);
        assert_eq!(stores.subscriber_count(&Key { id: 2 }), 1);
        assert_eq!(stores.subscriber_count(&Key { id: 3 }), 0);
        assert_eq!(stores.len(), 2);
    }

    #[test]
    fn test_set_all() {
        let stores = registry();
        stores.get(&Key { id: 1 });
        stores.get(&Key { id: 2 });

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let _sub = stores.subscribe(&Key { id: 1 }, move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        stores.set_all(|c| c.touched = true);
        assert!(stores.get_all().iter().all(|c| c.touched));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        stores.set_all_silent(|c| c.count = 9);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_key_hooks_receive_key() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let stores = Stores::with_options(
            |_: &Key, _: &str| Counter::default(),
            StoresOptions {
                on_last_unsubscribe: Some(Arc::new(move |key: &Key, _: &Counter| {
                    log.lock().push(key.id);
                })),
                ..StoresOptions::default()
            },
        );

        let sub = stores.subscribe(&Key { id: 4 }, |_| {});
        drop(sub);
        assert_eq!(*seen.lock(), vec![4]);
    }

    #[test]
    fn test_binding_fires_change_key_once_per_transition() {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&changes);
        let stores = Stores::with_options(
            |_: &Key, _: &str| Counter::default(),
            StoresOptions {
                on_before_change_key: Some(Arc::new(move |next: &Key, prev: &Key| {
                    log.lock().push((prev.id, next.id));
                })),
                ..StoresOptions::default()
            },
        );

        let mut binding = stores.bind(|_| {});
        binding.use_key(Key { id: 1 });
        binding.use_key(Key { id: 1 });
        assert!(changes.lock().is_empty());
        assert_eq!(stores.subscriber_count(&Key { id: 1 }), 1);

        binding.use_key(Key { id: 2 });
        binding.use_key(Key { id: 2 });
        assert_eq!(*changes.lock(), vec![(1, 2)]);
        assert_eq!(stores.subscriber_count(&Key { id: 1 }), 0);
        assert_eq!(stores.subscriber_count(&Key { id: 2 }), 1);
        assert_eq!(binding.key(), Some(&Key { id: 2 }));

        binding.release();
        assert_eq!(stores.subscriber_count(&Key { id: 2 }), 0);
    }

    #[test]
    fn test_binding_with_selector() {
        let stores = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let mut binding = stores.bind_with(
            move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
            },
            |c: &Counter| c.count,
        );

        binding.use_key(Key { id: 1 });
        stores.set(&Key { id: 1 }, |c| c.touched = true);
        stores.set(&Key { id: 1 }, |c| c.count = 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
