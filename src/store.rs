//! A single reactive state cell.
//!
//! A [`Store`] holds one value, a list of listeners and a set of lifecycle hooks.
//! Every write builds the next value from a copy of the current one and commits it
//! before any listener runs, so a listener that writes to the store starts a new,
//! separate write.
//!
//! # Example
//!
//! ```
//! use syncwell::store::Store;
//!
//! #[derive(Clone, PartialEq, Default)]
//! struct Counter {
//!     count: u32,
//!     label: String,
//! }
//!
//! let store = Store::new(Counter::default());
//! let sub = store.subscribe_with(|state: &Counter| println!("{}", state.count), |s| s.count);
//!
//! store.set(|s| s.count += 1);
//! store.set(|s| s.label = "clicks".to_string()); // not a `count` change, no call
//!
//! assert_eq!(store.get().count, 1);
//! sub.unsubscribe();
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

/// Callback invoked with the new state after a change.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Decides whether a listener cares about the transition `prev -> next`.
pub type ChangeFilter<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Lifecycle callback receiving the current state.
pub type StoreEvent<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Adjusts the next state given the previous one, after every write.
pub type Intercept<T> = Arc<dyn Fn(&mut T, &T) + Send + Sync>;

/// Builds a [`ChangeFilter`] from a dependency selector.
///
/// The listener is notified only when the projected value differs between the
/// previous and next state. Project an `Arc` through [`Arc::as_ptr`] to compare by
/// identity instead of by value.
pub fn selector<T, D, S>(select: S) -> ChangeFilter<T>
where
    S: Fn(&T) -> D + Send + Sync + 'static,
    D: PartialEq,
{
    Arc::new(move |prev, next| select(prev) != select(next))
}

/// Optional hooks attached to a store.
pub struct StoreHooks<T> {
    /// Runs after every write with `(next, prev)` and may adjust `next`.
    pub intercept: Option<Intercept<T>>,
    /// Fires when the subscriber count goes from zero to one, before `on_subscribe`.
    pub on_first_subscribe: Option<StoreEvent<T>>,
    /// Fires on every subscription.
    pub on_subscribe: Option<StoreEvent<T>>,
    /// Fires on every unsubscription.
    pub on_unsubscribe: Option<StoreEvent<T>>,
    /// Fires when the last subscriber leaves, after `on_unsubscribe`.
    pub on_last_unsubscribe: Option<StoreEvent<T>>,
}

impl<T> Default for StoreHooks<T> {
    fn default() -> Self {
        Self {
            intercept: None,
            on_first_subscribe: None,
            on_subscribe: None,
            on_unsubscribe: None,
            on_last_unsubscribe: None,
        }
    }
}

impl<T> Clone for StoreHooks<T> {
    fn clone(&self) -> Self {
        Self {
            intercept: self.intercept.clone(),
            on_first_subscribe: self.on_first_subscribe.clone(),
            on_subscribe: self.on_subscribe.clone(),
            on_unsubscribe: self.on_unsubscribe.clone(),
            on_last_unsubscribe: self.on_last_unsubscribe.clone(),
        }
    }
}

/// Handle returned by `subscribe`. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a subscription that runs `cancel` exactly once when released.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Removes the listener now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Combines two subscriptions into one that releases both.
    pub fn join(self, other: Subscription) -> Subscription {
        Subscription::new(move || {
            self.unsubscribe();
            other.unsubscribe();
        })
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct Entry<T> {
    listener: Listener<T>,
    filter: Option<ChangeFilter<T>>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            listener: Arc::clone(&self.listener),
            filter: self.filter.clone(),
        }
    }
}

struct StoreInner<T> {
    state: RwLock<T>,
    // Ids grow monotonically, so map order is registration order.
    subscribers: Mutex<BTreeMap<u64, Entry<T>>>,
    next_id: AtomicU64,
    hooks: StoreHooks<T>,
}

/// A shared, cloneable state cell with change notification.
///
/// Clones share the same state. Updaters and the intercept hook run while the
/// store is locked and must not access the same store.
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Store<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a store without hooks.
    pub fn new(initial: T) -> Self {
        Self::with_hooks(initial, StoreHooks::default())
    }

    /// Creates a store with lifecycle hooks.
    pub fn with_hooks(initial: T, hooks: StoreHooks<T>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(initial),
                subscribers: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
                hooks,
            }),
        }
    }

    /// Returns a copy of the current state.
    pub fn get(&self) -> T {
        self.inner.state.read().clone()
    }

    /// Reads the current state without copying it.
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        f(&self.inner.state.read())
    }

    /// Applies `update` to a copy of the state, commits it and notifies listeners.
    pub fn set(&self, update: impl FnOnce(&mut T)) {
        self.commit(update, false);
    }

    /// Like [`Store::set`] but without notifying listeners.
    pub fn set_silent(&self, update: impl FnOnce(&mut T)) {
        self.commit(update, true);
    }

    /// Applies `update` only if `condition` holds for the current state.
    ///
    /// The check and the write happen under the same lock.
    pub(crate) fn set_if(
        &self,
        condition: impl FnOnce(&T) -> bool,
        update: impl FnOnce(&mut T),
    ) -> bool {
        let transition = {
            let mut state = self.inner.state.write();
            if !condition(&state) {
                return false;
            }
            self.apply(&mut state, update)
        };
        self.notify(&transition.0, &transition.1);
        true
    }

    /// Registers a listener notified whenever the state changes.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.subscribe_filtered(Arc::new(listener), None)
    }

    /// Registers a listener notified only when `select` projects a different value.
    pub fn subscribe_with<D, S>(
        &self,
        listener: impl Fn(&T) + Send + Sync + 'static,
        select: S,
    ) -> Subscription
    where
        S: Fn(&T) -> D + Send + Sync + 'static,
        D: PartialEq,
    {
        self.subscribe_filtered(Arc::new(listener), Some(selector(select)))
    }

    /// Registers a listener with an optional prebuilt change filter.
    pub fn subscribe_filtered(
        &self,
        listener: Listener<T>,
        filter: Option<ChangeFilter<T>>,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.insert(id, Entry { listener, filter });
            subscribers.len()
        };

        let state = self.get();
        if count == 1 {
            if let Some(hook) = &self.inner.hooks.on_first_subscribe {
                hook(&state);
            }
        }
        if let Some(hook) = &self.inner.hooks.on_subscribe {
            hook(&state);
        }

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                Store { inner }.detach(id);
            }
        })
    }

    /// Number of active listeners.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    fn detach(&self, id: u64) {
        let remaining = {
            let mut subscribers = self.inner.subscribers.lock();
            if subscribers.remove(&id).is_none() {
                return;
            }
            subscribers.len()
        };

        let state = self.get();
        if let Some(hook) = &self.inner.hooks.on_unsubscribe {
            hook(&state);
        }
        if remaining == 0 {
            if let Some(hook) = &self.inner.hooks.on_last_unsubscribe {
                hook(&state);
            }
        }
    }

    fn commit(&self, update: impl FnOnce(&mut T), silent: bool) {
        let (prev, next) = {
            let mut state = self.inner.state.write();
            self.apply(&mut state, update)
        };
        if !silent {
            self.notify(&prev, &next);
        }
    }

    fn apply(&self, state: &mut T, update: impl FnOnce(&mut T)) -> (T, T) {
        let prev = state.clone();
        let mut next = prev.clone();
        update(&mut next);
        if let Some(intercept) = &self.inner.hooks.intercept {
            intercept(&mut next, &prev);
        }
        *state = next.clone();
        (prev, next)
    }

    fn notify(&self, prev: &T, next: &T) {
        let entries: Vec<Entry<T>> = self.inner.subscribers.lock().values().cloned().collect();
        for entry in entries {
            let changed = match &entry.filter {
                Some(filter) => filter(prev, next),
                None => prev != next,
            };
            if changed {
                (entry.listener)(next);
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &*self.inner.state.read())
            .field("subscribers", &self.inner.subscribers.lock().len())
            .finish()
    }
}
