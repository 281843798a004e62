//! Keyed async queries with caching, retries and pagination.
//!
//! A [`Query`] pairs a fetcher with a [`Stores`] registry of [`QueryState`]s, one
//! per key. Subscribing to a key mounts it: depending on `fetch_on_mount` the
//! fetcher runs, and every state change is pushed to the subscriber. The query
//! never returns fetch failures to the caller; they are recorded in the state and
//! retried according to the configuration.
//!
//! # Lifecycle
//!
//! 1. The first subscriber of a key cancels its pending garbage collection and
//!    resumes polling if `refetch_interval` is set.
//! 2. Every subscriber applies the `fetch_on_mount` policy.
//! 3. When the last subscriber leaves, retries and polling stop and the key is
//!    reset after `cache_time`.
//!
//! At most one primary fetch and one next-page fetch are in flight per key.
//! Fetches start eagerly when requested; the returned futures only report the
//! outcome, so dropping them does not cancel anything.
//!
//! # Example
//!
//! ```
//! use futures::FutureExt;
//! use syncwell::QueryError;
//! use syncwell::query::{Query, QueryState};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let users = Query::new(|id: u32, _state: QueryState<u32, String>| {
//!     async move { Ok::<_, QueryError>(format!("user {id}")) }.boxed()
//! });
//!
//! let state = users.force_fetch(&7).await;
//! assert_eq!(state.data().map(String::as_str), Some("user 7"));
//! assert!(!state.is_waiting);
//! # }
//! ```

pub mod config;
pub mod events;
pub mod state;
mod timers;

pub use config::{FetchTrigger, QueryConfig};
pub use events::{QueryEvent, QueryEvents};
pub use state::{PageParam, QueryState, QueryStatus};

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::error::QueryError;
use crate::key::StoreKey;
use crate::store::{ChangeFilter, Store, Subscription, selector};
use crate::stores::{KeyEvent, StoreBinding, Stores, StoresOptions};

use events::Handle;
use timers::Timers;

/// Async data source: receives the key and the state as it was right before the
/// call, with `page_param` set to the cursor of the page being fetched.
pub type Fetcher<K, R, D, P> = Arc<
    dyn Fn(K, QueryState<K, R, D, P>) -> BoxFuture<'static, Result<R, QueryError>> + Send + Sync,
>;

/// Input of the `select` transform besides the response.
#[derive(Debug)]
pub struct SelectContext<'a, K, D> {
    pub key: &'a K,
    /// Data accumulated from the previous pages, `None` for the first page.
    pub data: Option<&'a D>,
}

type Select<K, R, D> = Arc<dyn Fn(&R, SelectContext<'_, K, D>) -> D + Send + Sync>;
type NextPageParam<K, R, D, P> =
    Arc<dyn Fn(&R, usize, &QueryState<K, R, D, P>) -> Option<P> + Send + Sync>;
type KeyFn<K, T> = Arc<dyn Fn(&K) -> T + Send + Sync>;
type StateFn<K, R, D, P, T> = Arc<dyn Fn(&QueryState<K, R, D, P>) -> T + Send + Sync>;
type ErrorFn<K, R, D, P, T> = Arc<dyn Fn(&QueryError, &QueryState<K, R, D, P>) -> T + Send + Sync>;
type SuccessFn<K, R, D, P> = Arc<dyn Fn(&R, &QueryState<K, R, D, P>) + Send + Sync>;

struct Hooks<K, R, D, P> {
    select: Select<K, R, D>,
    get_next_page_param: Option<NextPageParam<K, R, D, P>>,
    enabled: Option<KeyFn<K, bool>>,
    retry: Option<ErrorFn<K, R, D, P, u32>>,
    retry_delay: Option<ErrorFn<K, R, D, P, Duration>>,
    fetch_on_mount: Option<KeyFn<K, FetchTrigger>>,
    fetch_on_window_focus: Option<KeyFn<K, FetchTrigger>>,
    fetch_on_reconnect: Option<KeyFn<K, FetchTrigger>>,
    refetch_interval: Option<StateFn<K, R, D, P, Option<Duration>>>,
    on_before_fetch: Option<StateFn<K, R, D, P, bool>>,
    on_success: Option<SuccessFn<K, R, D, P>>,
    on_error: Option<ErrorFn<K, R, D, P, ()>>,
    on_settled: Option<StateFn<K, R, D, P, ()>>,
}

/// Builder for [`Query`].
pub struct QueryBuilder<K, R, D = R, P = ()> {
    fetcher: Fetcher<K, R, D, P>,
    config: QueryConfig,
    hooks: Hooks<K, R, D, P>,
    events: Option<QueryEvents>,
}

impl<K, R, D, P> QueryBuilder<K, R, D, P>
where
    K: StoreKey,
    R: Send + Sync + 'static,
    D: Send + Sync + 'static,
    P: PageParam,
{
    /// Starts a builder whose data is derived from the responses by `select`.
    ///
    /// For paginated queries `select` is applied once per page, receiving the
    /// data accumulated so far.
    pub fn new<F, S>(fetcher: F, select: S) -> Self
    where
        F: Fn(K, QueryState<K, R, D, P>) -> BoxFuture<'static, Result<R, QueryError>>
            + Send
            + Sync
            + 'static,
        S: Fn(&R, SelectContext<'_, K, D>) -> D + Send + Sync + 'static,
    {
        Self {
            fetcher: Arc::new(fetcher),
            config: QueryConfig::default(),
            hooks: Hooks {
                select: Arc::new(select),
                get_next_page_param: None,
                enabled: None,
                retry: None,
                retry_delay: None,
                fetch_on_mount: None,
                fetch_on_window_focus: None,
                fetch_on_reconnect: None,
                refetch_interval: None,
                on_before_fetch: None,
                on_success: None,
                on_error: None,
                on_settled: None,
            },
            events: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Makes the query paginated.
    ///
    /// Called with the latest response, the number of pages loaded including it,
    /// and the state before the fetch. `None` means there is no next page.
    #[must_use]
    pub fn get_next_page_param(
        mut self,
        f: impl Fn(&R, usize, &QueryState<K, R, D, P>) -> Option<P> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.get_next_page_param = Some(Arc::new(f));
        self
    }

    /// Per-key override of [`QueryConfig::enabled`].
    #[must_use]
    pub fn enabled_when(mut self, f: impl Fn(&K) -> bool + Send + Sync + 'static) -> Self {
        self.hooks.enabled = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn retry_with(
        mut self,
        f: impl Fn(&QueryError, &QueryState<K, R, D, P>) -> u32 + Send + Sync + 'static,
    ) -> Self {
        self.hooks.retry = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn retry_delay_with(
        mut self,
        f: impl Fn(&QueryError, &QueryState<K, R, D, P>) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.hooks.retry_delay = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn fetch_on_mount_with(
        mut self,
        f: impl Fn(&K) -> FetchTrigger + Send + Sync + 'static,
    ) -> Self {
        self.hooks.fetch_on_mount = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn fetch_on_window_focus_with(
        mut self,
        f: impl Fn(&K) -> FetchTrigger + Send + Sync + 'static,
    ) -> Self {
        self.hooks.fetch_on_window_focus = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn fetch_on_reconnect_with(
        mut self,
        f: impl Fn(&K) -> FetchTrigger + Send + Sync + 'static,
    ) -> Self {
        self.hooks.fetch_on_reconnect = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn refetch_interval_with(
        mut self,
        f: impl Fn(&QueryState<K, R, D, P>) -> Option<Duration> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.refetch_interval = Some(Arc::new(f));
        self
    }

    /// Runs before every fetch; returning `false` cancels it.
    #[must_use]
    pub fn on_before_fetch(
        mut self,
        f: impl Fn(&QueryState<K, R, D, P>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_before_fetch = Some(Arc::new(f));
        self
    }

    /// Runs after a successful fetch with the response and the state before
    /// the fetch.
    #[must_use]
    pub fn on_success(
        mut self,
        f: impl Fn(&R, &QueryState<K, R, D, P>) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_success = Some(Arc::new(f));
        self
    }

    /// Runs after a failed fetch with the error and the state before the fetch.
    #[must_use]
    pub fn on_error(
        mut self,
        f: impl Fn(&QueryError, &QueryState<K, R, D, P>) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_error = Some(Arc::new(f));
        self
    }

    /// Runs after every fetch, successful or not.
    #[must_use]
    pub fn on_settled(
        mut self,
        f: impl Fn(&QueryState<K, R, D, P>) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_settled = Some(Arc::new(f));
        self
    }

    /// Listens to window focus and reconnect events from `events`.
    #[must_use]
    pub fn events(mut self, events: QueryEvents) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Query<K, R, D, P> {
        let Self {
            fetcher,
            config,
            hooks,
            events,
        } = self;

        let deps: ChangeFilter<QueryState<K, R, D, P>> = selector(default_deps::<K, R, D, P>);

        let inner = Arc::new_cyclic(|weak: &Weak<QueryInner<K, R, D, P>>| {
            let keep_previous = weak.clone();
            let options = StoresOptions {
                on_first_subscribe: lifecycle_hook(weak, QueryInner::on_first_subscribe),
                on_subscribe: lifecycle_hook(weak, QueryInner::on_subscribe),
                on_last_unsubscribe: lifecycle_hook(weak, QueryInner::on_last_unsubscribe),
                on_before_change_key: Some(Arc::new(move |next: &K, prev: &K| {
                    if let Some(inner) = keep_previous.upgrade() {
                        inner.keep_previous_data(next, prev);
                    }
                })),
                default_deps: Some(Arc::clone(&deps)),
                ..StoresOptions::default()
            };

            QueryInner {
                stores: Stores::with_options(
                    |key: &K, hash: &str| QueryState::initial(key.clone(), hash.to_owned()),
                    options,
                ),
                fetcher,
                config,
                hooks,
                default_deps: deps,
                events,
                listener: Mutex::new(None),
                prevent_replace: DashMap::new(),
                retry_timers: Timers::new("retry"),
                next_page_retry_timers: Timers::new("retry_next_page"),
                gc_timers: Timers::new("gc"),
                interval_timers: Timers::new("refetch_interval"),
            }
        });

        Query { inner }
    }
}

impl<K, R, D, P> fmt::Debug for QueryBuilder<K, R, D, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("config", &self.config)
            .field("paginated", &self.hooks.get_next_page_param.is_some())
            .finish()
    }
}

type DefaultDeps<D> = (Option<*const D>, Option<*const QueryError>, bool, bool);

// Data and error compare by identity.
fn default_deps<K, R, D, P>(state: &QueryState<K, R, D, P>) -> DefaultDeps<D> {
    (
        state.shared_data().map(Arc::as_ptr),
        state.error.as_ref().map(Arc::as_ptr),
        state.is_waiting_next_page,
        state.has_next_page,
    )
}

fn lifecycle_hook<K, R, D, P>(
    weak: &Weak<QueryInner<K, R, D, P>>,
    hook: fn(&Arc<QueryInner<K, R, D, P>>, &QueryState<K, R, D, P>),
) -> Option<KeyEvent<K, QueryState<K, R, D, P>>>
where
    K: StoreKey,
    R: Send + Sync + 'static,
    D: Send + Sync + 'static,
    P: PageParam,
{
    let weak = weak.clone();
    Some(Arc::new(move |_key: &K, state: &QueryState<K, R, D, P>| {
        if let Some(inner) = weak.upgrade() {
            hook(&inner, state);
        }
    }))
}

/// A keyed async query.
///
/// Cloning is cheap; clones share state.
pub struct Query<K, R, D = R, P = ()> {
    inner: Arc<QueryInner<K, R, D, P>>,
}

impl<K, R, D, P> Clone for Query<K, R, D, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, R, D, P> fmt::Debug for Query<K, R, D, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("config", &self.inner.config)
            .field("stores", &self.inner.stores)
            .finish()
    }
}

impl<K, R> Query<K, R>
where
    K: StoreKey,
    R: Clone + Send + Sync + 'static,
{
    /// Starts a builder whose data is the response itself.
    pub fn builder<F>(fetcher: F) -> QueryBuilder<K, R>
    where
        F: Fn(K, QueryState<K, R>) -> BoxFuture<'static, Result<R, QueryError>>
            + Send
            + Sync
            + 'static,
    {
        QueryBuilder::new(fetcher, |response: &R, _: SelectContext<'_, K, R>| {
            response.clone()
        })
    }

    /// Creates a query with the default configuration.
    pub fn new<F>(fetcher: F) -> Self
    where
        F: Fn(K, QueryState<K, R>) -> BoxFuture<'static, Result<R, QueryError>>
            + Send
            + Sync
            + 'static,
    {
        Self::builder(fetcher).build()
    }
}

impl<K, R, D, P> Query<K, R, D, P>
where
    K: StoreKey,
    R: Send + Sync + 'static,
    D: Send + Sync + 'static,
    P: PageParam,
{
    /// Current state for `key`.
    pub fn get(&self, key: &K) -> QueryState<K, R, D, P> {
        self.inner.stores.get(key)
    }

    /// Writes the state for `key` directly and notifies subscribers.
    pub fn set(&self, key: &K, update: impl FnOnce(&mut QueryState<K, R, D, P>)) {
        self.inner.stores.set(key, update);
    }

    /// Writes the state for `key` without notifying.
    pub fn set_silent(&self, key: &K, update: impl FnOnce(&mut QueryState<K, R, D, P>)) {
        self.inner.stores.set_silent(key, update);
    }

    /// Mounts `key`, notifying `listener` when its data, error or pagination
    /// flags change.
    pub fn subscribe(
        &self,
        key: &K,
        listener: impl Fn(&QueryState<K, R, D, P>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.stores.store(key).subscribe_filtered(
            Arc::new(listener),
            Some(Arc::clone(&self.inner.default_deps)),
        )
    }

    /// Mounts `key`, notifying `listener` when `select` projects a different value.
    pub fn subscribe_with<T, S>(
        &self,
        key: &K,
        listener: impl Fn(&QueryState<K, R, D, P>) + Send + Sync + 'static,
        select: S,
    ) -> Subscription
    where
        S: Fn(&QueryState<K, R, D, P>) -> T + Send + Sync + 'static,
        T: PartialEq,
    {
        self.inner.stores.subscribe_with(key, listener, select)
    }

    /// Mounts `key` and streams its state: the current value first, then every
    /// change. Dropping the stream unmounts.
    pub fn watch(&self, key: &K) -> BoxStream<'static, QueryState<K, R, D, P>> {
        let current = self.get(key);
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.inner.stores.subscribe(key, move |state| {
            let _ = tx.send(state.clone());
        });

        stream::once(async move { current })
            .chain(UnboundedReceiverStream::new(rx))
            .map(move |state| {
                let _mounted = &subscription;
                state
            })
            .boxed()
    }

    /// Creates a binding site that follows one key at a time and honours
    /// `keep_previous_data` when the key changes.
    pub fn bind(
        &self,
        listener: impl Fn(&QueryState<K, R, D, P>) + Send + Sync + 'static,
    ) -> StoreBinding<K, QueryState<K, R, D, P>> {
        self.inner.stores.bind(listener)
    }

    pub fn subscriber_count(&self, key: &K) -> usize {
        self.inner.stores.subscriber_count(key)
    }

    pub fn get_all(&self) -> Vec<QueryState<K, R, D, P>> {
        self.inner.stores.get_all()
    }

    pub fn get_all_with_subscriber(&self) -> Vec<QueryState<K, R, D, P>> {
        self.inner.stores.get_all_with_subscriber()
    }

    /// The underlying registry.
    pub fn stores(&self) -> &Stores<K, QueryState<K, R, D, P>> {
        &self.inner.stores
    }

    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    /// Fetches in the background if the data for `key` is stale.
    pub fn fetch(&self, key: &K) {
        self.inner.fetch(key);
    }

    /// Fetches regardless of staleness.
    ///
    /// The fetch starts immediately; the future resolves to the state once it
    /// settles. A call made while a fetch for the key is in flight, while the
    /// query is disabled, or when `on_before_fetch` declines, resolves right away
    /// to the current state.
    pub fn force_fetch(&self, key: &K) -> BoxFuture<'static, QueryState<K, R, D, P>> {
        self.inner.start_force_fetch(key.clone()).settle().boxed()
    }

    /// Fetches the page after the last loaded one.
    ///
    /// Falls back to [`Query::force_fetch`] while the key has no data.
    pub fn fetch_next_page(&self, key: &K) -> BoxFuture<'static, QueryState<K, R, D, P>> {
        self.inner.start_fetch_next_page(key.clone()).settle().boxed()
    }

    /// Replaces the response for `key` ahead of the server.
    ///
    /// A fetch already in flight for the key will discard its result.
    pub fn optimistic_update(&self, key: &K, response: R) -> OptimisticUpdate<K, R, D, P> {
        self.optimistic_update_with(key, move |_| response)
    }

    /// Like [`Query::optimistic_update`], computing the response from the
    /// current state.
    pub fn optimistic_update_with(
        &self,
        key: &K,
        make: impl FnOnce(&QueryState<K, R, D, P>) -> R,
    ) -> OptimisticUpdate<K, R, D, P> {
        let store = self.inner.stores.store(key);
        let previous = store.get();
        let response = Arc::new(make(&previous));
        let data = Arc::new((self.inner.hooks.select)(
            &response,
            SelectContext { key, data: None },
        ));
        let response_updated_at = previous.response_updated_at();

        store.set(|s| {
            s.is_optimistic_data = true;
            s.status = QueryStatus::Success {
                data,
                response,
                response_updated_at,
            };
        });
        self.inner
            .prevent_replace
            .insert(previous.key_hash.clone(), true);
        debug!(key = %previous.key_hash, "optimistic update");

        OptimisticUpdate {
            query: self.clone(),
            key: key.clone(),
            previous: previous.status,
        }
    }

    /// Marks every key stale and refetches the ones with subscribers.
    pub fn invalidate(&self) {
        for key in self.inner.stores.keys() {
            self.invalidate_specific_key(&key);
        }
    }

    /// Marks `key` stale and refetches it if it has subscribers.
    pub fn invalidate_specific_key(&self, key: &K) {
        let store = self.inner.stores.store(key);
        store.set(QueryState::mark_stale);
        if store.subscriber_count() > 0 {
            self.inner.start_force_fetch(key.clone());
        }
    }

    /// Resets every key to the initial loading state.
    pub fn reset(&self) {
        self.inner.stores.set_all(QueryState::reset);
    }

    pub fn reset_specific_key(&self, key: &K) {
        self.inner.stores.set(key, QueryState::reset);
    }

    /// Seeds `key` with a response, unless it already has data.
    ///
    /// With `skip_revalidation` the seeded data counts as fresh; otherwise it is
    /// stale and the next mount refetches it.
    pub fn set_initial_response(&self, key: &K, response: R, skip_revalidation: bool) {
        let store = self.inner.stores.store(key);
        let state = store.get();
        if state.is_success() {
            return;
        }

        let response = Arc::new(response);
        let next = self.inner.next_page_param(&response, 1, &state);
        let data = Arc::new((self.inner.hooks.select)(
            &response,
            SelectContext { key, data: None },
        ));

        store.set(|s| {
            s.status = QueryStatus::Success {
                data,
                response,
                response_updated_at: skip_revalidation.then(Instant::now),
            };
            s.has_next_page = next.is_some();
            s.page_params = vec![None, next.clone()];
            s.page_param = next;
        });
    }

    /// Mounts `key` and waits until it has data or an error.
    ///
    /// Returns the stored error, or [`QueryError::Skipped`] if no fetch could
    /// run. The key stays mounted only for the duration of the call.
    pub async fn suspend(&self, key: &K) -> Result<QueryState<K, R, D, P>, QueryError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = self.inner.stores.subscribe_with(
            key,
            move |state| {
                let _ = tx.send(state.clone());
            },
            |state: &QueryState<K, R, D, P>| state.is_waiting,
        );

        let mut state = self.get(key);
        if state.is_loading() && !state.is_waiting {
            state = self.force_fetch(key).await;
        }
        while state.is_loading() && state.is_waiting {
            match rx.recv().await {
                Some(next) => state = next,
                None => break,
            }
        }

        if state.is_success() {
            return Ok(state);
        }
        let error = match (&state.status, &state.error) {
            (QueryStatus::Error, Some(error)) => error.as_ref().clone(),
            _ => QueryError::Skipped(state.key_hash.clone()),
        };
        Err(error)
    }

    /// Applies the window focus policy to every subscribed key.
    pub fn on_window_focus(&self) {
        self.inner.on_event(QueryEvent::WindowFocus);
    }

    /// Applies the reconnect policy to every subscribed key.
    pub fn on_reconnect(&self) {
        self.inner.on_event(QueryEvent::Reconnect);
    }

    pub(crate) fn refetch(&self, key: &K) {
        self.inner.start_force_fetch(key.clone());
    }
}

/// Handle to an optimistic write.
#[must_use = "an optimistic update should be reverted or invalidated once the mutation settles"]
pub struct OptimisticUpdate<K, R, D = R, P = ()> {
    query: Query<K, R, D, P>,
    key: K,
    previous: QueryStatus<R, D>,
}

impl<K, R, D, P> OptimisticUpdate<K, R, D, P>
where
    K: StoreKey,
    R: Send + Sync + 'static,
    D: Send + Sync + 'static,
    P: PageParam,
{
    /// Restores the data from before the optimistic write.
    pub fn revert(&self) {
        let previous = self.previous.clone();
        self.query.set(&self.key, |s| {
            s.status = previous;
            s.is_optimistic_data = false;
        });
    }

    /// Marks the key stale and refetches it if it has subscribers.
    pub fn invalidate(&self) {
        self.query.invalidate_specific_key(&self.key);
    }

    pub fn key(&self) -> &K {
        &self.key
    }
}

/// A fetch that is running, or the state it resolved to immediately.
enum Started<T> {
    Ready(T),
    Running { join: JoinHandle<T>, store: Store<T> },
}

impl<T> Started<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    async fn settle(self) -> T {
        match self {
            Self::Ready(state) => state,
            Self::Running { join, store } => match join.await {
                Ok(state) => state,
                Err(err) => {
                    warn!(error = %err, "fetch task did not complete");
                    store.get()
                }
            },
        }
    }
}

/// Runs its closure when dropped before [`Unsettled::disarm`].
///
/// A fetch task that panics or is dropped by its runtime never reaches the code
/// that clears its in-flight flags; this does it instead.
struct Unsettled<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Unsettled<F> {
    fn new(abandon: F) -> Self {
        Self(Some(abandon))
    }

    fn disarm(mut self) {
        self.0 = None;
    }
}

impl<F: FnOnce()> Drop for Unsettled<F> {
    fn drop(&mut self) {
        if let Some(abandon) = self.0.take() {
            abandon();
        }
    }
}

/// Records a fetch that ended without a result as a failure.
fn abandon_fetch<K, R, D, P>(store: &Store<QueryState<K, R, D, P>>, next_page: bool)
where
    K: StoreKey,
    R: Send + Sync + 'static,
    D: Send + Sync + 'static,
    P: PageParam,
{
    let error = Arc::new(QueryError::fetch("fetch did not complete"));
    let now = Instant::now();
    store.set(|s| {
        if next_page {
            s.is_waiting_next_page = false;
        } else {
            s.is_waiting = false;
            s.is_refetching = false;
            if s.is_success() {
                s.is_refetch_error = true;
            } else {
                s.status = QueryStatus::Error;
            }
        }
        s.error = Some(Arc::clone(&error));
        s.error_updated_at = Some(now);
    });
    warn!(key = %store.read(|s| s.key_hash.clone()), next_page, "fetch abandoned");
}

/// One primary fetch, possibly spanning several pages and retries.
struct FetchAttempt<K, R, P> {
    key: K,
    hash: String,
    was_loading: bool,
    /// Cursors loaded before the fetch; that many pages are refetched.
    page_params: Vec<Option<P>>,
    new_page_params: Vec<Option<P>>,
    responses: Vec<Arc<R>>,
    page_param: Option<P>,
}

struct QueryInner<K, R, D, P> {
    stores: Stores<K, QueryState<K, R, D, P>>,
    fetcher: Fetcher<K, R, D, P>,
    config: QueryConfig,
    hooks: Hooks<K, R, D, P>,
    default_deps: ChangeFilter<QueryState<K, R, D, P>>,
    events: Option<QueryEvents>,
    listener: Mutex<Option<Handle>>,
    /// Set by optimistic writes; an in-flight fetch seeing it drops its result.
    prevent_replace: DashMap<String, bool>,
    retry_timers: Timers,
    next_page_retry_timers: Timers,
    gc_timers: Timers,
    interval_timers: Timers,
}

impl<K, R, D, P> QueryInner<K, R, D, P>
where
    K: StoreKey,
    R: Send + Sync + 'static,
    D: Send + Sync + 'static,
    P: PageParam,
{
    fn is_enabled(&self, key: &K) -> bool {
        self.hooks
            .enabled
            .as_ref()
            .map_or(self.config.enabled, |enabled| enabled(key))
    }

    fn mount_trigger(&self, key: &K) -> FetchTrigger {
        self.hooks
            .fetch_on_mount
            .as_ref()
            .map_or(self.config.fetch_on_mount, |trigger| trigger(key))
    }

    /// The per-key hook and the fixed trigger configured for `event`.
    fn event_policy(
        &self,
        event: QueryEvent,
    ) -> (Option<&KeyFn<K, FetchTrigger>>, Option<FetchTrigger>) {
        match event {
            QueryEvent::WindowFocus => (
                self.hooks.fetch_on_window_focus.as_ref(),
                self.config.fetch_on_window_focus,
            ),
            QueryEvent::Reconnect => (
                self.hooks.fetch_on_reconnect.as_ref(),
                self.config.fetch_on_reconnect,
            ),
        }
    }

    // Unset event policies fall back to the mount policy.
    fn event_trigger(&self, event: QueryEvent, key: &K) -> FetchTrigger {
        match self.event_policy(event) {
            (Some(trigger), _) => trigger(key),
            (None, Some(trigger)) => trigger,
            (None, None) => self.mount_trigger(key),
        }
    }

    // Whether `event` can ever trigger a fetch for some key.
    fn reacts_to(&self, event: QueryEvent) -> bool {
        match self.event_policy(event) {
            (Some(_), _) => true,
            (None, Some(trigger)) => trigger != FetchTrigger::Never,
            (None, None) => {
                self.hooks.fetch_on_mount.is_some()
                    || self.config.fetch_on_mount != FetchTrigger::Never
            }
        }
    }

    fn before_fetch(&self, state: &QueryState<K, R, D, P>) -> bool {
        self.hooks
            .on_before_fetch
            .as_ref()
            .is_none_or(|hook| hook(state))
    }

    fn retry_plan(
        &self,
        error: &QueryError,
        attempts: u32,
        state: &QueryState<K, R, D, P>,
    ) -> Option<Duration> {
        let max = self
            .hooks
            .retry
            .as_ref()
            .map_or(self.config.retry, |retry| retry(error, state));
        if attempts >= max {
            return None;
        }
        Some(
            self.hooks
                .retry_delay
                .as_ref()
                .map_or(self.config.retry_delay, |delay| delay(error, state)),
        )
    }

    fn next_page_param(
        &self,
        response: &R,
        pages: usize,
        state: &QueryState<K, R, D, P>,
    ) -> Option<P> {
        self.hooks
            .get_next_page_param
            .as_ref()
            .and_then(|next| next(response, pages, state))
    }

    fn select_pages(&self, key: &K, responses: &[Arc<R>]) -> Option<D> {
        responses.iter().fold(None, |data, response| {
            Some((self.hooks.select)(
                response,
                SelectContext {
                    key,
                    data: data.as_ref(),
                },
            ))
        })
    }

    fn replace_prevented(&self, hash: &str) -> bool {
        self.prevent_replace
            .get(hash)
            .is_some_and(|prevented| *prevented)
    }

    fn settled(&self, before: &QueryState<K, R, D, P>) {
        if let Some(hook) = &self.hooks.on_settled {
            hook(before);
        }
    }

    fn fetch(self: &Arc<Self>, key: &K) {
        let stale = self
            .stores
            .store(key)
            .read(|state| state.is_stale(self.config.stale_time, Instant::now()));
        if stale {
            self.start_force_fetch(key.clone());
        }
    }

    fn start_force_fetch(self: &Arc<Self>, key: K) -> Started<QueryState<K, R, D, P>> {
        let store = self.stores.store(&key);
        let state = store.get();
        self.interval_timers.cancel(&state.key_hash);

        if state.is_waiting || !self.is_enabled(&key) || !self.before_fetch(&state) {
            return Started::Ready(state);
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %state.key_hash, "no tokio runtime, fetch not started");
            return Started::Ready(state);
        };

        let was_loading = state.is_loading();
        let claimed = store.set_if(
            |s| !s.is_waiting,
            |s| {
                s.is_waiting = true;
                if !was_loading {
                    s.is_refetching = true;
                }
            },
        );
        if !claimed {
            return Started::Ready(store.get());
        }

        let first = state.page_params.first().cloned().flatten();
        let attempt = FetchAttempt {
            key,
            hash: state.key_hash,
            was_loading,
            page_params: state.page_params,
            new_page_params: vec![first.clone()],
            responses: Vec::new(),
            page_param: first,
        };

        let this = Arc::clone(self);
        let task_store = store.clone();
        let join = runtime.spawn(async move {
            this.call_query(task_store.clone(), attempt).await;
            task_store.get()
        });
        Started::Running { join, store }
    }

    fn call_query(
        self: Arc<Self>,
        store: Store<QueryState<K, R, D, P>>,
        mut attempt: FetchAttempt<K, R, P>,
    ) -> BoxFuture<'static, ()> {
        async move {
            let unsettled = Unsettled::new({
                let store = store.clone();
                move || abandon_fetch(&store, false)
            });
            loop {
                if store.read(|s| s.is_going_to_retry) {
                    let was_loading = attempt.was_loading;
                    store.set(|s| {
                        s.is_going_to_retry = false;
                        s.is_waiting = true;
                        if !was_loading {
                            s.is_refetching = true;
                        }
                    });
                    self.retry_timers.cancel(&attempt.hash);
                }
                self.prevent_replace.insert(attempt.hash.clone(), false);

                let mut before = store.get();
                before.page_param = attempt.page_param.clone();
                debug!(
                    key = %attempt.hash,
                    page = attempt.responses.len(),
                    retry_count = before.retry_count,
                    "fetching"
                );

                let result = (self.fetcher)(attempt.key.clone(), before.clone()).await;

                if self.replace_prevented(&attempt.hash) {
                    debug!(key = %attempt.hash, "result superseded by optimistic update");
                    store.set(|s| {
                        s.is_waiting = false;
                        s.is_refetching = false;
                    });
                    unsettled.disarm();
                    self.settled(&before);
                    return;
                }

                let response = match result {
                    Ok(response) => Arc::new(response),
                    Err(error) => {
                        self.fetch_failed(&store, attempt, error, &before);
                        unsettled.disarm();
                        return;
                    }
                };

                attempt.responses.push(Arc::clone(&response));
                let next = self.next_page_param(&response, attempt.responses.len(), &before);
                attempt.new_page_params.push(next.clone());

                if next.is_some() && attempt.new_page_params.len() < attempt.page_params.len() {
                    attempt.page_param = next;
                    continue;
                }

                self.fetch_succeeded(&store, attempt, response, next, &before);
                unsettled.disarm();
                return;
            }
        }
        .boxed()
    }

    fn fetch_succeeded(
        self: &Arc<Self>,
        store: &Store<QueryState<K, R, D, P>>,
        attempt: FetchAttempt<K, R, P>,
        response: Arc<R>,
        next: Option<P>,
        before: &QueryState<K, R, D, P>,
    ) {
        let data = self.select_pages(&attempt.key, &attempt.responses);
        let pages = attempt.responses.len();
        let now = Instant::now();
        let stored = Arc::clone(&response);

        store.set(|s| {
            s.is_waiting = false;
            s.is_refetching = false;
            s.is_refetch_error = false;
            s.is_previous_data = false;
            s.is_optimistic_data = false;
            s.error = None;
            s.error_updated_at = None;
            s.retry_count = 0;
            if let Some(data) = data {
                s.status = QueryStatus::Success {
                    data: Arc::new(data),
                    response: stored,
                    response_updated_at: Some(now),
                };
            }
            s.has_next_page = next.is_some();
            s.page_param = next;
            s.page_params = attempt.new_page_params;
        });
        debug!(key = %attempt.hash, pages, "fetch succeeded");

        if store.subscriber_count() > 0 {
            self.arm_refetch_interval(&store.get());
        }
        if let Some(hook) = &self.hooks.on_success {
            hook(&response, before);
        }
        self.settled(before);
    }

    fn fetch_failed(
        self: &Arc<Self>,
        store: &Store<QueryState<K, R, D, P>>,
        attempt: FetchAttempt<K, R, P>,
        error: QueryError,
        before: &QueryState<K, R, D, P>,
    ) {
        let current = store.get();
        let retry_in = self.retry_plan(&error, current.retry_count, &current);
        // Data already shown survives a failed refetch, pagination included.
        let keep_data = current.is_success() && !current.is_previous_data;
        let error = Arc::new(error);
        let now = Instant::now();

        store.set(|s| {
            s.is_waiting = false;
            s.is_refetching = false;
            s.error = Some(Arc::clone(&error));
            s.error_updated_at = Some(now);
            s.is_going_to_retry = retry_in.is_some();
            if keep_data {
                s.is_refetch_error = true;
            } else {
                s.status = QueryStatus::Error;
                s.is_previous_data = false;
                s.has_next_page = attempt.page_param.is_some();
                s.page_param = attempt.page_param.clone();
            }
        });
        warn!(
            key = %attempt.hash,
            error = %error,
            retry_count = current.retry_count,
            will_retry = retry_in.is_some(),
            "fetch failed"
        );

        if let Some(delay) = retry_in {
            let this = Arc::clone(self);
            let retry_store = store.clone();
            let attempts = current.retry_count;
            let hash = attempt.hash.clone();
            self.retry_timers.schedule(&hash, delay, async move {
                retry_store.set(|s| s.retry_count = attempts + 1);
                this.call_query(retry_store, attempt).await;
            });
        }

        if let Some(hook) = &self.hooks.on_error {
            hook(error.as_ref(), before);
        }
        self.settled(before);
    }

    fn start_fetch_next_page(self: &Arc<Self>, key: K) -> Started<QueryState<K, R, D, P>> {
        let store = self.stores.store(&key);
        let state = store.get();

        if self.hooks.get_next_page_param.is_none() {
            warn!(key = %state.key_hash, "fetch_next_page on a query without get_next_page_param");
            return Started::Ready(state);
        }
        if state.is_loading() {
            return self.start_force_fetch(key);
        }
        if state.is_waiting_next_page || !state.has_next_page || !self.before_fetch(&state) {
            return Started::Ready(state);
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %state.key_hash, "no tokio runtime, fetch not started");
            return Started::Ready(state);
        };

        let claimed = store.set_if(
            |s| !s.is_waiting_next_page,
            |s| {
                s.is_waiting_next_page = true;
                s.is_going_to_retry_next_page = false;
            },
        );
        if !claimed {
            return Started::Ready(store.get());
        }
        self.next_page_retry_timers.cancel(&state.key_hash);

        let this = Arc::clone(self);
        let task_store = store.clone();
        let join = runtime.spawn(async move {
            this.call_next_page(task_store.clone(), key, state).await;
            task_store.get()
        });
        Started::Running { join, store }
    }

    fn call_next_page(
        self: Arc<Self>,
        store: Store<QueryState<K, R, D, P>>,
        key: K,
        state: QueryState<K, R, D, P>,
    ) -> BoxFuture<'static, ()> {
        async move {
            let unsettled = Unsettled::new({
                let store = store.clone();
                move || abandon_fetch(&store, true)
            });
            let before = store.get();
            let hash = state.key_hash.clone();
            debug!(key = %hash, page = state.page_params.len(), "fetching next page");

            match (self.fetcher)(key.clone(), state.clone()).await {
                Ok(response) => {
                    let response = Arc::new(response);
                    let next = self.next_page_param(&response, state.page_params.len(), &before);
                    let data = (self.hooks.select)(
                        &response,
                        SelectContext {
                            key: &key,
                            data: state.data(),
                        },
                    );
                    let stored = Arc::clone(&response);
                    let now = Instant::now();

                    store.set(|s| {
                        s.is_waiting_next_page = false;
                        s.status = QueryStatus::Success {
                            data: Arc::new(data),
                            response: stored,
                            response_updated_at: Some(now),
                        };
                        s.has_next_page = next.is_some();
                        s.page_params = state.page_params.clone();
                        s.page_params.push(next.clone());
                        s.page_param = next;
                    });
                    debug!(key = %hash, "next page fetched");

                    if let Some(hook) = &self.hooks.on_success {
                        hook(&response, &before);
                    }
                }
                Err(error) => {
                    let current = store.get();
                    let retry_in = self.retry_plan(&error, current.retry_next_page_count, &current);
                    let error = Arc::new(error);
                    let now = Instant::now();

                    // Status stays successful; the pages already loaded are kept.
                    store.set(|s| {
                        s.is_waiting_next_page = false;
                        s.error = Some(Arc::clone(&error));
                        s.error_updated_at = Some(now);
                        s.is_going_to_retry_next_page = retry_in.is_some();
                    });
                    warn!(key = %hash, error = %error, "next page fetch failed");

                    if let Some(delay) = retry_in {
                        let this = Arc::clone(&self);
                        let retry_store = store.clone();
                        let attempts = current.retry_next_page_count;
                        let retry_key = key.clone();
                        self.next_page_retry_timers.schedule(&hash, delay, async move {
                            retry_store.set(|s| s.retry_next_page_count = attempts + 1);
                            this.start_fetch_next_page(retry_key);
                        });
                    }

                    if let Some(hook) = &self.hooks.on_error {
                        hook(error.as_ref(), &before);
                    }
                }
            }
            unsettled.disarm();
            self.settled(&before);
        }
        .boxed()
    }

    fn arm_refetch_interval(self: &Arc<Self>, state: &QueryState<K, R, D, P>) {
        let every = match &self.hooks.refetch_interval {
            Some(interval) => interval(state),
            None => self.config.refetch_interval,
        };
        let Some(every) = every.filter(|every| !every.is_zero()) else {
            return;
        };

        let weak = Arc::downgrade(self);
        let key = state.key.clone();
        self.interval_timers.schedule(&state.key_hash, every, async move {
            if let Some(inner) = weak.upgrade() {
                inner.start_force_fetch(key);
            }
        });
    }

    fn on_first_subscribe(self: &Arc<Self>, state: &QueryState<K, R, D, P>) {
        self.gc_timers.cancel(&state.key_hash);
        if state.is_success() {
            self.arm_refetch_interval(state);
        }
        self.install_listener();
    }

    fn on_subscribe(self: &Arc<Self>, state: &QueryState<K, R, D, P>) {
        self.apply_trigger(self.mount_trigger(&state.key), &state.key);
    }

    fn on_last_unsubscribe(self: &Arc<Self>, state: &QueryState<K, R, D, P>) {
        if self.stores.keys_with_subscriber().is_empty() {
            self.uninstall_listener();
        }

        let hash = &state.key_hash;
        self.stores.set_silent(&state.key, |s| {
            s.retry_count = 0;
            s.retry_next_page_count = 0;
        });
        self.retry_timers.cancel(hash);
        self.next_page_retry_timers.cancel(hash);
        self.interval_timers.cancel(hash);

        if let Some(cache_time) = self.config.cache_time {
            let weak = Arc::downgrade(self);
            let key = state.key.clone();
            let owned_hash = hash.clone();
            self.gc_timers.schedule(hash, cache_time, async move {
                if let Some(inner) = weak.upgrade() {
                    debug!(key = %owned_hash, "cache time elapsed, resetting");
                    inner.stores.set(&key, QueryState::reset);
                }
            });
        }
    }

    fn keep_previous_data(&self, next: &K, prev: &K) {
        if !self.config.keep_previous_data || self.stores.get(next).data().is_some() {
            return;
        }
        let QueryStatus::Success { data, response, .. } = self.stores.get(prev).status else {
            return;
        };
        self.stores.set_silent(next, |s| {
            s.status = QueryStatus::Success {
                data,
                response,
                response_updated_at: None,
            };
            s.is_previous_data = true;
        });
    }

    fn apply_trigger(self: &Arc<Self>, trigger: FetchTrigger, key: &K) {
        match trigger {
            FetchTrigger::Always => {
                self.start_force_fetch(key.clone());
            }
            FetchTrigger::IfStale => self.fetch(key),
            FetchTrigger::Never => {}
        }
    }

    fn on_event(self: &Arc<Self>, event: QueryEvent) {
        for key in self.stores.keys_with_subscriber() {
            self.apply_trigger(self.event_trigger(event, &key), &key);
        }
    }

    fn install_listener(self: &Arc<Self>) {
        let Some(events) = &self.events else {
            return;
        };
        if !self.reacts_to(QueryEvent::WindowFocus) && !self.reacts_to(QueryEvent::Reconnect) {
            return;
        }
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        *listener = events.listen(move |event| match weak.upgrade() {
            Some(inner) => {
                inner.on_event(event);
                true
            }
            None => false,
        });
        debug!("listening for window focus and reconnect");
    }

    fn uninstall_listener(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.cancel();
            debug!("stopped listening for window focus and reconnect");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type TestQuery = Query<u32, String>;

    fn counting_query(config: QueryConfig) -> (TestQuery, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let query = Query::builder(move |id: u32, _state: QueryState<u32, String>| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(format!("{id}#{n}"))
            }
            .boxed()
        })
        .config(config)
        .build();
        (query, calls)
    }

    #[test]
    fn test_unsettled_runs_unless_disarmed() {
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        drop(Unsettled::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&fired);
        Unsettled::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .disarm();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_fetch_stores_response() {
        let (query, calls) = counting_query(QueryConfig::default());

        let state = query.force_fetch(&1).await;
        assert!(state.is_success());
        assert_eq!(state.data().map(String::as_str), Some("1#1"));
        assert!(!state.is_waiting);
        assert!(state.response_updated_at().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_force_fetch_runs_once() {
        let (query, calls) = counting_query(QueryConfig::default());

        let (a, b) = tokio::join!(query.force_fetch(&1), query.force_fetch(&1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(a.is_success());
        // The second call saw the first one in flight.
        assert!(b.is_waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_respects_stale_time() {
        let (query, calls) = counting_query(QueryConfig::default());

        query.force_fetch(&1).await;
        query.fetch(&1);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(2200)).await;
        query.fetch(&1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(query.get(&1).data().map(String::as_str), Some("1#2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_query_never_fetches() {
        let (query, calls) = counting_query(QueryConfig::default().with_enabled(false));

        let state = query.force_fetch(&1).await;
        assert!(state.is_loading());
        assert_eq!(query.suspend(&1).await, Err(QueryError::Skipped("1".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_before_fetch_can_cancel() {
        let query = Query::builder(|id: u32, _state: QueryState<u32, String>| {
            async move { Ok(id.to_string()) }.boxed()
        })
        .on_before_fetch(|state| state.key % 2 == 0)
        .build();

        assert!(query.force_fetch(&1).await.is_loading());
        assert!(query.force_fetch(&2).await.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_initial_response() {
        let (query, calls) = counting_query(QueryConfig::default());

        query.set_initial_response(&1, "seed".to_string(), true);
        query.set_initial_response(&1, "ignored".to_string(), true);
        let state = query.get(&1);
        assert_eq!(state.data().map(String::as_str), Some("seed"));
        assert!(!state.is_stale(query.config().stale_time, Instant::now()));

        query.fetch(&1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        query.set_initial_response(&2, "seed".to_string(), false);
        assert!(query.get(&2).response_updated_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_loading_state() {
        let (query, _) = counting_query(QueryConfig::default());

        query.force_fetch(&1).await;
        query.force_fetch(&2).await;
        query.reset_specific_key(&1);
        assert!(query.get(&1).is_loading());
        assert!(query.get(&2).is_success());

        query.reset();
        assert!(query.get_all().iter().all(QueryState::is_loading));
    }

    #[test]
    fn test_fetch_without_runtime_leaves_state_untouched() {
        let (query, calls) = counting_query(QueryConfig::default());
        query.fetch(&1);
        let state = query.get(&1);
        assert!(!state.is_waiting);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_default_deps_ignore_waiting_flag() {
        let mut a: QueryState<u32, String> = QueryState::initial(1, "1".into());
        let b = a.clone();
        a.is_waiting = true;
        assert_eq!(default_deps(&a), default_deps(&b));
        a.has_next_page = true;
        assert_ne!(default_deps(&a), default_deps(&b));
    }
}
