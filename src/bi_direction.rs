//! Paginated queries that grow in both directions.
//!
//! A [`BiDirectionQuery`] is two paginated [`Query`]s over the same keys. The
//! `next` query owns the initial page and pages after it; the `prev` query owns
//! the pages before it and only fetches when asked to, or when the initial page
//! is refetched. When the initial page loads, its response seeds the `prev`
//! query's first cursor. The combined data is every `prev` page followed by
//! every `next` page.
//!
//! # Example
//!
//! ```
//! use futures::FutureExt;
//! use syncwell::QueryError;
//! use syncwell::bi_direction::{BiDirectionQuery, Direction};
//!
//! // Pages are windows of three items around 0.
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let timeline = BiDirectionQuery::builder(
//!     |_key: (), state, direction| {
//!         let start = state.page_param.unwrap_or(0);
//!         async move {
//!             let page: Vec<i32> = match direction {
//!                 Direction::Next => (start..start + 3).collect(),
//!                 Direction::Prev => (start - 3..start).collect(),
//!             };
//!             Ok::<_, QueryError>(page)
//!         }
//!         .boxed()
//!     },
//!     |page: &Vec<i32>, ctx, direction| match direction {
//!         Direction::Next => ctx.data.cloned().unwrap_or_default().into_iter().chain(page.clone()).collect(),
//!         Direction::Prev => page.iter().copied().chain(ctx.data.cloned().unwrap_or_default()).collect(),
//!     },
//!     |page, _, _| page.first().copied().filter(|first| *first > -6),
//!     |page, _, _| page.last().map(|last| last + 1).filter(|next| *next < 6),
//! )
//! .build();
//!
//! timeline.force_fetch(&()).await;
//! timeline.fetch_prev_page(&()).await;
//! assert_eq!(timeline.get(&()).data, vec![-3, -2, -1, 0, 1, 2]);
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::QueryError;
use crate::key::StoreKey;
use crate::query::{
    FetchTrigger, PageParam, Query, QueryBuilder, QueryConfig, QueryEvents, QueryState,
    SelectContext,
};
use crate::store::Subscription;

/// Which end of the list a fetch extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Prev,
    Next,
}

/// State of one side of a [`BiDirectionQuery`].
pub type PageState<K, R, T, P> = QueryState<K, R, Vec<T>, P>;

type BiFetcher<K, R, T, P> = Arc<
    dyn Fn(K, PageState<K, R, T, P>, Direction) -> BoxFuture<'static, Result<R, QueryError>>
        + Send
        + Sync,
>;
type BiSelect<K, R, T> =
    Arc<dyn Fn(&R, SelectContext<'_, K, Vec<T>>, Direction) -> Vec<T> + Send + Sync>;
type PageParamFn<K, R, T, P> =
    Arc<dyn Fn(&R, usize, &PageState<K, R, T, P>) -> Option<P> + Send + Sync>;

/// Combined view of both sides for one key.
#[derive(Debug)]
pub struct BiDirectionState<K, R, T, P> {
    /// The side holding the initial page and the pages after it.
    pub next: PageState<K, R, T, P>,
    /// The side holding the pages before the initial page.
    pub prev: PageState<K, R, T, P>,
    /// Items of every previous page followed by the items of every next page.
    pub data: Vec<T>,
    pub has_prev_page: bool,
    pub is_waiting_prev_page: bool,
}

impl<K, R, T, P> BiDirectionState<K, R, T, P>
where
    K: Clone,
    T: Clone,
    P: Clone,
{
    fn combine(prev: PageState<K, R, T, P>, next: PageState<K, R, T, P>) -> Self {
        let data = prev
            .data()
            .into_iter()
            .chain(next.data())
            .flatten()
            .cloned()
            .collect();
        Self {
            has_prev_page: prev.has_next_page,
            is_waiting_prev_page: prev.is_waiting_next_page || (prev.is_loading() && prev.is_waiting),
            data,
            next,
            prev,
        }
    }

    pub const fn has_next_page(&self) -> bool {
        self.next.has_next_page
    }

    pub const fn is_waiting_next_page(&self) -> bool {
        self.next.is_waiting_next_page
    }
}

impl<K: Clone, R, T: Clone, P: Clone> Clone for BiDirectionState<K, R, T, P> {
    fn clone(&self) -> Self {
        Self {
            next: self.next.clone(),
            prev: self.prev.clone(),
            data: self.data.clone(),
            has_prev_page: self.has_prev_page,
            is_waiting_prev_page: self.is_waiting_prev_page,
        }
    }
}

/// Builder for [`BiDirectionQuery`].
pub struct BiDirectionQueryBuilder<K, R, T, P> {
    fetcher: BiFetcher<K, R, T, P>,
    select: BiSelect<K, R, T>,
    get_prev_page_param: PageParamFn<K, R, T, P>,
    get_next_page_param: PageParamFn<K, R, T, P>,
    config: QueryConfig,
    events: Option<QueryEvents>,
}

impl<K, R, T, P> BiDirectionQueryBuilder<K, R, T, P>
where
    K: StoreKey,
    R: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    P: PageParam,
{
    /// Configuration shared by both sides. `fetch_on_mount`,
    /// `fetch_on_window_focus` and `fetch_on_reconnect` apply to the next side
    /// only; the previous pages follow the initial page.
    #[must_use]
    pub fn config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn events(mut self, events: QueryEvents) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> BiDirectionQuery<K, R, T, P> {
        let Self {
            fetcher,
            select,
            get_prev_page_param,
            get_next_page_param,
            config,
            events,
        } = self;

        let prev_config = config
            .clone()
            .with_fetch_on_mount(FetchTrigger::Never)
            .with_fetch_on_window_focus(FetchTrigger::Never)
            .with_fetch_on_reconnect(FetchTrigger::Never);

        let prev = {
            let fetcher = Arc::clone(&fetcher);
            let select = Arc::clone(&select);
            let get_prev = Arc::clone(&get_prev_page_param);
            QueryBuilder::new(
                move |key: K, state: PageState<K, R, T, P>| fetcher(key, state, Direction::Prev),
                move |response: &R, ctx: SelectContext<'_, K, Vec<T>>| {
                    select(response, ctx, Direction::Prev)
                },
            )
            .get_next_page_param(move |response, pages, state| get_prev(response, pages, state))
            .config(prev_config)
            .build()
        };

        let next_fetcher = {
            let prev = prev.clone();
            move |key: K, state: PageState<K, R, T, P>| -> BoxFuture<'static, Result<R, QueryError>> {
                let fetcher = Arc::clone(&fetcher);
                let get_prev = Arc::clone(&get_prev_page_param);
                let prev = prev.clone();
                async move {
                    let is_initial_page = state.page_param.is_none();
                    let prev_state = prev.get(&key);

                    match fetcher(key.clone(), state, Direction::Next).await {
                        Ok(response) => {
                            if is_initial_page {
                                seed_prev_side(&prev, &key, &prev_state, &response, &*get_prev);
                            }
                            Ok(response)
                        }
                        Err(error) => {
                            if is_initial_page && !prev_state.is_loading() {
                                prev.reset_specific_key(&key);
                            }
                            Err(error)
                        }
                    }
                }
                .boxed()
            }
        };

        let mut next = QueryBuilder::new(
            next_fetcher,
            move |response: &R, ctx: SelectContext<'_, K, Vec<T>>| {
                select(response, ctx, Direction::Next)
            },
        )
        .get_next_page_param(move |response, pages, state| {
            get_next_page_param(response, pages, state)
        })
        .config(config);
        if let Some(events) = events {
            next = next.events(events);
        }

        BiDirectionQuery {
            prev,
            next: next.build(),
        }
    }
}

impl<K, R, T, P> fmt::Debug for BiDirectionQueryBuilder<K, R, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BiDirectionQueryBuilder")
            .field("config", &self.config)
            .finish()
    }
}

// The initial page decides where the previous pages start.
fn seed_prev_side<K, R, T, P>(
    prev: &Query<K, R, Vec<T>, P>,
    key: &K,
    prev_state: &PageState<K, R, T, P>,
    response: &R,
    get_prev: &(dyn Fn(&R, usize, &PageState<K, R, T, P>) -> Option<P> + Send + Sync),
) where
    K: StoreKey,
    R: Send + Sync + 'static,
    T: Send + Sync + 'static,
    P: PageParam,
{
    let cursor = get_prev(response, 1, prev_state);
    prev.set(key, |s| {
        if s.is_loading() {
            s.has_next_page = cursor.is_some();
        }
        match s.page_params.first_mut() {
            Some(first) => *first = cursor,
            None => s.page_params.push(cursor),
        }
    });
    if !prev_state.is_loading() {
        prev.refetch(key);
    }
}

/// A query paginated both backwards and forwards.
pub struct BiDirectionQuery<K, R, T, P = ()> {
    prev: Query<K, R, Vec<T>, P>,
    next: Query<K, R, Vec<T>, P>,
}

impl<K, R, T, P> Clone for BiDirectionQuery<K, R, T, P> {
    fn clone(&self) -> Self {
        Self {
            prev: self.prev.clone(),
            next: self.next.clone(),
        }
    }
}

impl<K, R, T, P> fmt::Debug for BiDirectionQuery<K, R, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BiDirectionQuery")
            .field("prev", &self.prev)
            .field("next", &self.next)
            .finish()
    }
}

impl<K, R, T, P> BiDirectionQuery<K, R, T, P>
where
    K: StoreKey,
    R: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    P: PageParam,
{
    /// Starts a builder.
    ///
    /// `fetcher` and `select` are told which direction they serve.
    /// `get_prev_page_param` receives the initial page first, then each
    /// previous page.
    pub fn builder<F, S, GP, GN>(
        fetcher: F,
        select: S,
        get_prev_page_param: GP,
        get_next_page_param: GN,
    ) -> BiDirectionQueryBuilder<K, R, T, P>
    where
        F: Fn(K, PageState<K, R, T, P>, Direction) -> BoxFuture<'static, Result<R, QueryError>>
            + Send
            + Sync
            + 'static,
        S: Fn(&R, SelectContext<'_, K, Vec<T>>, Direction) -> Vec<T> + Send + Sync + 'static,
        GP: Fn(&R, usize, &PageState<K, R, T, P>) -> Option<P> + Send + Sync + 'static,
        GN: Fn(&R, usize, &PageState<K, R, T, P>) -> Option<P> + Send + Sync + 'static,
    {
        BiDirectionQueryBuilder {
            fetcher: Arc::new(fetcher),
            select: Arc::new(select),
            get_prev_page_param: Arc::new(get_prev_page_param),
            get_next_page_param: Arc::new(get_next_page_param),
            config: QueryConfig::default(),
            events: None,
        }
    }

    pub fn get(&self, key: &K) -> BiDirectionState<K, R, T, P> {
        BiDirectionState::combine(self.prev.get(key), self.next.get(key))
    }

    /// Mounts `key` on both sides. `listener` receives the combined state.
    pub fn subscribe(
        &self,
        key: &K,
        listener: impl Fn(&BiDirectionState<K, R, T, P>) + Send + Sync + 'static,
    ) -> Subscription {
        let listener = Arc::new(listener);

        let on_prev = {
            let this = self.clone();
            let listener = Arc::clone(&listener);
            let key = key.clone();
            move |_: &PageState<K, R, T, P>| listener(&this.get(&key))
        };
        let prev = self.prev.subscribe_with(key, on_prev, |s: &PageState<K, R, T, P>| {
            (
                s.is_waiting,
                s.shared_data().map(Arc::as_ptr),
                s.error.as_ref().map(Arc::as_ptr),
                s.is_waiting_next_page,
                s.has_next_page,
            )
        });

        let on_next = {
            let this = self.clone();
            let key = key.clone();
            move |_: &PageState<K, R, T, P>| listener(&this.get(&key))
        };
        let next = self.next.subscribe(key, on_next);

        prev.join(next)
    }

    /// Fetches the initial page in the background if it is stale.
    pub fn fetch(&self, key: &K) {
        self.next.fetch(key);
    }

    /// Refetches the initial page and every next page already loaded.
    pub fn force_fetch(&self, key: &K) -> BoxFuture<'static, QueryState<K, R, Vec<T>, P>> {
        self.next.force_fetch(key)
    }

    pub fn fetch_next_page(&self, key: &K) -> BoxFuture<'static, QueryState<K, R, Vec<T>, P>> {
        self.next.fetch_next_page(key)
    }

    /// Fetches the page before the earliest loaded one.
    pub fn fetch_prev_page(&self, key: &K) -> BoxFuture<'static, QueryState<K, R, Vec<T>, P>> {
        self.prev.fetch_next_page(key)
    }

    pub fn reset(&self) {
        self.prev.reset();
        self.next.reset();
    }

    pub fn reset_specific_key(&self, key: &K) {
        self.prev.reset_specific_key(key);
        self.next.reset_specific_key(key);
    }

    pub fn invalidate(&self) {
        self.next.invalidate();
    }

    pub fn invalidate_specific_key(&self, key: &K) {
        self.next.invalidate_specific_key(key);
    }

    /// Seeds the initial page.
    pub fn set_initial_response(&self, key: &K, response: R, skip_revalidation: bool) {
        self.next.set_initial_response(key, response, skip_revalidation);
    }

    /// Mounts `key` and waits until the initial page has data or an error.
    pub async fn suspend(&self, key: &K) -> Result<BiDirectionState<K, R, T, P>, QueryError> {
        let next = self.next.suspend(key).await?;
        Ok(BiDirectionState::combine(self.prev.get(key), next))
    }

    /// The side holding the pages before the initial page.
    pub fn prev(&self) -> &Query<K, R, Vec<T>, P> {
        &self.prev
    }

    /// The side holding the initial page and the pages after it.
    pub fn next(&self) -> &Query<K, R, Vec<T>, P> {
        &self.next
    }
}
