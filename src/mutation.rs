//! Tracked one-off mutations.
//!
//! A [`Mutation`] wraps an async mutator with a [`Store`] of [`MutationState`], so
//! the progress and outcome of the latest call can be observed the same way as a
//! query. Unlike queries, mutations are never retried or cached, and
//! [`Mutation::mutate`] never fails: the outcome carries either the response or
//! the error.
//!
//! After a successful mutation you typically invalidate related queries, or
//! revert an optimistic update when it fails.
//!
//! # Example
//!
//! ```
//! use futures::FutureExt;
//! use syncwell::QueryError;
//! use syncwell::mutation::Mutation;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let rename = Mutation::new(|name: String, _state| {
//!     async move {
//!         if name.is_empty() {
//!             Err(QueryError::fetch("name is required"))
//!         } else {
//!             Ok(name.to_uppercase())
//!         }
//!     }
//!     .boxed()
//! });
//!
//! let outcome = rename.mutate("ada".to_string()).await;
//! assert_eq!(outcome.response.as_deref().map(String::as_str), Some("ADA"));
//!
//! let outcome = rename.mutate(String::new()).await;
//! assert!(outcome.error.is_some());
//! assert!(rename.get().is_error);
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::error::QueryError;
use crate::store::{Store, Subscription};

/// Observable state of a mutation.
#[derive(Debug)]
pub struct MutationState<R> {
    /// A mutation is in flight.
    pub is_waiting: bool,
    pub is_success: bool,
    pub is_error: bool,
    /// Response of the last successful call. Kept when a later call fails.
    pub response: Option<Arc<R>>,
    pub response_updated_at: Option<Instant>,
    pub error: Option<Arc<QueryError>>,
    pub error_updated_at: Option<Instant>,
}

impl<R> Default for MutationState<R> {
    fn default() -> Self {
        Self {
            is_waiting: false,
            is_success: false,
            is_error: false,
            response: None,
            response_updated_at: None,
            error: None,
            error_updated_at: None,
        }
    }
}

impl<R> Clone for MutationState<R> {
    fn clone(&self) -> Self {
        Self {
            is_waiting: self.is_waiting,
            is_success: self.is_success,
            is_error: self.is_error,
            response: self.response.clone(),
            response_updated_at: self.response_updated_at,
            error: self.error.clone(),
            error_updated_at: self.error_updated_at,
        }
    }
}

fn same<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl<R> PartialEq for MutationState<R> {
    fn eq(&self, other: &Self) -> bool {
        self.is_waiting == other.is_waiting
            && self.is_success == other.is_success
            && self.is_error == other.is_error
            && same(&self.response, &other.response)
            && self.response_updated_at == other.response_updated_at
            && same(&self.error, &other.error)
            && self.error_updated_at == other.error_updated_at
    }
}

/// Result of one [`Mutation::mutate`] call.
#[derive(Debug, Clone)]
pub struct MutationOutcome<R, V> {
    pub response: Option<Arc<R>>,
    pub error: Option<QueryError>,
    pub variables: V,
}

impl<R, V> MutationOutcome<R, V> {
    /// Converts the outcome into a `Result`, dropping the variables.
    pub fn into_result(self) -> Result<Arc<R>, QueryError> {
        match (self.response, self.error) {
            (Some(response), None) => Ok(response),
            (_, Some(error)) => Err(error),
            (None, None) => Err(QueryError::fetch("mutation produced no response")),
        }
    }
}

type Mutator<V, R> =
    Arc<dyn Fn(V, MutationState<R>) -> BoxFuture<'static, Result<R, QueryError>> + Send + Sync>;
type VariablesHook<V, R> = Arc<dyn Fn(&V, &MutationState<R>) + Send + Sync>;

struct MutationHooks<V, R> {
    on_mutate: Option<VariablesHook<V, R>>,
    on_success: Option<Arc<dyn Fn(&R, &V, &MutationState<R>) + Send + Sync>>,
    on_error: Option<Arc<dyn Fn(&QueryError, &V, &MutationState<R>) + Send + Sync>>,
    on_settled: Option<VariablesHook<V, R>>,
}

/// Builder for [`Mutation`].
pub struct MutationBuilder<V, R> {
    mutator: Mutator<V, R>,
    hooks: MutationHooks<V, R>,
}

impl<V, R> MutationBuilder<V, R>
where
    V: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Runs right before the mutator, with the state already marked waiting.
    #[must_use]
    pub fn on_mutate(mut self, f: impl Fn(&V, &MutationState<R>) + Send + Sync + 'static) -> Self {
        self.hooks.on_mutate = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_success(
        mut self,
        f: impl Fn(&R, &V, &MutationState<R>) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_success = Some(Arc::new(f));
        self
    }

    /// Replaces the default handler, which logs the error.
    #[must_use]
    pub fn on_error(
        mut self,
        f: impl Fn(&QueryError, &V, &MutationState<R>) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_error = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_settled(
        mut self,
        f: impl Fn(&V, &MutationState<R>) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_settled = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Mutation<V, R> {
        Mutation {
            inner: Arc::new(MutationInner {
                store: Store::new(MutationState::default()),
                mutator: self.mutator,
                hooks: self.hooks,
            }),
        }
    }
}

struct MutationInner<V, R> {
    store: Store<MutationState<R>>,
    mutator: Mutator<V, R>,
    hooks: MutationHooks<V, R>,
}

/// A tracked mutation.
///
/// Cloning is cheap; clones share state.
pub struct Mutation<V, R> {
    inner: Arc<MutationInner<V, R>>,
}

impl<V, R> Clone for Mutation<V, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, R> fmt::Debug for Mutation<V, R>
where
    R: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("state", &self.inner.store)
            .finish()
    }
}

impl<V, R> Mutation<V, R>
where
    V: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Starts a builder.
    ///
    /// The mutator receives the variables and the state right before the call.
    pub fn builder<F>(mutator: F) -> MutationBuilder<V, R>
    where
        F: Fn(V, MutationState<R>) -> BoxFuture<'static, Result<R, QueryError>>
            + Send
            + Sync
            + 'static,
    {
        MutationBuilder {
            mutator: Arc::new(mutator),
            hooks: MutationHooks {
                on_mutate: None,
                on_success: None,
                on_error: None,
                on_settled: None,
            },
        }
    }

    pub fn new<F>(mutator: F) -> Self
    where
        F: Fn(V, MutationState<R>) -> BoxFuture<'static, Result<R, QueryError>>
            + Send
            + Sync
            + 'static,
    {
        Self::builder(mutator).build()
    }

    pub fn get(&self) -> MutationState<R> {
        self.inner.store.get()
    }

    /// Notifies `listener` on every state change.
    pub fn subscribe(
        &self,
        listener: impl Fn(&MutationState<R>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.store.subscribe(listener)
    }

    /// Notifies `listener` when `select` projects a different value.
    pub fn subscribe_with<T, S>(
        &self,
        listener: impl Fn(&MutationState<R>) + Send + Sync + 'static,
        select: S,
    ) -> Subscription
    where
        S: Fn(&MutationState<R>) -> T + Send + Sync + 'static,
        T: PartialEq,
    {
        self.inner.store.subscribe_with(listener, select)
    }

    /// Runs the mutator with `variables`.
    ///
    /// Concurrent calls are not deduplicated; the last one to settle wins.
    pub async fn mutate(&self, variables: V) -> MutationOutcome<R, V> {
        let inner = Arc::clone(&self.inner);
        let kept = variables.clone();
        let task = async move { inner.run(variables).await };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return task.await;
        };
        // Spawned so the mutation completes even if the caller stops waiting.
        match runtime.spawn(task).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "mutation task did not complete");
                self.inner.store.set(|s| s.is_waiting = false);
                MutationOutcome {
                    response: None,
                    error: Some(QueryError::fetch(err)),
                    variables: kept,
                }
            }
        }
    }
}

impl<V, R> MutationInner<V, R>
where
    V: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    async fn run(&self, variables: V) -> MutationOutcome<R, V> {
        self.store.set(|s| s.is_waiting = true);
        let before = self.store.get();
        if let Some(hook) = &self.hooks.on_mutate {
            hook(&variables, &before);
        }

        let result = (self.mutator)(variables.clone(), before.clone()).await;
        let now = Instant::now();

        let outcome = match result {
            Ok(response) => {
                let response = Arc::new(response);
                let stored = Arc::clone(&response);
                self.store.set(|s| {
                    s.is_waiting = false;
                    s.is_success = true;
                    s.is_error = false;
                    s.response = Some(stored);
                    s.response_updated_at = Some(now);
                    s.error = None;
                    s.error_updated_at = None;
                });
                tracing::debug!("mutation succeeded");
                if let Some(hook) = &self.hooks.on_success {
                    hook(&response, &variables, &before);
                }
                MutationOutcome {
                    response: Some(response),
                    error: None,
                    variables,
                }
            }
            Err(error) => {
                let shared = Arc::new(error.clone());
                self.store.set(|s| {
                    s.is_waiting = false;
                    s.is_success = false;
                    s.is_error = true;
                    s.error = Some(shared);
                    s.error_updated_at = Some(now);
                });
                match &self.hooks.on_error {
                    Some(hook) => hook(&error, &variables, &before),
                    None => tracing::error!(error = %error, "mutation failed"),
                }
                MutationOutcome {
                    response: None,
                    error: Some(error),
                    variables,
                }
            }
        };

        if let Some(hook) = &self.hooks.on_settled {
            hook(&outcome.variables, &before);
        }
        outcome
    }
}
