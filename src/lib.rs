//! # Syncwell - keyed reactive stores and an async query cache
//!
//! Syncwell keeps remote data in sync with the code that reads it. It is built from
//! small layers, each usable on its own:
//!
//! 1. **Store**: a value with change notification, selector-based change
//!    detection and subscription lifecycle hooks
//! 2. **Stores**: a registry of stores addressed by a serializable key
//! 3. **Query**: per-key async fetch state with staleness, retries, garbage
//!    collection, polling, pagination and optimistic updates
//! 4. **Bi-directional query**: two paginated queries joined into one list that
//!    grows at both ends
//! 5. **Mutation**: the tracked state of one-off writes
//!
//! ## Core Components
//!
//! - [`Store`](store::Store): A single observable value
//! - [`Stores`](stores::Stores): Lazily created stores keyed by hash
//! - [`Query`](query::Query): Cached async data per key
//! - [`BiDirectionQuery`](bi_direction::BiDirectionQuery): Pagination in both directions
//! - [`Mutation`](mutation::Mutation): Observable writes
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use futures::FutureExt;
//! use syncwell::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let calls = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&calls);
//!
//! let todos = Query::new(move |user: u32, _state: QueryState<u32, Vec<String>>| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     async move { Ok(vec![format!("todo of user {user}")]) }.boxed()
//! });
//!
//! // Mounting a key fetches it; the subscriber sees the result.
//! let state = todos.suspend(&1).await.expect("fetch succeeds");
//! assert_eq!(state.data().map(Vec::len), Some(1));
//!
//! // Fresh data is not fetched again.
//! todos.fetch(&1);
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! # }
//! ```

pub mod bi_direction;
pub mod error;
pub mod key;
pub mod mutation;
pub mod prelude;
pub mod query;
pub mod store;
pub mod stores;

pub use error::QueryError;
pub use key::StoreKey;
