//! Prelude module for convenient imports.
//!
//! ```
//! use syncwell::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`Store`] and [`Stores`] - Observable values and keyed registries
//! - [`Subscription`] - Handle that unsubscribes on drop
//! - [`Query`], [`QueryState`], [`QueryConfig`] - Cached async data
//! - [`BiDirectionQuery`] - Pagination in both directions
//! - [`Mutation`] - Observable writes
//! - [`QueryError`] - Error type shared by queries and mutations

pub use crate::bi_direction::{BiDirectionQuery, BiDirectionState, Direction};
pub use crate::error::QueryError;
pub use crate::key::StoreKey;
pub use crate::mutation::{Mutation, MutationOutcome, MutationState};
pub use crate::query::{
    FetchTrigger, OptimisticUpdate, Query, QueryConfig, QueryEvents, QueryState, QueryStatus,
    SelectContext,
};
pub use crate::store::{Store, Subscription};
pub use crate::stores::{StoreBinding, Stores, StoresOptions};
