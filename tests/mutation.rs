// Integration tests for mutations working together with queries
// A mutation writes optimistically, then invalidates on success or reverts on
// failure.

mod common;

use std::sync::Arc;

use common::{Source, init_tracing, settle};
use futures::FutureExt;
use parking_lot::Mutex;
use syncwell::QueryError;
use syncwell::mutation::{Mutation, MutationState};
use syncwell::query::{OptimisticUpdate, Query, QueryConfig};
use tokio::time::Duration;

type Pending = Arc<Mutex<Option<OptimisticUpdate<u32, String>>>>;

/// Renames key 1 optimistically. Empty names are rejected by the server.
fn rename(query: &Query<u32, String>) -> Mutation<String, String> {
    let pending: Pending = Arc::new(Mutex::new(None));

    let on_mutate = {
        let query = query.clone();
        let pending = Arc::clone(&pending);
        move |name: &String, _: &MutationState<String>| {
            *pending.lock() = Some(query.optimistic_update(&1, name.clone()));
        }
    };
    let on_success = {
        let pending = Arc::clone(&pending);
        move |_: &String, _: &String, _: &MutationState<String>| {
            if let Some(update) = pending.lock().take() {
                update.invalidate();
            }
        }
    };
    let on_error = move |_: &QueryError, _: &String, _: &MutationState<String>| {
        if let Some(update) = pending.lock().take() {
            update.revert();
        }
    };

    Mutation::builder(|name: String, _state| {
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if name.is_empty() {
                Err(QueryError::fetch("name is required"))
            } else {
                Ok(name)
            }
        }
        .boxed()
    })
    .on_mutate(on_mutate)
    .on_success(on_success)
    .on_error(on_error)
    .build()
}

#[tokio::test(start_paused = true)]
async fn test_successful_mutation_invalidates() {
    init_tracing();
    let source = Source::instant();
    let query = source.query(QueryConfig::default().with_stale_time(Duration::from_secs(60)));
    let _sub = query.subscribe(&1, |_| {});
    settle().await;

    let mutation = rename(&query);
    let running = tokio::spawn({
        let mutation = mutation.clone();
        async move { mutation.mutate("ada".to_string()).await }
    });
    settle().await;
    assert!(mutation.get().is_waiting);
    assert_eq!(query.get(&1).data().map(String::as_str), Some("ada"));

    let outcome = running.await.expect("mutation task");
    assert_eq!(outcome.into_result().as_deref(), Ok(&"ada".to_string()));
    settle().await;

    let state = query.get(&1);
    assert!(!state.is_optimistic_data);
    assert_eq!(state.data().map(String::as_str), Some("1#2"));
    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_mutation_reverts() {
    init_tracing();
    let source = Source::instant();
    let query = source.query(QueryConfig::default());
    query.force_fetch(&1).await;

    let mutation = rename(&query);
    let outcome = mutation.mutate(String::new()).await;
    assert_eq!(outcome.error, Some(QueryError::fetch("name is required")));
    assert_eq!(outcome.variables, "");

    let state = query.get(&1);
    assert!(!state.is_optimistic_data);
    assert_eq!(state.data().map(String::as_str), Some("1#1"));
    assert_eq!(source.calls(), 1);

    let state = mutation.get();
    assert!(state.is_error);
    assert!(!state.is_waiting);
    assert!(state.response.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_mutation_state_notifies_subscribers() {
    init_tracing();
    let source = Source::instant();
    let query = source.query(QueryConfig::default());
    let mutation = rename(&query);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = mutation.subscribe_with(
        move |state| sink.lock().push((state.is_waiting, state.is_success)),
        |state: &MutationState<String>| (state.is_waiting, state.is_success),
    );

    mutation.mutate("grace".to_string()).await;
    assert_eq!(*seen.lock(), vec![(true, false), (false, true)]);

    // The last response survives a failed call.
    mutation.mutate(String::new()).await;
    let state = mutation.get();
    assert!(state.is_error);
    assert_eq!(state.response.as_deref().map(String::as_str), Some("grace"));
}
