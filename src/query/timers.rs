//! Per-key one-shot timers.
//!
//! Each [`Timers`] table holds at most one pending timer per key hash. Scheduling
//! a timer for a hash cancels the one already pending for it.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Spawns `make()` on the current runtime.
///
/// Returns `false` without calling `make` when there is no runtime, so callers
/// can skip state changes that would wait on the task.
pub(crate) fn spawn_detached<F>(task: &'static str, make: impl FnOnce() -> F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(make());
            true
        }
        Err(_) => {
            tracing::warn!(task, "no tokio runtime, task not started");
            false
        }
    }
}

pub(crate) struct Timers {
    name: &'static str,
    pending: Arc<DashMap<String, (u64, CancellationToken)>>,
    next_id: AtomicU64,
}

impl Timers {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Runs `work` after `delay` unless cancelled first.
    ///
    /// Once the delay has elapsed the entry is cleared and `work` runs to
    /// completion; cancelling afterwards has no effect on it.
    pub fn schedule<F>(&self, hash: &str, delay: Duration, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel(hash);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.pending.insert(hash.to_owned(), (id, token.clone()));

        let pending = Arc::clone(&self.pending);
        let owned_hash = hash.to_owned();
        let name = self.name;
        let started = spawn_detached(name, move || async move {
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            pending.remove_if(&owned_hash, |_, (entry, _)| *entry == id);
            tracing::trace!(timer = name, key = %owned_hash, "timer fired");
            work.await;
        });
        if !started {
            self.pending.remove_if(hash, |_, (entry, _)| *entry == id);
        }
    }

    /// Cancels the pending timer for `hash`, if any.
    pub fn cancel(&self, hash: &str) {
        if let Some((_, (_, token))) = self.pending.remove(hash) {
            token.cancel();
        }
    }

    #[cfg(test)]
    pub fn is_pending(&self, hash: &str) -> bool {
        self.pending.contains_key(hash)
    }
}
