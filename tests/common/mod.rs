// Shared helpers for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::FutureExt;
use syncwell::QueryError;
use syncwell::query::{Query, QueryBuilder, QueryConfig, QueryState};
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

/// Routes library logs to the test output. Set `RUST_LOG=syncwell=debug` to see
/// them.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Lets spawned tasks run, advancing the paused clock by a millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// A fake data source answering `"{key}#{call}"` after `delay`, or failing with
/// `"boom #{call}"` while switched to failure. While crashing, calls panic.
#[derive(Clone)]
pub struct Source {
    calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    crashing: Arc<AtomicBool>,
    delay: Duration,
}

impl Source {
    pub fn new(delay: Duration) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
            crashing: Arc::new(AtomicBool::new(false)),
            delay,
        }
    }

    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_crashing(&self, crashing: bool) {
        self.crashing.store(crashing, Ordering::SeqCst);
    }

    pub fn builder(&self) -> QueryBuilder<u32, String> {
        let source = self.clone();
        Query::builder(move |id: u32, _state: QueryState<u32, String>| {
            let call = source.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let failing = source.failing.load(Ordering::SeqCst);
            let crashing = source.crashing.load(Ordering::SeqCst);
            let delay = source.delay;
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if crashing {
                    panic!("data source crashed on call {call}");
                }
                if failing {
                    Err(QueryError::fetch(format!("boom #{call}")))
                } else {
                    Ok(format!("{id}#{call}"))
                }
            }
            .boxed()
        })
    }

    pub fn query(&self, config: QueryConfig) -> Query<u32, String> {
        self.builder().config(config).build()
    }
}
