//! Window focus and reconnect notifications.
//!
//! The host application owns a [`QueryEvents`] source and calls
//! [`QueryEvents::focus`] or [`QueryEvents::reconnect`] when the corresponding
//! platform event happens. Every query built with the source re-evaluates its
//! subscribed keys against its `fetch_on_window_focus`/`fetch_on_reconnect`
//! policy.
//!
//! # Example
//!
//! ```
//! use syncwell::query::{QueryEvent, QueryEvents};
//!
//! let events = QueryEvents::new();
//! // No query is listening yet.
//! assert_eq!(events.focus(), 0);
//! assert_eq!(events.emit(QueryEvent::Reconnect), 0);
//! ```

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

/// A platform event that may trigger refetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEvent {
    WindowFocus,
    Reconnect,
}

/// Broadcast source of [`QueryEvent`]s shared by any number of queries.
#[derive(Debug, Clone)]
pub struct QueryEvents {
    sender: broadcast::Sender<QueryEvent>,
}

impl QueryEvents {
    /// Creates a new event source.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(16)
    }

    /// Creates a new event source buffering up to `capacity` unread events per
    /// listener.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Reports that the application window regained focus.
    ///
    /// Returns the number of listening queries.
    pub fn focus(&self) -> usize {
        self.emit(QueryEvent::WindowFocus)
    }

    /// Reports that network connectivity was restored.
    ///
    /// Returns the number of listening queries.
    pub fn reconnect(&self) -> usize {
        self.emit(QueryEvent::Reconnect)
    }

    pub fn emit(&self, event: QueryEvent) -> usize {
        tracing::debug!(?event, "query event");
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of queries currently listening.
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Stream of events emitted from now on. Lagged events are dropped.
    pub fn stream(&self) -> BoxStream<'static, QueryEvent> {
        BroadcastStream::new(self.sender.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }

    /// Runs `handler` for every event until it returns `false` or the returned
    /// handle is cancelled.
    pub(crate) fn listen<F>(&self, mut handler: F) -> Option<Handle>
    where
        F: FnMut(QueryEvent) -> bool + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime, query events ignored");
            return None;
        };

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let mut stream = self.stream();

        let join = runtime.spawn(async move {
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    event = stream.next() => match event {
                        Some(event) if handler(event) => {}
                        _ => break,
                    },
                }
            }
        });

        Some(Handle::new(token, join))
    }
}

impl Default for QueryEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for a running listener task.
pub(crate) struct Handle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl Handle {
    pub fn new(token: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { token, join }
    }

    /// Stops the listener.
    pub fn cancel(self) {
        self.token.cancel();
        self.join.abort();
    }
}
