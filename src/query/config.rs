use std::time::Duration;

/// When a lifecycle event (mount, window focus, reconnect) should fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchTrigger {
    /// Do nothing.
    Never,
    /// Fetch only if the data is stale.
    #[default]
    IfStale,
    /// Fetch regardless of staleness.
    Always,
}

impl From<bool> for FetchTrigger {
    fn from(enabled: bool) -> Self {
        if enabled { Self::IfStale } else { Self::Never }
    }
}

/// Configuration for query behavior.
///
/// Options that may depend on the key or on the current state can also be
/// supplied as closures on [`QueryBuilder`](crate::query::QueryBuilder); a closure
/// takes precedence over the fixed value here.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// How long data is considered fresh after a response is stored.
    pub stale_time: Duration,

    /// How long a key's state survives after its last subscriber leaves.
    ///
    /// `None` keeps the state forever.
    pub cache_time: Option<Duration>,

    /// How many times a failed fetch is retried.
    pub retry: u32,

    /// Delay before each retry.
    pub retry_delay: Duration,

    pub fetch_on_mount: FetchTrigger,

    /// `None` follows `fetch_on_mount`.
    pub fetch_on_window_focus: Option<FetchTrigger>,

    /// `None` follows `fetch_on_mount`.
    pub fetch_on_reconnect: Option<FetchTrigger>,

    /// A disabled query never fetches.
    pub enabled: bool,

    /// Show the previously bound key's data while a new key has none.
    pub keep_previous_data: bool,

    /// Poll after every successful fetch while the key has subscribers.
    pub refetch_interval: Option<Duration>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(3),
            cache_time: Some(Duration::from_secs(5 * 60)), // 5 minutes
            retry: 1,
            retry_delay: Duration::from_secs(2),
            fetch_on_mount: FetchTrigger::IfStale,
            fetch_on_window_focus: None,
            fetch_on_reconnect: None,
            enabled: true,
            keep_previous_data: false,
            refetch_interval: None,
        }
    }
}

impl QueryConfig {
    /// Creates a configuration with the given stale and cache times and
    /// defaults for everything else.
    #[must_use]
    pub fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            stale_time,
            cache_time: Some(cache_time),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    #[must_use]
    pub const fn with_cache_time(mut self, cache_time: Option<Duration>) -> Self {
        self.cache_time = cache_time;
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    #[must_use]
    pub const fn with_fetch_on_mount(mut self, trigger: FetchTrigger) -> Self {
        self.fetch_on_mount = trigger;
        self
    }

    #[must_use]
    pub const fn with_fetch_on_window_focus(mut self, trigger: FetchTrigger) -> Self {
        self.fetch_on_window_focus = Some(trigger);
        self
    }

    #[must_use]
    pub const fn with_fetch_on_reconnect(mut self, trigger: FetchTrigger) -> Self {
        self.fetch_on_reconnect = Some(trigger);
        self
    }

    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub const fn with_keep_previous_data(mut self, keep: bool) -> Self {
        self.keep_previous_data = keep;
        self
    }

    #[must_use]
    pub const fn with_refetch_interval(mut self, interval: Option<Duration>) -> Self {
        self.refetch_interval = interval;
        self
    }
}
