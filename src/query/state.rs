use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::QueryError;

/// Bounds for a pagination cursor.
pub trait PageParam: Clone + PartialEq + Send + Sync + 'static {}

impl<T> PageParam for T where T: Clone + PartialEq + Send + Sync + 'static {}

/// Data status of a query. Unrelated to network activity, see
/// [`QueryState::is_waiting`] for that.
#[derive(Debug)]
pub enum QueryStatus<R, D> {
    /// No data and no error yet.
    Loading,
    /// Data is available.
    Success {
        /// Value derived from the response(s) by `select`.
        data: Arc<D>,
        /// Raw value of the last page fetched.
        response: Arc<R>,
        /// When the response was stored. `None` marks the data stale.
        response_updated_at: Option<Instant>,
    },
    /// The fetch failed before any data was observed.
    Error,
}

impl<R, D> Clone for QueryStatus<R, D> {
    fn clone(&self) -> Self {
        match self {
            Self::Loading => Self::Loading,
            Self::Success {
                data,
                response,
                response_updated_at,
            } => Self::Success {
                data: Arc::clone(data),
                response: Arc::clone(response),
                response_updated_at: *response_updated_at,
            },
            Self::Error => Self::Error,
        }
    }
}

// Payloads compare by identity; a new fetch always produces new allocations.
impl<R, D> PartialEq for QueryStatus<R, D> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Loading, Self::Loading) | (Self::Error, Self::Error) => true,
            (
                Self::Success {
                    data: a,
                    response: ra,
                    response_updated_at: ta,
                },
                Self::Success {
                    data: b,
                    response: rb,
                    response_updated_at: tb,
                },
            ) => Arc::ptr_eq(a, b) && Arc::ptr_eq(ra, rb) && ta == tb,
            _ => false,
        }
    }
}

/// Per-key state of a query.
#[derive(Debug)]
pub struct QueryState<K, R, D = R, P = ()> {
    pub key: K,
    pub key_hash: String,
    pub status: QueryStatus<R, D>,
    /// A primary fetch is in flight.
    pub is_waiting: bool,
    /// A next-page fetch is in flight.
    pub is_waiting_next_page: bool,
    /// A fetch is in flight while data is already present.
    pub is_refetching: bool,
    /// The last fetch failed after data had been observed; data is kept.
    pub is_refetch_error: bool,
    /// Data was carried over from the previously bound key.
    pub is_previous_data: bool,
    pub is_optimistic_data: bool,
    pub error: Option<Arc<QueryError>>,
    pub error_updated_at: Option<Instant>,
    pub retry_count: u32,
    pub is_going_to_retry: bool,
    /// Cursor for the next page.
    pub page_param: Option<P>,
    /// Every cursor used so far; the first entry is the initial cursor.
    pub page_params: Vec<Option<P>>,
    pub has_next_page: bool,
    pub retry_next_page_count: u32,
    pub is_going_to_retry_next_page: bool,
}

impl<K, R, D, P> QueryState<K, R, D, P> {
    /// The loading state a key starts in, and returns to on reset.
    pub fn initial(key: K, key_hash: String) -> Self {
        Self {
            key,
            key_hash,
            status: QueryStatus::Loading,
            is_waiting: false,
            is_waiting_next_page: false,
            is_refetching: false,
            is_refetch_error: false,
            is_previous_data: false,
            is_optimistic_data: false,
            error: None,
            error_updated_at: None,
            retry_count: 0,
            is_going_to_retry: false,
            page_param: None,
            page_params: vec![None],
            has_next_page: false,
            retry_next_page_count: 0,
            is_going_to_retry_next_page: false,
        }
    }

    /// Returns `true` if the query has no data and no error.
    pub const fn is_loading(&self) -> bool {
        matches!(self.status, QueryStatus::Loading)
    }

    /// Returns `true` if the query has data.
    pub const fn is_success(&self) -> bool {
        matches!(self.status, QueryStatus::Success { .. })
    }

    /// Returns `true` if the query failed before any data was observed.
    pub const fn is_error(&self) -> bool {
        matches!(self.status, QueryStatus::Error)
    }

    /// Returns the data if the query has any.
    pub fn data(&self) -> Option<&D> {
        self.shared_data().map(Arc::as_ref)
    }

    /// Returns the shared handle to the data.
    pub fn shared_data(&self) -> Option<&Arc<D>> {
        match &self.status {
            QueryStatus::Success { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Returns the raw response of the last page.
    pub fn response(&self) -> Option<&R> {
        match &self.status {
            QueryStatus::Success { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn response_updated_at(&self) -> Option<Instant> {
        match &self.status {
            QueryStatus::Success {
                response_updated_at,
                ..
            } => *response_updated_at,
            _ => None,
        }
    }

    /// Returns `true` once `stale_time` has elapsed since the last response,
    /// or if there is none.
    pub fn is_stale(&self, stale_time: Duration, now: Instant) -> bool {
        self.response_updated_at()
            .is_none_or(|updated_at| now > updated_at + stale_time)
    }

    pub(crate) fn mark_stale(&mut self) {
        if let QueryStatus::Success {
            response_updated_at,
            ..
        } = &mut self.status
        {
            *response_updated_at = None;
        }
    }
}

impl<K: Clone, R, D, P> QueryState<K, R, D, P> {
    /// Restores the initial loading state, keeping the key.
    pub fn reset(&mut self) {
        let key_hash = std::mem::take(&mut self.key_hash);
        *self = Self::initial(self.key.clone(), key_hash);
    }
}

impl<K, R, D, P> Clone for QueryState<K, R, D, P>
where
    K: Clone,
    P: Clone,
{
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            key_hash: self.key_hash.clone(),
            status: self.status.clone(),
            is_waiting: self.is_waiting,
            is_waiting_next_page: self.is_waiting_next_page,
            is_refetching: self.is_refetching,
            is_refetch_error: self.is_refetch_error,
            is_previous_data: self.is_previous_data,
            is_optimistic_data: self.is_optimistic_data,
            error: self.error.clone(),
            error_updated_at: self.error_updated_at,
            retry_count: self.retry_count,
            is_going_to_retry: self.is_going_to_retry,
            page_param: self.page_param.clone(),
            page_params: self.page_params.clone(),
            has_next_page: self.has_next_page,
            retry_next_page_count: self.retry_next_page_count,
            is_going_to_retry_next_page: self.is_going_to_retry_next_page,
        }
    }
}

impl<K, R, D, P> PartialEq for QueryState<K, R, D, P>
where
    P: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        let same_error = match (&self.error, &other.error) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        self.key_hash == other.key_hash
            && self.status == other.status
            && same_error
            && self.is_waiting == other.is_waiting
            && self.is_waiting_next_page == other.is_waiting_next_page
            && self.is_refetching == other.is_refetching
            && self.is_refetch_error == other.is_refetch_error
            && self.is_previous_data == other.is_previous_data
            && self.is_optimistic_data == other.is_optimistic_data
            && self.error_updated_at == other.error_updated_at
            && self.retry_count == other.retry_count
            && self.is_going_to_retry == other.is_going_to_retry
            && self.page_param == other.page_param
            && self.page_params == other.page_params
            && self.has_next_page == other.has_next_page
            && self.retry_next_page_count == other.retry_next_page_count
            && self.is_going_to_retry_next_page == other.is_going_to_retry_next_page
    }
}

impl<R, D> fmt::Display for QueryStatus<R, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => f.write_str("loading"),
            Self::Success { .. } => f.write_str("success"),
            Self::Error => f.write_str("error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type State = QueryState<u32, String, usize, u32>;

    fn success(response: &str, at: Option<Instant>) -> State {
        let mut state = State::initial(1, "1".to_string());
        state.status = QueryStatus::Success {
            data: Arc::new(response.len()),
            response: Arc::new(response.to_string()),
            response_updated_at: at,
        };
        state
    }

    #[test]
    fn test_initial_state() {
        let state = State::initial(1, "1".to_string());
        assert!(state.is_loading());
        assert!(!state.is_waiting);
        assert_eq!(state.page_params, vec![None]);
        assert!(state.data().is_none());
        assert_eq!(state.status.to_string(), "loading");
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness() {
        let now = Instant::now();
        let state = success("abc", Some(now));
        let stale_time = Duration::from_secs(3);

        assert!(!state.is_stale(stale_time, now + Duration::from_secs(1)));
        assert!(state.is_stale(stale_time, now + Duration::from_millis(3100)));
        assert!(success("abc", None).is_stale(stale_time, now));
        assert!(State::initial(1, "1".into()).is_stale(stale_time, now));
    }

    #[test]
    fn test_mark_stale_keeps_data() {
        let mut state = success("abc", Some(Instant::now()));
        state.mark_stale();
        assert_eq!(state.data(), Some(&3));
        assert!(state.response_updated_at().is_none());
    }

    #[test]
    fn test_equality_is_by_identity() {
        let a = success("abc", None);
        let b = success("abc", None);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_reset_keeps_key() {
        let mut state = success("abc", None);
        state.retry_count = 2;
        state.page_params.push(Some(2));
        state.reset();
        assert_eq!(state, State::initial(1, "1".to_string()));
    }
}
