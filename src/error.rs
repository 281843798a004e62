use thiserror::Error;

/// Error type for query and mutation operations.
///
/// Data sources report failures with [`QueryError::FetchError`] or
/// [`QueryError::NetworkError`]. Failures are never returned from
/// `fetch`/`force_fetch`/`fetch_next_page`; they are written into the query state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Fetch failed: {0}")]
    FetchError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    /// A blocking read found no data because the fetch never ran
    /// (query disabled or cancelled by `on_before_fetch`).
    #[error("Fetch skipped for key {0}")]
    Skipped(String),
}

impl QueryError {
    /// Shorthand for [`QueryError::FetchError`] from anything displayable.
    pub fn fetch(message: impl std::fmt::Display) -> Self {
        Self::FetchError(message.to_string())
    }
}
