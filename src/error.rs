//! Error types for the reqwest-proxy-guard crate.

use thiserror::Error;

/// Errors surfaced by the proxy pool and its adapters.
#[derive(Debug, Error)]
pub enum Error {
    /// The proxy vendor was unreachable or returned data we could not use.
    #[error("Failed to fetch proxies from upstream: {0}")]
    UpstreamFetch(String),

    /// The backing state store was unreachable, timed out, or replied with garbage.
    ///
    /// A write that fails this way may still have been applied.
    #[error("State store unavailable: {0}")]
    StoreUnavailable(String),

    /// No proxy is eligible under the requested strategy.
    #[error("No proxy available in pool")]
    PoolExhausted,

    /// An optimistic commit kept losing to concurrent writers.
    #[error("Gave up after {attempts} conflicting commits")]
    Contention { attempts: usize },

    #[error("Invalid proxy: {0}")]
    InvalidProxy(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for proxy pool operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the caller could reasonably back off and ask again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::PoolExhausted | Error::Contention { .. }
        )
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidProxy(err.to_string())
    }
}
