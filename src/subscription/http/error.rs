use thiserror::Error;

/// Error type for requests issued through the cache.
///
/// Errors are stored on cache entries and handed to every subscriber, so the
/// type is `Clone` and carries owned messages rather than source errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// No response was received.
    #[error("Network error: {message}")]
    Network { message: String },

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Still unauthorized after a token refresh, or the refresh itself failed.
    #[error("Unauthorized: {message}")]
    Auth { message: String },

    /// The request did not complete within the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// The response body could not be decoded into the endpoint's output type.
    #[error("Failed to decode response: {message}")]
    Decode { message: String },

    /// The arguments could not be serialized into a cache key or request.
    #[error("Invalid arguments: {message}")]
    InvalidArguments { message: String },

    /// The cache was used outside a Tokio runtime, so no fetch could run.
    #[error("No Tokio runtime is running")]
    NoRuntime,
}

impl RequestError {
    pub(crate) fn network(err: impl ToString) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }

    pub(crate) fn decode(err: impl ToString) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }

    pub(crate) fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Returns the HTTP status if the server responded.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` for the 401 that triggers a token refresh.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Http { status: 401, .. })
    }

    /// Returns `true` for failures an idempotent read may be retried on.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout => true,
            Self::Http { status, .. } => matches!(*status, 429 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Returns `true` if previously cached data must not outlive this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}
