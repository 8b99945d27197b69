//! Relay error types.

use thiserror::Error;

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Error type for relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or unusable tenant route, or an invalid caller precondition.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network error, timeout or 5xx response.
    #[error("Transient delivery failure: {0}")]
    TransientDelivery(String),

    /// The tenant answered with a non-2xx, non-5xx status.
    #[error("Permanent delivery failure: HTTP {status_code}")]
    PermanentDelivery { status_code: u16 },

    /// Transient failures outlasted the attempt budget.
    #[error("Retries exhausted after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },

    /// A delivery record could not be persisted.
    #[error("Audit error: {0}")]
    Audit(String),

    /// Subscription handshake mismatch.
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Tenant store lookup failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Inbound rate limit exceeded.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Invalid payload.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::InvalidPayload(err.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            RelayError::TransientDelivery(err.to_string())
        } else {
            RelayError::Http(err.to_string())
        }
    }
}
