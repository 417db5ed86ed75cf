//! Provider error types.
//!
//! Error classification is the adapter's responsibility: callers only ever
//! ask `is_retryable()` and whether the governor should be notified.

use thiserror::Error;

/// Errors returned by provider adapters.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider rejected the send for volume reasons. Retryable, and
    /// the governor should tighten the number's state.
    #[error("Rate limited by provider{}", retry_after_secs.map(|s| format!(": retry after {s}s")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// The recipient cannot receive messages (bad number, no WhatsApp
    /// account, messaging window closed). Terminal for this message.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Credentials rejected. A tenant configuration problem, not retryable.
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// Connection-level failure before or during the request. Retryable.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// The bounded request timed out. Retryable.
    #[error("Provider request timed out")]
    Timeout,

    /// This backend cannot answer status lookups by client reference.
    #[error("Provider does not support status lookup by client reference")]
    StatusLookupUnsupported,

    /// Any other API-level rejection, classified by HTTP status.
    #[error("Provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The provider answered with a body we could not understand.
    #[error("Malformed provider response: {0}")]
    Payload(String),
}

impl ProviderError {
    /// Whether the failed operation may be retried later.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::TransientNetwork(_)
            | ProviderError::Timeout => true,
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::InvalidRecipient(_)
            | ProviderError::AuthFailure(_)
            | ProviderError::StatusLookupUnsupported
            | ProviderError::Payload(_) => false,
        }
    }

    /// Whether the governor should record a reputation hit for this error.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Payload(err.to_string())
        } else {
            ProviderError::TransientNetwork(err.to_string())
        }
    }
}
