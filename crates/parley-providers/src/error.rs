//! Error type shared by all provider implementations.

use parley_core::ParleyError;

/// Failure from an external provider call.
///
/// Transient variants are safe to retry with backoff; the rest should
/// be surfaced to the caller immediately.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("Provider rate limited the request")]
    RateLimited,

    #[error("Provider call timed out after {0} ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Whether retrying the same call can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited
                | ProviderError::Timeout(_)
                | ProviderError::Network(_)
                | ProviderError::InvalidResponse(_)
        )
    }
}

impl From<ProviderError> for ParleyError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout(ms) => ParleyError::Timeout(ms),
            other => ParleyError::Generation(other.to_string()),
        }
    }
}

// ====== Tests ======
