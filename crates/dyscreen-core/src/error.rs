//! Error types shared across the dyscreen crates.
//!
//! `ProviderError` lives here rather than in `dyscreen-providers` so the
//! screening engine can downcast gateway failures and classify them for
//! retry decisions without string matching.

use thiserror::Error;

use crate::model::SessionId;

/// Errors that can occur when interacting with a generative AI provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The API returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication failed (invalid API key).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested model was not found.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The call succeeded but carried no text.
    #[error("response contained no text content")]
    EmptyResponse,
}

impl ProviderError {
    /// Returns `true` if this error is permanent and should not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ProviderError::AuthenticationFailed(_) | ProviderError::ModelNotFound(_)
        )
    }

    /// Returns the retry-after delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// Failures on the generation path. Never surfaced to callers: any of these
/// switches the session to a fallback battery.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The AI call could not be made, timed out, or returned no text.
    #[error("upstream AI call failed: {0}")]
    Upstream(String),

    /// The AI text did not contain a usable subtests document.
    #[error("malformed AI response: {0}")]
    MalformedResponse(String),
}

/// Persistence failures reported by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No matching row, or the row belongs to another owner.
    #[error("not found")]
    NotFound,

    /// A uniqueness constraint rejected the write.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// Stored data could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The backend failed.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Failures of the external diagnostic scorer.
#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("scorer unreachable: {0}")]
    Unreachable(String),

    #[error("scorer timed out after {0}s")]
    Timeout(u64),

    #[error("scorer returned an unusable response: {0}")]
    InvalidResponse(String),
}

/// Errors surfaced by the screening service to its HTTP/CLI callers.
#[derive(Debug, Error)]
pub enum ScreeningError {
    /// The session does not exist or is not owned by the caller.
    #[error("test session not found")]
    NotFound,

    /// The chosen battery could not be stored; the session was not started.
    #[error("failed to persist test session: {0}")]
    SessionPersist(#[source] StoreError),

    /// Grading results could not be stored for the session.
    #[error("failed to persist results for session {session_id}: {source}")]
    ResultPersist {
        session_id: SessionId,
        #[source]
        source: StoreError,
    },

    /// Any other storage failure.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ScreeningError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ScreeningError::NotFound,
            other => ScreeningError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_provider_errors() {
        assert!(ProviderError::AuthenticationFailed("bad key".into()).is_permanent());
        assert!(ProviderError::ModelNotFound("gemini-0".into()).is_permanent());
        assert!(!ProviderError::Timeout(30).is_permanent());
        assert!(!ProviderError::EmptyResponse.is_permanent());
    }

    #[test]
    fn retry_after_only_for_rate_limits() {
        let limited = ProviderError::RateLimited {
            retry_after_ms: 5000,
        };
        assert_eq!(limited.retry_after_ms(), Some(5000));
        assert_eq!(ProviderError::NetworkError("reset".into()).retry_after_ms(), None);
    }

    #[test]
    fn store_not_found_maps_to_uniform_not_found() {
        let err: ScreeningError = StoreError::NotFound.into();
        assert!(matches!(err, ScreeningError::NotFound));

        let err: ScreeningError = StoreError::Corrupt("x".into()).into();
        assert!(matches!(err, ScreeningError::Store(_)));
    }
}
