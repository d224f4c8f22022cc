pub mod streaming;
pub mod types;

pub use streaming::{StreamAccumulator, StreamBox, StreamDelta};
pub use types::*;

use async_trait::async_trait;

/// Errors from a model backend, classified for the retry policy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// HTTP 429
    #[error("rate limited")]
    RateLimited,

    /// HTTP 400 family; never retried
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// HTTP 5xx
    #[error("server error: {0}")]
    ServerError(String),

    /// Connection-level failure before an HTTP status was obtained
    #[error("network error: {0}")]
    Network(String),

    /// Quota exhaustion; switches the router into fallback mode
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),
}

impl ProviderError {
    /// Whether the retry policy applies to this failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError(_) | Self::Network(_)
        )
    }
}

/// A streaming model backend.
///
/// The engine never talks HTTP itself; everything goes through this trait
/// so tests can script outcomes and production can plug in any vendor.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Open a streaming chat request.
    ///
    /// The returned stream yields incremental deltas until the backend
    /// signals end-of-turn.
    ///
    /// # Errors
    /// Returns a classified [`ProviderError`] when the request cannot be
    /// opened.
    async fn stream_chat(&self, request: ChatRequest) -> Result<StreamBox<'static>, ProviderError>;

    /// Model identifier served by this provider.
    fn model(&self) -> &str;

    /// Context window in tokens, used for the compression trigger.
    fn context_window(&self) -> u32 {
        200_000
    }
}
