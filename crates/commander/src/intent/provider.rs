//! Provider trait for the LLM intent-recognition collaborator

use async_trait::async_trait;

/// Error type for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Provider not available: {0}")]
    NotAvailable(String),
}

/// LLM that turns a prompt pair into JSON text describing the intended tool call
#[async_trait]
pub trait IntentService: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Return the raw JSON text produced for the prompts
    async fn recognize(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, ProviderError>;
}
