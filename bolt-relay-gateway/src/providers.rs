//! Completion provider trait for abstracting different LLM backends.

use futures::stream::BoxStream;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API error: {message}")]
    ApiError { message: String },
    #[error("No content in response")]
    NoContent,
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

/// A source of generated text, either in one piece or as fragments.
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Generate a complete reply in one call.
    async fn generate(&self, prompt: &str, system: &str) -> Result<String, ProviderError>;

    /// Generate a reply as a lazy, finite stream of fragments.
    ///
    /// `None` means the provider cannot stream; callers fall back to
    /// [`CompletionProvider::generate`].
    fn generate_streaming<'a>(
        &'a self,
        _prompt: &'a str,
        _system: &'a str,
    ) -> Option<BoxStream<'a, Result<String, ProviderError>>> {
        None
    }
}
