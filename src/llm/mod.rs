pub mod openai;

use async_trait::async_trait;

use crate::errors::AppError;

pub use openai::OpenAiCompatClient;

/// A chat prompt: fixed system instruction plus the request-specific body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Abstraction over the external language model.
/// Implementations: `OpenAiCompatClient` (HTTP); tests use scripted mocks.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run one completion and return the raw assistant text.
    ///
    /// Transport failures and non-2xx responses map to `AppError::Upstream`.
    async fn complete(&self, prompt: &Prompt, model: &str) -> Result<String, AppError>;
}
