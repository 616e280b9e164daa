//! Chat-completion transport used by the LLM judge.

pub mod error;
pub mod openrouter;
pub mod types;

pub use error::{ErrorContext, ProviderError};
pub use openrouter::OpenRouterAdapter;
pub use types::*;

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}
