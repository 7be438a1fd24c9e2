//! Provider gateway for chat completions.

pub mod error;
pub mod openrouter;
pub mod types;

pub use error::{ErrorContext, ProviderError};
pub use openrouter::OpenRouterAdapter;
pub use types::*;

/// One outbound completion call. Implementations may fail; they never
/// interpret the response body.
#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}
