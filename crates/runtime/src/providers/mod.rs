//! LLM provider adapters.
//!
//! Each provider implements the backend trait for its specific API.

mod anthropic;
mod openai;

pub use anthropic::{AnthropicAuth, AnthropicBackend, AnthropicBackendBuilder};
pub use openai::OpenAiBackend;

use crate::model::{Backend, ModelError, ModelRequest, ModelResponse};

/// A backend chosen at runtime.
pub enum Provider {
    Anthropic(AnthropicBackend),
    OpenAi(OpenAiBackend),
}

impl From<AnthropicBackend> for Provider {
    fn from(backend: AnthropicBackend) -> Self {
        Self::Anthropic(backend)
    }
}

impl From<OpenAiBackend> for Provider {
    fn from(backend: OpenAiBackend) -> Self {
        Self::OpenAi(backend)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic(backend) => write!(f, "{backend}"),
            Self::OpenAi(backend) => write!(f, "{backend}"),
        }
    }
}

impl Backend for Provider {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        match self {
            Self::Anthropic(backend) => backend.call(request).await,
            Self::OpenAi(backend) => backend.call(request).await,
        }
    }
}
