pub mod openai;
pub mod pipeline;
pub mod provider;

pub use openai::OpenAiProvider;
pub use provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};
