//! Model boundary: the `LlmClient` contract and an OpenAI-compatible
//! chat-completions implementation.

mod openai;
mod types;

pub use openai::{OpenAiClient, OpenAiConfig};
pub use types::{AiError, LlmClient, ModelReply, ToolCall};
