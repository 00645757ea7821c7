use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One tool invocation chosen by the model.
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default)]
/// What the model produced for one prompt: free text plus zero or more tool
/// calls.
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Error)]
pub enum AiError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A black box that turns a prompt (and optionally a tool schema in the
/// model function-calling format) into a reply. Implementations do not
/// retry; a failed call is the case's failure.
pub trait LlmClient {
    fn complete(&self, prompt: &str, tools: &[Value]) -> Result<ModelReply, AiError>;
}
