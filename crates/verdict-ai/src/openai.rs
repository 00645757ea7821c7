use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{AiError, LlmClient, ModelReply, ToolCall};

#[derive(Debug, Clone)]
/// Connection settings for an OpenAI-compatible endpoint (OpenAI, vLLM,
/// Ollama, ...). Built once at the CLI boundary and passed down; the core
/// never reads the environment.
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout_ms: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            request_timeout_ms: 120_000,
            max_tokens: 1_000,
            temperature: 0.1,
        }
    }
}

#[derive(Debug)]
pub struct OpenAiClient {
    client: reqwest::blocking::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, AiError> {
        if config.api_key.trim().is_empty() {
            return Err(AiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| AiError::InvalidResponse(format!("invalid API key header: {e}")))?,
        );

        let client = reqwest::blocking::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }

        format!("{base}/chat/completions")
    }
}

impl LlmClient for OpenAiClient {
    fn complete(&self, prompt: &str, tools: &[Value]) -> Result<ModelReply, AiError> {
        let body = build_request_body(&self.config, prompt, tools);
        let response = self.client.post(self.chat_completions_url()).json(&body).send()?;
        let status = response.status();
        let raw = response.text()?;
        if !status.is_success() {
            return Err(AiError::HttpStatus {
                status: status.as_u16(),
                body: raw,
            });
        }
        parse_chat_response(&raw)
    }
}

fn build_request_body(config: &OpenAiConfig, prompt: &str, tools: &[Value]) -> Value {
    let mut body = json!({
        "model": config.model,
        "messages": [{"role": "user", "content": prompt}],
        "max_tokens": config.max_tokens,
        "temperature": config.temperature,
    });

    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.to_vec());
        body["tool_choice"] = json!("auto");
    }

    body
}

fn parse_chat_response(raw: &str) -> Result<ModelReply, AiError> {
    let parsed: OpenAiChatResponse = serde_json::from_str(raw)?;
    let choice =
        parsed.choices.into_iter().next().ok_or_else(|| {
            AiError::InvalidResponse("response contained no choices".to_string())
        })?;

    let content = match choice.message.content {
        Some(Value::String(text)) => text,
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };

    let mut tool_calls = Vec::new();
    if let Some(calls) = choice.message.tool_calls {
        for call in calls {
            if call.call_type != "function" {
                continue;
            }
            // Providers send arguments as a JSON-encoded string; keep the raw
            // string when it fails to parse so the caller still sees it.
            let arguments = match serde_json::from_str::<Value>(&call.function.arguments) {
                Ok(value) => value,
                Err(_) => Value::String(call.function.arguments),
            };
            tool_calls.push(ToolCall {
                name: call.function.name,
                arguments,
            });
        }
    }

    Ok(ModelReply {
        content,
        tool_calls,
    })
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<Value>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}
