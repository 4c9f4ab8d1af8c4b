//! Anthropic Messages API 客户端

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{send_json, CompletionBackend, CompletionRequest};
use crate::error::{AppError, AppResult, LlmError};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, base_url: &str) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Other(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_body(model: &str, request: &CompletionRequest) -> serde_json::Value {
        json!({
            "model": model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system,
            "messages": [{ "role": "user", "content": request.prompt }],
        })
    }

    fn extract_text(model: &str, response: MessagesResponse) -> Result<String, LlmError> {
        let text: String = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect();
        if text.trim().is_empty() {
            return Err(LlmError::EmptyContent {
                model: model.to_string(),
            });
        }
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl CompletionBackend for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, model: &str, request: &CompletionRequest) -> Result<String, LlmError> {
        debug!("调用 Anthropic API，模型: {}", model);

        let builder = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Self::request_body(model, request));

        let response: MessagesResponse = send_json(model, builder, request.timeout).await?;
        debug!("Anthropic API 调用成功");
        Self::extract_text(model, response)
    }
}
