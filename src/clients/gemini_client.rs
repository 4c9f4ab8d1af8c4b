//! Google Gemini 客户端（`generateContent` 接口）

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{send_json, CompletionBackend, CompletionRequest};
use crate::error::{AppError, AppResult, LlmError};

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
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

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    fn request_body(request: &CompletionRequest) -> serde_json::Value {
        json!({
            "systemInstruction": { "parts": [{ "text": request.system }] },
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            }
        })
    }

    fn extract_text(model: &str, response: GenerateContentResponse) -> Result<String, LlmError> {
        response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .find(|t| !t.trim().is_empty())
            .map(|t| t.trim().to_string())
            .ok_or_else(|| LlmError::EmptyContent {
                model: model.to_string(),
            })
    }
}

#[async_trait]
impl CompletionBackend for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, model: &str, request: &CompletionRequest) -> Result<String, LlmError> {
        debug!("调用 Gemini API，模型: {}", model);

        let builder = self
            .http
            .post(self.endpoint(model))
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::request_body(request));

        let response: GenerateContentResponse = send_json(model, builder, request.timeout).await?;
        debug!("Gemini API 调用成功");
        Self::extract_text(model, response)
    }
}
