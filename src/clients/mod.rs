//! LLM 提供商客户端
//!
//! 每个提供商实现 [`CompletionBackend`]，只负责"发一次请求，拿回文本"。
//! 重试、退避和多模型回退由 `services::llm_service` 负责。

pub mod anthropic_client;
pub mod gemini_client;
pub mod openai_client;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::config::{Config, LlmProvider};
use crate::error::{AppResult, LlmError};
use crate::utils::text::truncate_with_ellipsis;

pub use anthropic_client::AnthropicClient;
pub use gemini_client::GeminiClient;
pub use openai_client::OpenAiClient;

/// 单次补全请求
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// 提供商后端
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// 提供商名称（用于日志）
    fn name(&self) -> &str;

    /// 用指定模型完成一次请求，返回去掉首尾空白的文本
    async fn complete(&self, model: &str, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// 根据配置创建提供商后端
pub fn build_backend(config: &Config) -> AppResult<Arc<dyn CompletionBackend>> {
    let api_key = config.require_api_key()?;
    let base_url = config.effective_base_url();

    let backend: Arc<dyn CompletionBackend> = match config.provider {
        LlmProvider::OpenAi | LlmProvider::Groq => Arc::new(OpenAiClient::new(
            config.provider.to_string(),
            api_key,
            &base_url,
        )),
        LlmProvider::Gemini => Arc::new(GeminiClient::new(api_key, &base_url)?),
        LlmProvider::Anthropic => Arc::new(AnthropicClient::new(api_key, &base_url)?),
    };
    Ok(backend)
}

/// 把传输层错误信息归类为限流 / 过载 / 普通失败
pub(crate) fn classify_failure(model: &str, message: impl std::fmt::Display) -> LlmError {
    let message = message.to_string();
    let lower = message.to_lowercase();
    if lower.contains("rate limit") || lower.contains("429") {
        LlmError::RateLimited {
            model: model.to_string(),
        }
    } else if lower.contains("overloaded") || lower.contains("503") {
        LlmError::Overloaded {
            model: model.to_string(),
        }
    } else {
        LlmError::RequestFailed {
            model: model.to_string(),
            message,
        }
    }
}

/// 发送 JSON 请求并解析响应体；非 2xx 状态按状态码归类
pub(crate) async fn send_json<T: DeserializeOwned>(
    model: &str,
    builder: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<T, LlmError> {
    let response = builder.timeout(timeout).send().await.map_err(|e| {
        if e.is_timeout() {
            LlmError::Timeout {
                model: model.to_string(),
                secs: timeout.as_secs(),
            }
        } else {
            classify_failure(model, e)
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!("模型 {} 返回错误状态 {}: {}", model, status, truncate_with_ellipsis(&body, 200));
        return Err(LlmError::from_status(
            model,
            status.as_u16(),
            truncate_with_ellipsis(&body, 200),
        ));
    }

    response.json::<T>().await.map_err(|e| LlmError::RequestFailed {
        model: model.to_string(),
        message: format!("响应体解析失败: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("m", "Rate limit reached for requests"),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_failure("m", "The model is overloaded"),
            LlmError::Overloaded { .. }
        ));
        let other = classify_failure("m", "invalid_api_key");
        assert!(matches!(other, LlmError::RequestFailed { .. }));
        assert!(!other.is_transient());
    }

    #[test]
    fn test_build_backend_requires_api_key() {
        let config = Config::default();
        assert!(build_backend(&config).is_err());

        let config = Config {
            api_key: "test-key".to_string(),
            provider: LlmProvider::Groq,
            ..Default::default()
        };
        let backend = build_backend(&config).unwrap();
        assert_eq!(backend.name(), "groq");
    }
}
