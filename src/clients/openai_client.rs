//! OpenAI 兼容接口客户端
//!
//! 使用 `async-openai`，OpenAI 官方接口和 Groq 共用（只是 API 地址不同）

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{classify_failure, CompletionBackend, CompletionRequest};
use crate::error::LlmError;

pub struct OpenAiClient {
    name: String,
    client: Client<OpenAIConfig>,
}

impl OpenAiClient {
    pub fn new(name: impl Into<String>, api_key: &str, api_base_url: &str) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base_url);

        Self {
            name: name.into(),
            client: Client::with_config(openai_config),
        }
    }

    fn build_messages(
        model: &str,
        request: &CompletionRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let invalid = |e: async_openai::error::OpenAIError| LlmError::RequestFailed {
            model: model.to_string(),
            message: format!("构建请求失败: {}", e),
        };

        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(request.system.as_str())
            .build()
            .map_err(invalid)?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(request.prompt.as_str())
            .build()
            .map_err(invalid)?;

        Ok(vec![
            ChatCompletionRequestMessage::System(system),
            ChatCompletionRequestMessage::User(user),
        ])
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, model: &str, request: &CompletionRequest) -> Result<String, LlmError> {
        debug!("调用 {} API，模型: {}", self.name, model);
        debug!("用户消息长度: {} 字符", request.prompt.len());

        let messages = Self::build_messages(model, request)?;
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                model: model.to_string(),
                message: format!("构建请求失败: {}", e),
            })?;

        let response = tokio::time::timeout(request.timeout, self.client.chat().create(chat_request))
            .await
            .map_err(|_| LlmError::Timeout {
                model: model.to_string(),
                secs: request.timeout.as_secs(),
            })?
            .map_err(|e| {
                warn!("{} API 调用失败: {}", self.name, e);
                classify_failure(model, e)
            })?;

        debug!("{} API 调用成功", self.name);

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::EmptyContent {
                model: model.to_string(),
            })?;

        Ok(content.trim().to_string())
    }
}
