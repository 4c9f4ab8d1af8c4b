//! LLM 评分服务 - 业务能力层
//!
//! 只负责"把一批升级题目交给模型评分"，不关心流程和上下文检索
//!
//! ## 处理步骤
//! 1. 构建紧凑提示词（题目 80 字符、答案 100 字符、上下文 60 字符）
//! 2. 调用提供商后端，瞬时错误按 `base × 2^attempt` 退避重试
//! 3. 主模型重试耗尽后依次尝试备用模型
//! 4. 解析回复并按题目ID对齐

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::clients::{CompletionBackend, CompletionRequest};
use crate::config::Config;
use crate::error::{AppError, AppResult, LlmError};
use crate::models::{LlmQuestion, ModelVerdict};
use crate::services::response_parser::parse_evaluation_response;
use crate::utils::text::truncate_with_ellipsis;

pub const SYSTEM_PROMPT: &str = "You are a precise assessment grader. Return only valid JSON.";

const QUESTION_CHARS: usize = 80;
const ANSWER_CHARS: usize = 100;
const CONTEXT_CHARS: usize = 60;

/// 评分模型接口
///
/// 成功返回时，每道提交的题目都恰好对应一个结果，且状态只会是 correct / wrong / skipped
#[async_trait]
pub trait GradingModel: Send + Sync {
    async fn evaluate_batch(
        &self,
        questions: &[LlmQuestion],
        profile_summary: &str,
    ) -> AppResult<Vec<ModelVerdict>>;
}

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 每个模型的最大尝试次数
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// 第 `attempt` 次（从 0 开始）失败后的等待时长
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// LLM 评分服务
pub struct LlmService {
    backend: Arc<dyn CompletionBackend>,
    models: Vec<String>,
    retry: RetryPolicy,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl LlmService {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: &Config) -> Self {
        Self {
            backend,
            models: config.effective_models(),
            retry: RetryPolicy {
                max_attempts: config.max_retries.max(1),
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
            },
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// 对单个模型发起请求，瞬时错误退避重试，非瞬时错误立即返回
    async fn retry_with_backoff(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            match self.backend.complete(model, request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "⚠️ 模型 {} 第 {}/{} 次请求失败: {}，{}ms 后重试",
                        model,
                        attempt + 1,
                        self.retry.max_attempts,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn evaluate_with_model(
        &self,
        model: &str,
        request: &CompletionRequest,
        questions: &[LlmQuestion],
    ) -> AppResult<Vec<ModelVerdict>> {
        let reply = self.retry_with_backoff(model, request).await?;
        debug!("模型 {} 回复长度: {} 字符", model, reply.len());
        Ok(parse_evaluation_response(&reply, questions)?)
    }
}

#[async_trait]
impl GradingModel for LlmService {
    async fn evaluate_batch(
        &self,
        questions: &[LlmQuestion],
        profile_summary: &str,
    ) -> AppResult<Vec<ModelVerdict>> {
        if questions.is_empty() {
            return Ok(Vec::new());
        }

        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_compact_prompt(questions, profile_summary),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: self.timeout,
        };

        let mut tried = Vec::new();
        let mut last_error = String::from("未配置任何模型");

        for model in &self.models {
            match self.evaluate_with_model(model, &request, questions).await {
                Ok(verdicts) => {
                    info!(
                        "✅ {} 模型 {} 完成 {} 道题评分",
                        self.backend.name(),
                        model,
                        verdicts.len()
                    );
                    return Ok(verdicts);
                }
                Err(e) => {
                    warn!("❌ 模型 {} 评分失败: {}", model, e);
                    tried.push(model.clone());
                    last_error = e.to_string();
                }
            }
        }

        Err(AppError::Llm(LlmError::AllModelsFailed {
            tried,
            last: last_error,
        }))
    }
}

/// 构建一批题目的紧凑提示词
pub fn build_compact_prompt(questions: &[LlmQuestion], profile_summary: &str) -> String {
    let instructions = format!(
        "Grade {} answers. User: {}\n\n\
         Rules:\n\
         - Status: \"correct\", \"wrong\", or \"skipped\"\n\
         - For wrong/skipped: provide correctAnswer + explanation (max 20 words)\n\
         - JSON only, no extra text\n\n\
         Format:\n\
         [{{\"qid\":\"X\",\"status\":\"correct/wrong/skipped\",\"ans\":\"...\",\"exp\":\"...\"}}]\n\n\
         Questions:",
        questions.len(),
        profile_summary
    );

    let qa_list = questions
        .iter()
        .enumerate()
        .map(|(idx, q)| {
            let mut block = format!(
                "\nQ{} [{}]: {}\nA: {}",
                idx + 1,
                q.question_id,
                truncate_with_ellipsis(&q.question, QUESTION_CHARS),
                truncate_with_ellipsis(&q.user_answer, ANSWER_CHARS)
            );
            if let Some(ctx) = q.context.as_deref().filter(|c| !c.is_empty()) {
                block.push_str(&format!("\nCtx: {}", truncate_with_ellipsis(ctx, CONTEXT_CHARS)));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n---");

    format!("{}{}\n\nJSON response:", instructions, qa_list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GradeStatus, QuestionId};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    /// 按脚本返回结果的后端，记录每次调用的模型
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, model: &str, _request: &CompletionRequest) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(model.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Overloaded { model: model.to_string() }))
        }
    }

    fn service(backend: Arc<ScriptedBackend>, models: &[&str]) -> LlmService {
        let config = Config {
            models: models.iter().map(|m| m.to_string()).collect(),
            retry_base_delay_ms: 1,
            ..Default::default()
        };
        LlmService::new(backend, &config)
    }

    fn batch() -> Vec<LlmQuestion> {
        vec![
            LlmQuestion {
                question_id: QuestionId::new("q1"),
                question: "Explain recursion".to_string(),
                user_answer: "A function calling itself".to_string(),
                context: Some("[0.91] Recursion solves problems by self-reference".to_string()),
            },
            LlmQuestion {
                question_id: QuestionId::new("q2"),
                question: "What is a closure?".to_string(),
                user_answer: "no idea".to_string(),
                context: None,
            },
        ]
    }

    const GOOD_REPLY: &str = r#"[{"qid":"q1","status":"correct"},{"qid":"q2","status":"wrong","ans":"A function with captured scope","exp":"Missing definition"}]"#;

    fn rate_limited() -> Result<String, LlmError> {
        Err(LlmError::RateLimited { model: "m".to_string() })
    }

    #[test]
    fn test_compact_prompt_layout() {
        let mut questions = batch();
        questions[1].question = "x".repeat(200);
        let prompt = build_compact_prompt(&questions, "JS (2y)");

        assert!(prompt.starts_with("Grade 2 answers. User: JS (2y)"));
        assert!(prompt.contains("\nQ1 [q1]: Explain recursion\nA: A function calling itself\nCtx: "));
        assert!(prompt.contains("\n---\nQ2 [q2]: "));
        assert!(prompt.contains(&format!("{}...", "x".repeat(QUESTION_CHARS - 3))));
        assert!(!prompt.contains(&"x".repeat(QUESTION_CHARS)));
        assert_eq!(prompt.matches("Ctx:").count(), 1);
        assert!(prompt.ends_with("\n\nJSON response:"));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let backend = ScriptedBackend::new(vec![rate_limited(), rate_limited(), Ok(GOOD_REPLY.into())]);
        let service = service(backend.clone(), &["primary"]);

        let verdicts = assert_ok!(service.evaluate_batch(&batch(), "JS (2y)").await);
        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[0].status, GradeStatus::Correct);
        assert_eq!(verdicts[1].correct_answer.as_deref(), Some("A function with captured scope"));
        assert_eq!(backend.calls(), vec!["primary"; 3]);
    }

    #[tokio::test]
    async fn test_falls_back_after_retries_exhausted() {
        let backend = ScriptedBackend::new(vec![
            rate_limited(),
            rate_limited(),
            rate_limited(),
            Ok(GOOD_REPLY.into()),
        ]);
        let service = service(backend.clone(), &["primary", "backup"]);

        assert_ok!(service.evaluate_batch(&batch(), "").await);
        assert_eq!(backend.calls(), vec!["primary", "primary", "primary", "backup"]);
    }

    #[tokio::test]
    async fn test_non_transient_error_skips_retries() {
        let backend = ScriptedBackend::new(vec![
            Err(LlmError::BadResponse {
                model: "primary".into(),
                status: 401,
                message: "invalid api key".into(),
            }),
            Ok(GOOD_REPLY.into()),
        ]);
        let service = service(backend.clone(), &["primary", "backup"]);

        assert_ok!(service.evaluate_batch(&batch(), "").await);
        assert_eq!(backend.calls(), vec!["primary", "backup"]);
    }

    #[tokio::test]
    async fn test_unparseable_reply_moves_to_next_model() {
        let backend = ScriptedBackend::new(vec![
            Ok("Sorry, I can't help with that.".into()),
            Ok(GOOD_REPLY.into()),
        ]);
        let service = service(backend.clone(), &["primary", "backup"]);

        assert_ok!(service.evaluate_batch(&batch(), "").await);
        assert_eq!(backend.calls(), vec!["primary", "backup"]);
    }

    #[tokio::test]
    async fn test_all_models_failed() {
        let backend = ScriptedBackend::new(Vec::new());
        let service = service(backend.clone(), &["primary", "backup"]);

        let err = assert_err!(service.evaluate_batch(&batch(), "").await);
        match err {
            AppError::Llm(LlmError::AllModelsFailed { tried, .. }) => {
                assert_eq!(tried, vec!["primary".to_string(), "backup".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(backend.calls().len(), 6);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let backend = ScriptedBackend::new(Vec::new());
        let service = service(backend.clone(), &["primary"]);
        assert!(service.evaluate_batch(&[], "").await.unwrap().is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    #[ignore] // 需要网络和 API 密钥，手动运行
    async fn test_real_provider_batch() {
        let _ = tracing_subscriber::fmt::try_init();
        let config = Config::from_env();
        let backend = crate::clients::build_backend(&config).expect("需要设置 LLM_API_KEY");
        let service = LlmService::new(backend, &config);
        let verdicts = service.evaluate_batch(&batch(), "Py (1y)").await.unwrap();
        println!("{:#?}", verdicts);
        assert_eq!(verdicts.len(), 2);
    }
}
