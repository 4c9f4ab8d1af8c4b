//! 升级评分流程 - 流程层
//!
//! 核心职责：定义"一批升级题目"的完整处理流程
//!
//! 流程顺序：
//! 1. 为每道题检索上下文（失败或超时则不带上下文）
//! 2. 构建 LLM 题目并调用评分模型
//! 3. 评分失败时整批写入兜底结果（不中断整个测评）

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::models::{LlmQuestion, ModelVerdict, Question, QuestionId};
use crate::services::{build_compact_prompt, format_context, ContextRetriever, GradingModel};
use crate::utils::text::{estimate_tokens, truncate_with_ellipsis};
use crate::workflow::batch_ctx::{BatchCtx, BatchItem};

/// 一批题目的处理结果
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub ctx: BatchCtx,
    /// 与提交的题目一一对应
    pub verdicts: Vec<ModelVerdict>,
    /// 整批是否使用了兜底结果
    pub degraded: bool,
    pub estimated_tokens: usize,
}

/// 升级评分流程
///
/// - 不持有测评数据，只依赖评分模型和检索器
/// - 不关心批次之间的顺序
pub struct EscalationFlow {
    model: Arc<dyn GradingModel>,
    retriever: Option<Arc<dyn ContextRetriever>>,
    top_k: usize,
    context_max_chars: usize,
    retrieval_timeout: Duration,
}

impl EscalationFlow {
    pub fn new(
        model: Arc<dyn GradingModel>,
        retriever: Option<Arc<dyn ContextRetriever>>,
        config: &Config,
    ) -> Self {
        Self {
            model,
            retriever,
            top_k: config.top_k,
            context_max_chars: config.context_max_chars,
            retrieval_timeout: Duration::from_millis(config.retrieval_timeout_ms),
        }
    }

    pub async fn run(&self, ctx: BatchCtx, items: &[BatchItem], profile_summary: &str) -> BatchOutcome {
        let questions = self.prepare(ctx, items).await;
        let prompt_tokens = estimate_tokens(&build_compact_prompt(&questions, profile_summary));

        match self.model.evaluate_batch(&questions, profile_summary).await {
            Ok(verdicts) => {
                let reply_tokens = serde_json::to_string(&verdicts)
                    .map(|s| estimate_tokens(&s))
                    .unwrap_or_default();
                BatchOutcome {
                    ctx,
                    verdicts: align_to_questions(ctx, &questions, verdicts),
                    degraded: false,
                    estimated_tokens: prompt_tokens + reply_tokens,
                }
            }
            Err(e) => {
                error!(
                    "{} ❌ 评分失败: {}，{} 道题记为需人工复核",
                    ctx,
                    e,
                    questions.len()
                );
                let detail = truncate_with_ellipsis(&e.to_string(), 120);
                BatchOutcome {
                    ctx,
                    verdicts: questions
                        .iter()
                        .map(|q| ModelVerdict::unavailable(q.question_id.clone(), Some(detail.as_str())))
                        .collect(),
                    degraded: true,
                    estimated_tokens: prompt_tokens,
                }
            }
        }
    }

    /// 并发检索本批所有题目的上下文
    async fn prepare(&self, ctx: BatchCtx, items: &[BatchItem]) -> Vec<LlmQuestion> {
        let contexts = join_all(items.iter().map(|item| self.enrich(ctx, &item.question))).await;

        items
            .iter()
            .zip(contexts)
            .map(|(item, context)| LlmQuestion {
                question_id: item.question.id.clone(),
                question: item.question.text.clone(),
                user_answer: item.user_answer.clone(),
                context,
            })
            .collect()
    }

    async fn enrich(&self, ctx: BatchCtx, question: &Question) -> Option<String> {
        let retriever = self.retriever.as_ref()?;

        let lookup = retriever.retrieve(&question.text, self.top_k);
        match tokio::time::timeout(self.retrieval_timeout, lookup).await {
            Ok(Ok(snippets)) => {
                let context = format_context(&snippets, self.context_max_chars);
                debug!("{} 题目 {} 上下文: {} 字符", ctx, question.id, context.chars().count());
                (!context.is_empty()).then_some(context)
            }
            Ok(Err(e)) => {
                warn!("{} ⚠️ 题目 {} 上下文检索失败: {}，不带上下文继续", ctx, question.id, e);
                None
            }
            Err(_) => {
                warn!(
                    "{} ⚠️ 题目 {} 上下文检索超时 ({}ms)，不带上下文继续",
                    ctx,
                    question.id,
                    self.retrieval_timeout.as_millis()
                );
                None
            }
        }
    }
}

/// 按提交顺序整理模型结果：多余的丢弃，缺失的补兜底结果
fn align_to_questions(
    ctx: BatchCtx,
    questions: &[LlmQuestion],
    verdicts: Vec<ModelVerdict>,
) -> Vec<ModelVerdict> {
    let mut by_id: HashMap<QuestionId, ModelVerdict> = HashMap::new();
    for verdict in verdicts {
        by_id.entry(verdict.question_id.clone()).or_insert(verdict);
    }

    questions
        .iter()
        .map(|q| {
            by_id.remove(&q.question_id).unwrap_or_else(|| {
                warn!("{} 模型未返回题目 {} 的结果", ctx, q.question_id);
                ModelVerdict::unavailable(q.question_id.clone(), Some("missing from model reply"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult, LlmError, RetrievalError};
    use crate::models::GradeStatus;
    use crate::services::ScoredSnippet;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 记录收到的题目，按配置返回成功或失败
    struct RecordingModel {
        fail: bool,
        seen: Mutex<Vec<LlmQuestion>>,
    }

    #[async_trait]
    impl GradingModel for RecordingModel {
        async fn evaluate_batch(
            &self,
            questions: &[LlmQuestion],
            _profile_summary: &str,
        ) -> AppResult<Vec<ModelVerdict>> {
            self.seen.lock().unwrap().extend_from_slice(questions);
            if self.fail {
                return Err(AppError::Llm(LlmError::AllModelsFailed {
                    tried: vec!["m".into()],
                    last: "overloaded".into(),
                }));
            }
            // 故意倒序并漏掉第一题
            Ok(questions
                .iter()
                .skip(1)
                .rev()
                .map(|q| ModelVerdict {
                    question_id: q.question_id.clone(),
                    status: GradeStatus::Correct,
                    correct_answer: None,
                    explanation: None,
                    confidence: 0.9,
                    degraded: false,
                })
                .collect())
        }
    }

    struct FailingRetriever;

    #[async_trait]
    impl ContextRetriever for FailingRetriever {
        async fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<ScoredSnippet>, RetrievalError> {
            Err(RetrievalError::RequestFailed {
                endpoint: "test".into(),
                message: "connection refused".into(),
            })
        }
    }

    struct SlowRetriever;

    #[async_trait]
    impl ContextRetriever for SlowRetriever {
        async fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<ScoredSnippet>, RetrievalError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![ScoredSnippet::new("x", "late", 0.9)])
        }
    }

    struct FixedRetriever;

    #[async_trait]
    impl ContextRetriever for FixedRetriever {
        async fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<ScoredSnippet>, RetrievalError> {
            Ok(vec![ScoredSnippet::new("r1", "Recursion is self reference", 0.8)])
        }
    }

    fn items() -> Vec<BatchItem> {
        vec![
            BatchItem::new(&Question::new("a", "Explain recursion"), None),
            BatchItem::new(&Question::new("b", "Explain closures"), None),
            BatchItem::new(&Question::new("c", "Explain generics"), None),
        ]
    }

    fn flow(
        model: Arc<RecordingModel>,
        retriever: Option<Arc<dyn ContextRetriever>>,
    ) -> EscalationFlow {
        let config = Config {
            retrieval_timeout_ms: 50,
            ..Default::default()
        };
        EscalationFlow::new(model, retriever, &config)
    }

    fn model(fail: bool) -> Arc<RecordingModel> {
        Arc::new(RecordingModel {
            fail,
            seen: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_model_failure_degrades_whole_batch() {
        let flow = flow(model(true), None);
        let outcome = flow.run(BatchCtx::new(1, 1), &items(), "").await;

        assert!(outcome.degraded);
        assert_eq!(outcome.verdicts.len(), 3);
        for v in &outcome.verdicts {
            assert_eq!(v.status, GradeStatus::Wrong);
            assert!(v.explanation.as_deref().unwrap().contains("temporarily unavailable"));
        }
    }

    #[tokio::test]
    async fn test_verdicts_are_realigned_and_completed() {
        let flow = flow(model(false), None);
        let outcome = flow.run(BatchCtx::new(1, 1), &items(), "").await;

        let ids: Vec<&str> = outcome.verdicts.iter().map(|v| v.question_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(outcome.verdicts[0].degraded);
        assert_eq!(outcome.verdicts[1].status, GradeStatus::Correct);
        assert!(!outcome.degraded);
        assert!(outcome.estimated_tokens > 0);
    }

    #[tokio::test]
    async fn test_retrieval_failure_and_timeout_are_absorbed() {
        for retriever in [
            Arc::new(FailingRetriever) as Arc<dyn ContextRetriever>,
            Arc::new(SlowRetriever) as Arc<dyn ContextRetriever>,
        ] {
            let recorder = model(false);
            let flow = flow(recorder.clone(), Some(retriever));
            let outcome = flow.run(BatchCtx::new(1, 1), &items(), "").await;

            assert_eq!(outcome.verdicts.len(), 3);
            assert!(recorder.seen.lock().unwrap().iter().all(|q| q.context.is_none()));
        }
    }

    #[tokio::test]
    async fn test_context_is_attached() {
        let recorder = model(false);
        let flow = flow(recorder.clone(), Some(Arc::new(FixedRetriever)));
        flow.run(BatchCtx::new(1, 1), &items(), "").await;

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0].context.as_deref(), Some("[0.80] Recursion is self reference"));
    }
}
