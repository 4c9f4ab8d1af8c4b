//! 批量评分处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是评分流程的入口，负责一次测评的完整调度。
//!
//! ## 核心功能
//!
//! 1. **输入校验**：题目为空、ID重复、答案重复或指向不存在的题目时直接返回错误
//! 2. **规则预检**：对每道题运行规则引擎，能确定的不再调用 LLM
//! 3. **分批升级**：其余题目按 `batch_size` 保持原顺序分批
//! 4. **并发控制**：使用 Semaphore 限制同时在途的批次数量
//! 5. **结果合并**：不论批次完成顺序，按原始题目顺序输出
//!
//! ## 取消
//!
//! 批次任务放在 `JoinSet` 中，`evaluate_assessment` 的 future 被丢弃时所有在途请求随之中止。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::clients::build_backend;
use crate::config::Config;
use crate::error::{AppResult, InputError};
use crate::models::{
    clamp_summary, Answer, EvaluationReport, GradedBy, GradingStats, ModelVerdict, Question,
    QuestionId, RuleStats,
};
use crate::services::{
    batch_check_answers, build_retriever, merge, ContextRetriever, GradingModel, LlmService,
};
use crate::utils::logging::{log_batch_complete, log_batch_start, log_rule_stats};
use crate::workflow::{BatchCtx, BatchItem, BatchOutcome, EscalationFlow};

/// 评分器
pub struct Grader {
    config: Config,
    flow: Arc<EscalationFlow>,
}

impl Grader {
    /// 使用指定的评分模型和检索器创建评分器
    pub fn new(
        config: Config,
        model: Arc<dyn GradingModel>,
        retriever: Option<Arc<dyn ContextRetriever>>,
    ) -> Self {
        let flow = Arc::new(EscalationFlow::new(model, retriever, &config));
        Self { config, flow }
    }

    /// 根据配置创建提供商后端、LLM 服务和检索器
    pub async fn from_config(config: Config) -> AppResult<Self> {
        config.validate()?;
        let backend = build_backend(&config)?;
        let service = LlmService::new(backend, &config);
        info!(
            "🤖 评分模型: {} ({})",
            config.provider,
            service.models().join(" → ")
        );

        let retriever = build_retriever(&config).await?;
        if retriever.is_none() {
            info!("📚 上下文检索已关闭");
        }

        Ok(Self::new(config, Arc::new(service), retriever))
    }

    /// 评分一次测评
    ///
    /// 只有输入错误会返回 `Err`；模型或检索失败都会转为兜底结果，
    /// 返回的报告总是覆盖每一道题。
    pub async fn evaluate_assessment(
        &self,
        questions: &[Question],
        answers: &[Answer],
        profile_summary: &str,
    ) -> AppResult<EvaluationReport> {
        validate_input(questions, answers)?;
        let profile_summary = clamp_summary(profile_summary);

        // ========== 规则预检 ==========
        let rule_verdicts = batch_check_answers(questions, answers);
        let rule_stats = RuleStats::from_verdicts(&rule_verdicts);
        log_rule_stats(&rule_stats);

        // ========== 升级题目分批 ==========
        let answers_by_id: HashMap<&QuestionId, &Answer> =
            answers.iter().map(|a| (&a.question_id, a)).collect();
        let escalated: Vec<BatchItem> = questions
            .iter()
            .zip(&rule_verdicts)
            .filter(|(_, verdict)| verdict.requires_escalation())
            .map(|(q, _)| BatchItem::new(q, answers_by_id.get(&q.id).copied()))
            .collect();

        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Vec<BatchItem>> = escalated
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        let outcomes = self.dispatch_batches(batches, &profile_summary).await;

        // ========== 合并 ==========
        let mut model_verdicts: HashMap<QuestionId, ModelVerdict> = HashMap::new();
        let mut estimated_tokens = 0;
        for outcome in &outcomes {
            estimated_tokens += outcome.estimated_tokens;
            for verdict in &outcome.verdicts {
                model_verdicts.insert(verdict.question_id.clone(), verdict.clone());
            }
        }

        let (results, summary) = merge(&rule_verdicts, model_verdicts, questions, answers);

        let count = |by: GradedBy| results.iter().filter(|r| r.graded_by == by).count();
        let stats = GradingStats {
            rule_graded: count(GradedBy::Rules),
            model_graded: count(GradedBy::Model),
            degraded: count(GradedBy::Fallback),
            batches: escalated.len().div_ceil(batch_size),
            estimated_tokens,
            ..Default::default()
        }
        .with_savings(questions.len());

        Ok(EvaluationReport {
            summary,
            results,
            rule_stats,
            stats,
            graded_at: Utc::now(),
        })
    }

    /// 并发处理所有批次，返回顺序与完成顺序一致（合并时按题目ID对齐）
    async fn dispatch_batches(
        &self,
        batches: Vec<Vec<BatchItem>>,
        profile_summary: &str,
    ) -> Vec<BatchOutcome> {
        if batches.is_empty() {
            return Vec::new();
        }

        let total_batches = batches.len();
        info!(
            "🤖 {} 道题需要 LLM 评分，分为 {} 批（最多 {} 批并发）",
            batches.iter().map(Vec::len).sum::<usize>(),
            total_batches,
            self.config.max_concurrent_batches
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_batches.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, items) in batches.into_iter().enumerate() {
            let ctx = BatchCtx::new(idx + 1, total_batches);
            let flow = Arc::clone(&self.flow);
            let semaphore = Arc::clone(&semaphore);
            let profile = profile_summary.to_string();

            tasks.spawn(async move {
                // 信号量不会被关闭，获取失败时同样继续执行
                let _permit = semaphore.acquire_owned().await.ok();
                log_batch_start(&ctx, items.len());
                flow.run(ctx, &items, &profile).await
            });
        }

        let mut outcomes = Vec::with_capacity(total_batches);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    let graded = outcome.verdicts.iter().filter(|v| !v.degraded).count();
                    log_batch_complete(&outcome.ctx, graded, outcome.verdicts.len());
                    outcomes.push(outcome);
                }
                Err(e) => {
                    // 该批题目在合并时补兜底结果
                    error!("❌ 批次任务执行失败: {}", e);
                }
            }
        }

        if outcomes.len() < total_batches {
            warn!(
                "⚠️ {} 个批次未返回结果，相关题目记为需人工复核",
                total_batches - outcomes.len()
            );
        }
        outcomes
    }
}

/// 校验输入：题目非空、题目ID唯一、每题最多一个答案、答案必须对应已有题目
fn validate_input(questions: &[Question], answers: &[Answer]) -> Result<(), InputError> {
    if questions.is_empty() {
        return Err(InputError::EmptyAssessment);
    }

    let mut question_ids = HashSet::new();
    for q in questions {
        if !question_ids.insert(&q.id) {
            return Err(InputError::DuplicateQuestionId {
                id: q.id.to_string(),
            });
        }
    }

    let mut answered = HashSet::new();
    for a in answers {
        if !question_ids.contains(&a.question_id) {
            return Err(InputError::UnknownAnswerTarget {
                id: a.question_id.to_string(),
            });
        }
        if !answered.insert(&a.question_id) {
            return Err(InputError::DuplicateAnswer {
                id: a.question_id.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_input() {
        let questions = vec![Question::new("1", "a"), Question::new("2", "b")];

        assert!(validate_input(&questions, &[Answer::new("1", "x")]).is_ok());
        assert!(matches!(
            validate_input(&[], &[]),
            Err(InputError::EmptyAssessment)
        ));
        assert!(matches!(
            validate_input(&[Question::new("1", "a"), Question::new("1", "b")], &[]),
            Err(InputError::DuplicateQuestionId { .. })
        ));
        assert!(matches!(
            validate_input(&questions, &[Answer::new("1", "x"), Answer::new("1", "y")]),
            Err(InputError::DuplicateAnswer { .. })
        ));
        assert!(matches!(
            validate_input(&questions, &[Answer::new("9", "x")]),
            Err(InputError::UnknownAnswerTarget { .. })
        ));
    }
}
