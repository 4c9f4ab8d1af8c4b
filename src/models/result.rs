use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::question::QuestionId;
use super::verdict::{GradeStatus, RuleStatus, RuleVerdict};
use crate::error::{AppError, AppResult};

/// 不做规则预检、逐题调用 LLM 时每题的 token 消耗估算
pub const BASELINE_TOKENS_PER_QUESTION: usize = 250;

/// 结果来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GradedBy {
    /// 规则引擎直接判定
    Rules,
    /// LLM 判定
    Model,
    /// LLM 不可用时的兜底结果
    Fallback,
}

/// 单题最终结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResult {
    pub question_id: QuestionId,
    pub question: String,
    pub user_answer: String,
    pub status: GradeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub marks_awarded: u32,
    pub graded_by: GradedBy,
}

/// 一次作答的汇总统计，每次评分重新计算
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    pub total_questions: usize,
    pub correct_count: usize,
    pub wrong_count: usize,
    pub skipped_count: usize,
    pub score: u32,
    pub max_score: u32,
}

impl EvaluationSummary {
    pub fn from_results(results: &[FinalResult]) -> Self {
        let mut summary = Self {
            total_questions: results.len(),
            max_score: results.len() as u32,
            ..Default::default()
        };
        for r in results {
            match r.status {
                GradeStatus::Correct => summary.correct_count += 1,
                GradeStatus::Wrong => summary.wrong_count += 1,
                GradeStatus::Skipped => summary.skipped_count += 1,
            }
            summary.score += r.marks_awarded;
        }
        summary
    }
}

/// 规则预检统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStats {
    pub total: usize,
    pub correct: usize,
    pub wrong: usize,
    pub skipped: usize,
    pub ambiguous: usize,
}

impl RuleStats {
    pub fn from_verdicts(verdicts: &[RuleVerdict]) -> Self {
        let mut stats = Self {
            total: verdicts.len(),
            ..Default::default()
        };
        for v in verdicts {
            match v.status {
                RuleStatus::Correct => stats.correct += 1,
                RuleStatus::Wrong => stats.wrong += 1,
                RuleStatus::Skipped => stats.skipped += 1,
                RuleStatus::Ambiguous => stats.ambiguous += 1,
            }
        }
        stats
    }

    /// 跳过 LLM 的比例（0-100）
    pub fn avoided_percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        let resolved = self.total - self.ambiguous;
        ((resolved as f64 / self.total as f64) * 100.0).round() as u32
    }
}

/// 评分过程统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingStats {
    pub rule_graded: usize,
    pub model_graded: usize,
    pub degraded: usize,
    pub batches: usize,
    pub estimated_tokens: usize,
    /// 相对基线节省的 token 数，超出基线时为负
    pub tokens_saved: i64,
    pub savings_percent: i64,
}

impl GradingStats {
    /// 按题目总数计算相对基线的节省量
    pub fn with_savings(mut self, total_questions: usize) -> Self {
        let baseline = (total_questions * BASELINE_TOKENS_PER_QUESTION) as i64;
        self.tokens_saved = baseline - self.estimated_tokens as i64;
        self.savings_percent = if baseline == 0 {
            0
        } else {
            (self.tokens_saved as f64 / baseline as f64 * 100.0).round() as i64
        };
        self
    }
}

/// 反馈条目（只包含错题和跳过的题）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackItem {
    pub question_id: QuestionId,
    pub question: String,
    pub user_answer: String,
    pub status: GradeStatus,
    pub correct_answer: String,
    pub explanation: String,
}

/// 完整的评分输出，交给调用方持久化
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    #[serde(flatten)]
    pub summary: EvaluationSummary,
    pub results: Vec<FinalResult>,
    pub rule_stats: RuleStats,
    pub stats: GradingStats,
    pub graded_at: DateTime<Utc>,
}

impl EvaluationReport {
    /// 只列出错题和跳过的题，缺失字段使用默认提示
    pub fn feedback(&self) -> Vec<FeedbackItem> {
        self.results
            .iter()
            .filter_map(|r| {
                let (answer_default, explanation_default) = match r.status {
                    GradeStatus::Correct => return None,
                    GradeStatus::Wrong => ("See explanation", "Incorrect answer"),
                    GradeStatus::Skipped => ("Answer required", "No answer provided"),
                };
                Some(FeedbackItem {
                    question_id: r.question_id.clone(),
                    question: r.question.clone(),
                    user_answer: r.user_answer.clone(),
                    status: r.status,
                    correct_answer: r
                        .correct_answer
                        .clone()
                        .unwrap_or_else(|| answer_default.to_string()),
                    explanation: r
                        .explanation
                        .clone()
                        .unwrap_or_else(|| explanation_default.to_string()),
                })
            })
            .collect()
    }

    /// 把报告连同反馈列表写成 JSON 文件
    pub async fn save(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        let file = ReportFile {
            report: self,
            feedback: self.feedback(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))
    }
}

/// 落盘格式：报告字段之外附带错题和跳过题的反馈
#[derive(Serialize)]
struct ReportFile<'a> {
    #[serde(flatten)]
    report: &'a EvaluationReport,
    feedback: Vec<FeedbackItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, status: GradeStatus) -> FinalResult {
        FinalResult {
            question_id: QuestionId::new(id),
            question: format!("q{}", id),
            user_answer: String::new(),
            status,
            correct_answer: None,
            explanation: None,
            marks_awarded: status.marks(),
            graded_by: GradedBy::Rules,
        }
    }

    #[test]
    fn test_summary_counts_are_consistent() {
        let results = vec![
            result("1", GradeStatus::Correct),
            result("2", GradeStatus::Wrong),
            result("3", GradeStatus::Skipped),
            result("4", GradeStatus::Correct),
        ];
        let summary = EvaluationSummary::from_results(&results);
        assert_eq!(summary.total_questions, 4);
        assert_eq!(summary.correct_count, 2);
        assert_eq!(
            summary.correct_count + summary.wrong_count + summary.skipped_count,
            summary.total_questions
        );
        assert_eq!(summary.score, 2);
        assert_eq!(summary.max_score, 4);
    }

    #[test]
    fn test_feedback_skips_correct_and_fills_defaults() {
        let report = EvaluationReport {
            summary: EvaluationSummary::default(),
            results: vec![
                result("1", GradeStatus::Correct),
                result("2", GradeStatus::Wrong),
                result("3", GradeStatus::Skipped),
            ],
            rule_stats: RuleStats::default(),
            stats: GradingStats::default(),
            graded_at: Utc::now(),
        };
        let feedback = report.feedback();
        assert_eq!(feedback.len(), 2);
        assert_eq!(feedback[0].correct_answer, "See explanation");
        assert_eq!(feedback[1].explanation, "No answer provided");
    }

    #[test]
    fn test_token_savings_against_baseline() {
        let stats = GradingStats {
            estimated_tokens: 500,
            ..Default::default()
        }
        .with_savings(10);
        assert_eq!(stats.tokens_saved, 2000);
        assert_eq!(stats.savings_percent, 80);

        let over = GradingStats {
            estimated_tokens: 300,
            ..Default::default()
        }
        .with_savings(1);
        assert_eq!(over.tokens_saved, -50);
        assert_eq!(over.savings_percent, -20);

        assert_eq!(GradingStats::default().with_savings(0).savings_percent, 0);
    }

    #[tokio::test]
    async fn test_save_writes_feedback_section() {
        let report = EvaluationReport {
            summary: EvaluationSummary::default(),
            results: vec![
                result("1", GradeStatus::Correct),
                result("2", GradeStatus::Skipped),
            ],
            rule_stats: RuleStats::default(),
            stats: GradingStats::default(),
            graded_at: Utc::now(),
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.save(&path).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["results"].as_array().unwrap().len(), 2);
        assert_eq!(written["feedback"].as_array().unwrap().len(), 1);
        assert_eq!(written["feedback"][0]["correctAnswer"], "Answer required");
        assert!(written["stats"].get("tokensSaved").is_some());
    }

    #[tokio::test]
    async fn test_save_reports_write_failure() {
        let report = EvaluationReport {
            summary: EvaluationSummary::default(),
            results: Vec::new(),
            rule_stats: RuleStats::default(),
            stats: GradingStats::default(),
            graded_at: Utc::now(),
        };
        let err = report.save("/nonexistent/dir/report.json").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::File(crate::error::FileError::WriteFailed { .. })
        ));
    }

    #[test]
    fn test_avoided_percent() {
        let stats = RuleStats {
            total: 10,
            ambiguous: 3,
            ..Default::default()
        };
        assert_eq!(stats.avoided_percent(), 70);
        assert_eq!(RuleStats::default().avoided_percent(), 0);
    }
}
