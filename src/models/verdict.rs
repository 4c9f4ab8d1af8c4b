use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use super::question::QuestionId;

/// 最终评分状态（LLM 和合并结果只会出现这三种）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeStatus {
    Correct,
    Wrong,
    Skipped,
}

impl GradeStatus {
    /// 将 LLM 返回的状态字符串归一化（大小写不敏感，支持缩写）
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "correct" | "c" | "right" | "true" => GradeStatus::Correct,
            "skipped" | "skip" | "s" | "unanswered" => GradeStatus::Skipped,
            _ => GradeStatus::Wrong,
        }
    }

    /// 每题满分 1 分
    pub fn marks(self) -> u32 {
        match self {
            GradeStatus::Correct => 1,
            GradeStatus::Wrong | GradeStatus::Skipped => 0,
        }
    }
}

impl fmt::Display for GradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GradeStatus::Correct => "correct",
            GradeStatus::Wrong => "wrong",
            GradeStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// 规则引擎的判断状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Correct,
    Wrong,
    Skipped,
    /// 规则无法确定，需要升级到 LLM
    Ambiguous,
}

impl RuleStatus {
    /// 已确定的状态；`Ambiguous` 返回 `None`
    pub fn resolved(self) -> Option<GradeStatus> {
        match self {
            RuleStatus::Correct => Some(GradeStatus::Correct),
            RuleStatus::Wrong => Some(GradeStatus::Wrong),
            RuleStatus::Skipped => Some(GradeStatus::Skipped),
            RuleStatus::Ambiguous => None,
        }
    }
}

/// 规则引擎对单个答案的判断
#[derive(Debug, Clone, PartialEq)]
pub struct RuleVerdict {
    pub question_id: QuestionId,
    pub status: RuleStatus,
    pub confidence: f64,
    pub reason: String,
}

impl RuleVerdict {
    pub fn new(
        question_id: QuestionId,
        status: RuleStatus,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            question_id,
            status,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
        }
    }

    pub fn ambiguous(question_id: QuestionId, confidence: f64, reason: impl Into<String>) -> Self {
        Self::new(question_id, RuleStatus::Ambiguous, confidence, reason)
    }

    /// 当且仅当状态为 `Ambiguous` 时需要升级
    pub fn requires_escalation(&self) -> bool {
        self.status == RuleStatus::Ambiguous
    }
}

// requiresEscalation 由状态推导，序列化时一并输出
impl Serialize for RuleVerdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RuleVerdict", 5)?;
        state.serialize_field("questionId", &self.question_id)?;
        state.serialize_field("status", &self.status)?;
        state.serialize_field("confidence", &self.confidence)?;
        state.serialize_field("reason", &self.reason)?;
        state.serialize_field("requiresEscalation", &self.requires_escalation())?;
        state.end()
    }
}

/// 发送给 LLM 的精简题目
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmQuestion {
    pub question_id: QuestionId,
    pub question: String,
    pub user_answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// LLM 对单个升级题目的判断，永远不会是 ambiguous
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelVerdict {
    pub question_id: QuestionId,
    pub status: GradeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub confidence: f64,
    /// 是否为服务不可用时的兜底结果
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

pub const UNAVAILABLE_ANSWER: &str = "Unable to evaluate";
pub const UNAVAILABLE_EXPLANATION: &str =
    "Evaluation service temporarily unavailable; manual review required";

impl ModelVerdict {
    /// 评分服务不可用时的兜底判断：记为错误，置信度 0，并标注需要人工复核
    pub fn unavailable(question_id: QuestionId, detail: Option<&str>) -> Self {
        let explanation = match detail {
            Some(d) if !d.is_empty() => format!("{} ({})", UNAVAILABLE_EXPLANATION, d),
            _ => UNAVAILABLE_EXPLANATION.to_string(),
        };
        Self {
            question_id,
            status: GradeStatus::Wrong,
            correct_answer: Some(UNAVAILABLE_ANSWER.to_string()),
            explanation: Some(explanation),
            confidence: 0.0,
            degraded: true,
        }
    }
}
