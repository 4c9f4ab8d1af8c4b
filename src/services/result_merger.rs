//! 结果合并服务
//!
//! 把规则判定和 LLM 判定按原始题目顺序合并成最终结果，
//! 每道输入题目恰好产生一个 [`FinalResult`]。

use std::collections::HashMap;

use tracing::warn;

use crate::models::{
    Answer, EvaluationSummary, FinalResult, GradeStatus, GradedBy, ModelVerdict, Question,
    QuestionId, RuleVerdict,
};

/// 合并规则判定和 LLM 判定
///
/// - 规则已确定的题目直接沿用规则状态
/// - 升级题目使用 `model_verdicts` 中的结果，缺失时写入兜底结果
pub fn merge(
    rule_verdicts: &[RuleVerdict],
    mut model_verdicts: HashMap<QuestionId, ModelVerdict>,
    questions: &[Question],
    answers: &[Answer],
) -> (Vec<FinalResult>, EvaluationSummary) {
    let rules_by_id: HashMap<&QuestionId, &RuleVerdict> =
        rule_verdicts.iter().map(|v| (&v.question_id, v)).collect();
    let answers_by_id: HashMap<&QuestionId, &Answer> =
        answers.iter().map(|a| (&a.question_id, a)).collect();

    let results: Vec<FinalResult> = questions
        .iter()
        .map(|question| {
            let user_answer = answers_by_id
                .get(&question.id)
                .map(|a| a.text.clone())
                .unwrap_or_default();

            let resolved = rules_by_id
                .get(&question.id)
                .and_then(|v| v.status.resolved().map(|status| (status, *v)));

            match resolved {
                Some((status, verdict)) => from_rules(question, user_answer, status, verdict),
                None => {
                    let verdict = model_verdicts.remove(&question.id).unwrap_or_else(|| {
                        warn!("题目 {} 缺少模型结果，使用兜底结果", question.id);
                        ModelVerdict::unavailable(question.id.clone(), None)
                    });
                    from_model(question, user_answer, verdict)
                }
            }
        })
        .collect();

    let summary = EvaluationSummary::from_results(&results);
    (results, summary)
}

fn from_rules(
    question: &Question,
    user_answer: String,
    status: GradeStatus,
    verdict: &RuleVerdict,
) -> FinalResult {
    let correct_answer = match status {
        GradeStatus::Correct => None,
        GradeStatus::Wrong | GradeStatus::Skipped => question.expected_answer.clone(),
    };
    FinalResult {
        question_id: question.id.clone(),
        question: question.text.clone(),
        user_answer,
        status,
        correct_answer,
        explanation: Some(verdict.reason.clone()).filter(|r| !r.is_empty()),
        marks_awarded: status.marks(),
        graded_by: GradedBy::Rules,
    }
}

fn from_model(question: &Question, user_answer: String, verdict: ModelVerdict) -> FinalResult {
    FinalResult {
        question_id: question.id.clone(),
        question: question.text.clone(),
        user_answer,
        status: verdict.status,
        correct_answer: verdict.correct_answer,
        explanation: verdict.explanation,
        marks_awarded: verdict.status.marks(),
        graded_by: if verdict.degraded {
            GradedBy::Fallback
        } else {
            GradedBy::Model
        },
    }
}
