//! LLM 响应解析
//!
//! 依次尝试以下策略，第一个得到 JSON 数组的策略生效：
//! 1. 直接解析
//! 2. 去掉 markdown 代码块后解析
//! 3. 正则提取对象数组 `[{...}]`
//! 4. 截取第一个 `[` 到最后一个 `]`
//! 5. 逐个扫描含题目ID字段的 `{...}` 对象并组装成数组

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::models::{GradeStatus, LlmQuestion, ModelVerdict, QuestionId};
use crate::utils::text::truncate_with_ellipsis;

/// LLM 未给出置信度时使用的默认值
const DEFAULT_MODEL_CONFIDENCE: f64 = 0.85;

/// 可以携带题目ID的字段名
const ID_FIELDS: [&str; 4] = ["qid", "questionId", "question_id", "id"];

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("valid fence regex"));

static OBJECT_ARRAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[\s*\{.*\}\s*\]").expect("valid array regex"));

static FLAT_OBJECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{[^{}]*\}").expect("valid object regex"));

type Strategy = fn(&str) -> Option<Vec<Value>>;

const STRATEGIES: [(&str, Strategy); 5] = [
    ("direct", parse_direct),
    ("code_fence", parse_code_fence),
    ("object_array", parse_object_array),
    ("bracket_span", parse_bracket_span),
    ("object_scan", parse_object_scan),
];

/// 把 LLM 的文本回复解析成 JSON 数组
pub fn extract_json_array(response: &str) -> Result<Vec<Value>, ParseError> {
    for (name, strategy) in STRATEGIES.iter() {
        if let Some(items) = strategy(response) {
            debug!("响应解析成功，策略: {}，条目数: {}", name, items.len());
            return Ok(items);
        }
    }
    Err(ParseError::NoJsonArray {
        preview: truncate_with_ellipsis(response.trim(), 120),
    })
}

/// 解析回复并按题目ID对齐到提交的题目；每道提交的题目都会得到一个结果
pub fn parse_evaluation_response(
    response: &str,
    questions: &[LlmQuestion],
) -> Result<Vec<ModelVerdict>, ParseError> {
    let items = extract_json_array(response)?;

    let index_of: HashMap<&QuestionId, usize> = questions
        .iter()
        .enumerate()
        .map(|(i, q)| (&q.question_id, i))
        .collect();
    let mut slots: Vec<Option<ModelVerdict>> = vec![None; questions.len()];

    for (position, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let slot = match item_question_id(obj) {
            Some(id) => match index_of.get(&id) {
                Some(&i) => i,
                None => {
                    warn!("LLM 返回了未提交的题目ID: {}，已忽略", id);
                    continue;
                }
            },
            // 没有ID字段时按位置对应
            None if position < questions.len() => position,
            None => continue,
        };
        if slots[slot].is_some() {
            warn!("LLM 对题目 {} 返回了重复结果，保留第一条", questions[slot].question_id);
            continue;
        }
        slots[slot] = Some(item_to_verdict(obj, questions[slot].question_id.clone()));
    }

    let matched = slots.iter().filter(|s| s.is_some()).count();
    if matched == 0 {
        return Err(ParseError::NoMatchingVerdicts { items: items.len() });
    }

    Ok(slots
        .into_iter()
        .zip(questions)
        .map(|(slot, q)| {
            slot.unwrap_or_else(|| {
                warn!("LLM 回复中缺少题目 {}，标记为需人工复核", q.question_id);
                ModelVerdict::unavailable(q.question_id.clone(), Some("missing from model reply"))
            })
        })
        .collect())
}

// ========== 解析策略 ==========

fn parse_direct(text: &str) -> Option<Vec<Value>> {
    as_array(serde_json::from_str(text.trim()).ok()?)
}

fn parse_code_fence(text: &str) -> Option<Vec<Value>> {
    let inner = FENCE_RE.captures(text)?.get(1)?.as_str();
    as_array(serde_json::from_str(inner).ok()?)
}

fn parse_object_array(text: &str) -> Option<Vec<Value>> {
    let span = OBJECT_ARRAY_RE.find(text)?.as_str();
    as_array(serde_json::from_str(span).ok()?)
}

fn parse_bracket_span(text: &str) -> Option<Vec<Value>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    as_array(serde_json::from_str(&text[start..=end]).ok()?)
}

fn parse_object_scan(text: &str) -> Option<Vec<Value>> {
    let items: Vec<Value> = FLAT_OBJECT_RE
        .find_iter(text)
        .filter_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .filter(|v| {
            v.as_object()
                .is_some_and(|obj| ID_FIELDS.iter().any(|f| obj.contains_key(*f)))
        })
        .collect();
    (!items.is_empty()).then_some(items)
}

/// 只接受非空数组；单个对象也视为只有一条的数组
fn as_array(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) if !items.is_empty() => Some(items),
        Value::Object(_) => Some(vec![value]),
        _ => None,
    }
}

// ========== 字段映射 ==========

fn item_question_id(obj: &serde_json::Map<String, Value>) -> Option<QuestionId> {
    ID_FIELDS.iter().find_map(|field| match obj.get(*field)? {
        Value::String(s) => Some(QuestionId::new(s.trim())),
        Value::Number(n) => Some(QuestionId::new(n.to_string())),
        _ => None,
    })
}

fn item_to_verdict(obj: &serde_json::Map<String, Value>, question_id: QuestionId) -> ModelVerdict {
    let text_field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let status = obj
        .get("status")
        .and_then(Value::as_str)
        .map(GradeStatus::normalize)
        .unwrap_or(GradeStatus::Wrong);

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_MODEL_CONFIDENCE);

    ModelVerdict {
        question_id,
        status,
        correct_answer: text_field(&["ans", "correctAnswer", "correct_answer"]),
        explanation: text_field(&["exp", "explanation"]),
        confidence,
        degraded: false,
    }
}
