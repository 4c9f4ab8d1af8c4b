//! 规则预检 - 业务能力层
//!
//! 在调用 LLM 之前用确定性规则判断答案，只有规则无法确定的题目才会升级。
//!
//! 规则按顺序执行，第一个提交结果的规则生效：
//! 1. 空答案 → skipped
//! 2. 与标准答案完全一致（忽略大小写和标点）→ correct
//! 3. 数值题：容差比较或区间判断
//! 4. 判断题：肯定/否定关键词
//! 5. 关键词覆盖率
//! 6. 模式识别：复杂度记号 `O(...)`、代码片段（强制升级）
//! 7. 过短答案 → wrong
//! 8. 默认 → ambiguous
//!
//! 每条规则只有在自身置信度达到阈值时才提交，否则交给下一条规则。
//! 规则返回 ambiguous 表示强制升级，总是提交。

use std::collections::HashMap;

use once_cell::sync::Lazy;
use phf::phf_set;
use regex::Regex;

use crate::models::{Answer, Question, QuestionId, QuestionType, RuleStatus, RuleVerdict};
use crate::utils::text::{normalize_text, word_count};

/// 数值相对容差（1%）
const NUMERIC_RELATIVE_TOLERANCE: f64 = 0.01;
/// 标准答案为 0 时使用的绝对容差
const NUMERIC_ZERO_ABS_TOLERANCE: f64 = 0.01;
/// 关键词覆盖率达到该值判为正确
const KEYWORD_CORRECT_RATIO: f64 = 0.7;
/// 关键词覆盖率低于正确线但不低于该值时升级
const KEYWORD_PARTIAL_RATIO: f64 = 0.3;
/// 少于该词数的答案视为过短
const BRIEF_ANSWER_WORDS: usize = 3;

static AFFIRMATIVE_WORDS: phf::Set<&'static str> = phf_set! {
    "yes", "true", "correct", "right", "agree",
};

static NEGATIVE_WORDS: phf::Set<&'static str> = phf_set! {
    "no", "false", "incorrect", "wrong", "disagree",
};

/// 关键词中代表"大 O 记号"的写法，答案中出现任意 `O(...)` 即视为命中
static BIG_O_KEYWORDS: phf::Set<&'static str> = phf_set! {
    "bigo", "big o", "bigoh", "big oh",
};

/// 归一化后文本中的代码标记
const CODE_MARKERS_NORMALIZED: [&str; 3] = ["function", "def ", "class "];
/// 原始文本中的代码标记
const CODE_MARKERS_RAW: [&str; 5] = ["=>", "();", "#include", "console.log", "print("];

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?[0-9]*\.?[0-9]+").expect("valid number regex"));

static COMPLEXITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bO\s*\(\s*([^)]+?)\s*\)").expect("valid complexity regex"));

/// 单条规则：返回 `None` 表示不适用，交给下一条规则
type RuleFn = fn(&Question, &str) -> Option<RuleVerdict>;

struct Rule {
    name: &'static str,
    apply: RuleFn,
    /// 提交结果所需的最低置信度
    min_confidence: f64,
}

const RULES: [Rule; 7] = [
    Rule { name: "exact_match", apply: check_exact_match, min_confidence: 1.0 },
    Rule { name: "numeric", apply: check_numeric_answer, min_confidence: 0.9 },
    Rule { name: "boolean", apply: check_boolean_answer, min_confidence: 0.9 },
    Rule { name: "keywords", apply: check_keyword_match, min_confidence: 0.8 },
    Rule { name: "complexity", apply: check_complexity_notation, min_confidence: 0.9 },
    Rule { name: "code_snippet", apply: check_code_snippet, min_confidence: 0.0 },
    Rule { name: "brevity", apply: check_brevity, min_confidence: 0.7 },
];

/// 用规则判断单个答案（纯函数，无副作用）
pub fn check_answer(question: &Question, answer: &Answer) -> RuleVerdict {
    if answer.is_blank() {
        return RuleVerdict::new(
            question.id.clone(),
            RuleStatus::Skipped,
            1.0,
            "No answer provided",
        );
    }

    let answer_text = answer.text.trim();
    for rule in RULES.iter() {
        if let Some(verdict) = (rule.apply)(question, answer_text) {
            if verdict.requires_escalation() || verdict.confidence >= rule.min_confidence {
                tracing::trace!("题目 {} 由规则 {} 判定: {:?}", question.id, rule.name, verdict.status);
                return verdict;
            }
        }
    }

    RuleVerdict::ambiguous(question.id.clone(), 0.0, "Requires LLM evaluation")
}

/// 对全部题目做规则预检，结果顺序与题目顺序一致；缺失的答案按空答案处理
pub fn batch_check_answers(questions: &[Question], answers: &[Answer]) -> Vec<RuleVerdict> {
    let answer_map: HashMap<&QuestionId, &Answer> =
        answers.iter().map(|a| (&a.question_id, a)).collect();

    questions
        .iter()
        .map(|question| match answer_map.get(&question.id) {
            Some(answer) => check_answer(question, answer),
            None => check_answer(question, &Answer::empty(question.id.clone())),
        })
        .collect()
}

// ========== 规则实现 ==========

fn check_exact_match(question: &Question, answer_text: &str) -> Option<RuleVerdict> {
    let raw_expected = question.expected_answer.as_deref()?.trim();
    let expected = normalize_text(raw_expected);
    let matched = if expected.is_empty() {
        // 纯符号答案（如 `?:`、`=>`）归一化后为空，比较原文
        !raw_expected.is_empty() && raw_expected.to_lowercase() == answer_text.to_lowercase()
    } else {
        normalize_text(answer_text) == expected
    };
    if !matched {
        return None;
    }
    Some(RuleVerdict::new(question.id.clone(), RuleStatus::Correct, 1.0, "Exact match"))
}

fn check_numeric_answer(question: &Question, answer_text: &str) -> Option<RuleVerdict> {
    if question.question_type != Some(QuestionType::Numeric) {
        return None;
    }
    let value = first_number(answer_text)?;

    if let Some(expected) = question.expected_answer.as_deref().and_then(first_number) {
        let within = if expected == 0.0 {
            value.abs() <= NUMERIC_ZERO_ABS_TOLERANCE
        } else {
            ((value - expected) / expected).abs() < NUMERIC_RELATIVE_TOLERANCE
        };
        return Some(if within {
            RuleVerdict::new(question.id.clone(), RuleStatus::Correct, 1.0, "Numeric match within tolerance")
        } else {
            RuleVerdict::new(question.id.clone(), RuleStatus::Wrong, 0.95, "Numeric value incorrect")
        });
    }

    let range = question.numeric_range?;
    Some(if range.contains(value) {
        RuleVerdict::new(question.id.clone(), RuleStatus::Correct, 0.9, "Within expected range")
    } else {
        RuleVerdict::new(question.id.clone(), RuleStatus::Wrong, 0.9, "Outside expected range")
    })
}

fn check_boolean_answer(question: &Question, answer_text: &str) -> Option<RuleVerdict> {
    if question.question_type != Some(QuestionType::Boolean) {
        return None;
    }
    let given = classify_boolean(answer_text)?;
    let expected = classify_boolean(question.expected_answer.as_deref()?)?;

    let status = if given == expected {
        RuleStatus::Correct
    } else {
        RuleStatus::Wrong
    };
    Some(RuleVerdict::new(question.id.clone(), status, 0.95, "Boolean match"))
}

fn check_keyword_match(question: &Question, answer_text: &str) -> Option<RuleVerdict> {
    let keywords: Vec<String> = question
        .keywords
        .iter()
        .map(|k| normalize_text(k))
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return None;
    }

    let normalized = normalize_text(answer_text);
    let has_notation = COMPLEXITY_RE.is_match(answer_text);
    let matched = keywords
        .iter()
        .filter(|k| normalized.contains(k.as_str()) || (has_notation && BIG_O_KEYWORDS.contains(k.as_str())))
        .count();
    let ratio = matched as f64 / keywords.len() as f64;

    let verdict = if ratio >= KEYWORD_CORRECT_RATIO {
        RuleVerdict::new(
            question.id.clone(),
            RuleStatus::Correct,
            0.8,
            format!("Matched {}/{} keywords", matched, keywords.len()),
        )
    } else if ratio >= KEYWORD_PARTIAL_RATIO {
        RuleVerdict::ambiguous(question.id.clone(), 0.5, "Partial keyword match, needs LLM")
    } else {
        RuleVerdict::new(question.id.clone(), RuleStatus::Wrong, 0.75, "Missing key concepts")
    };
    Some(verdict)
}

fn check_complexity_notation(question: &Question, answer_text: &str) -> Option<RuleVerdict> {
    let expected = question.expected_answer.as_deref()?;
    let expected = canonical_complexity(COMPLEXITY_RE.captures(expected)?.get(1)?.as_str());

    let given: Vec<String> = COMPLEXITY_RE
        .captures_iter(answer_text)
        .filter_map(|c| c.get(1).map(|m| canonical_complexity(m.as_str())))
        .collect();
    if given.is_empty() {
        return None;
    }

    Some(if given.iter().any(|g| *g == expected) {
        RuleVerdict::new(question.id.clone(), RuleStatus::Correct, 1.0, "Big O notation match")
    } else {
        RuleVerdict::new(question.id.clone(), RuleStatus::Wrong, 0.9, "Big O notation mismatch")
    })
}

fn check_code_snippet(question: &Question, answer_text: &str) -> Option<RuleVerdict> {
    let normalized = normalize_text(answer_text);
    let is_code = CODE_MARKERS_NORMALIZED.iter().any(|m| normalized.contains(m))
        || CODE_MARKERS_RAW.iter().any(|m| answer_text.contains(m));
    is_code.then(|| {
        RuleVerdict::ambiguous(question.id.clone(), 0.0, "Code snippet detected, needs LLM")
    })
}

fn check_brevity(question: &Question, answer_text: &str) -> Option<RuleVerdict> {
    (word_count(answer_text) < BRIEF_ANSWER_WORDS).then(|| {
        RuleVerdict::new(question.id.clone(), RuleStatus::Wrong, 0.7, "Answer too brief")
    })
}

// ========== 辅助函数 ==========

/// 提取文本中的第一个数值
fn first_number(text: &str) -> Option<f64> {
    NUMBER_RE
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// 判断文本是肯定还是否定；两者都有或都没有时返回 `None`
fn classify_boolean(text: &str) -> Option<bool> {
    let normalized = normalize_text(text);
    let words: Vec<&str> = normalized.split_whitespace().collect();
    let is_true = words.iter().any(|w| AFFIRMATIVE_WORDS.contains(*w));
    let is_false = words.iter().any(|w| NEGATIVE_WORDS.contains(*w));
    match (is_true, is_false) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

/// 复杂度表达式的结构化形式：`N Log N`、`n*log(n` 统一为 `nlogn`
fn canonical_complexity(expr: &str) -> String {
    expr.to_lowercase()
        .replace('²', "^2")
        .replace('³', "^3")
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '*' | '·' | '(' | ')'))
        .collect()
}
