//! 批次上下文
//!
//! 封装"我正在处理第几批"这一信息，以及批次内的题目

use std::fmt::Display;

use crate::models::{Answer, Question};

/// 批次上下文（仅用于日志和统计）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCtx {
    /// 批次编号（从1开始）
    pub batch_index: usize,
    pub total_batches: usize,
}

impl BatchCtx {
    pub fn new(batch_index: usize, total_batches: usize) -> Self {
        Self {
            batch_index,
            total_batches,
        }
    }
}

impl Display for BatchCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[批次 {}/{}]", self.batch_index, self.total_batches)
    }
}

/// 升级到 LLM 的单道题目
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub question: Question,
    pub user_answer: String,
}

impl BatchItem {
    pub fn new(question: &Question, answer: Option<&Answer>) -> Self {
        Self {
            question: question.clone(),
            user_answer: answer.map(|a| a.text.clone()).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(BatchCtx::new(2, 3).to_string(), "[批次 2/3]");
    }

    #[test]
    fn test_item_without_answer_is_blank() {
        let item = BatchItem::new(&Question::new("1", "Explain recursion"), None);
        assert_eq!(item.user_answer, "");
    }
}
