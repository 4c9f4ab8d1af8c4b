//! 业务能力层（Services）
//!
//! 每个服务只描述"我能做什么"，不关心流程顺序：
//! - `rule_checker` - 规则预检，能确定的答案不再调用 LLM
//! - `llm_service` - 批量 LLM 评分（重试、退避、多模型回退）
//! - `response_parser` - LLM 回复解析
//! - `context_service` - 上下文检索
//! - `result_merger` - 合并规则结果和 LLM 结果

pub mod context_service;
pub mod llm_service;
pub mod response_parser;
pub mod result_merger;
pub mod rule_checker;

pub use context_service::{
    build_retriever, format_context, ContextRetriever, HostedRetriever, LocalIndex, MockRetriever,
    ScoredSnippet,
};
pub use llm_service::{build_compact_prompt, GradingModel, LlmService, RetryPolicy};
pub use response_parser::{extract_json_array, parse_evaluation_response};
pub use result_merger::merge;
pub use rule_checker::{batch_check_answers, check_answer};
