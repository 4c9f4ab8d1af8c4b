//! # Answer Grader
//!
//! 一个用于测评答案自动评分的 Rust 库：能用规则确定的答案直接评分，
//! 其余答案分批交给 LLM，失败时降级为需人工复核的结果。
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 提供商客户端（Clients）
//! - `clients/` - 每个 LLM 提供商实现 `CompletionBackend`，只负责一次请求
//! - `OpenAiClient`（OpenAI / Groq）、`GeminiClient`、`AnthropicClient`
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，不关心流程
//! - `rule_checker` - 规则预检
//! - `LlmService` - 批量 LLM 评分（重试、退避、多模型回退）
//! - `ContextRetriever` - 上下文检索（mock / local / hosted）
//! - `result_merger` - 合并规则结果和 LLM 结果
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一批升级题目"的完整处理流程
//! - `BatchCtx` - 批次上下文
//! - `EscalationFlow` - 流程编排（检索上下文 → LLM 评分 → 兜底）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - `Grader`，管理分批和并发
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{Config, LlmProvider, RetrieverKind};
pub use error::{AppError, AppResult};
pub use models::{
    Answer, EvaluationReport, EvaluationSummary, FinalResult, GradeStatus, Question, QuestionId,
    QuestionType,
};
pub use orchestrator::Grader;
pub use services::{ContextRetriever, GradingModel};
