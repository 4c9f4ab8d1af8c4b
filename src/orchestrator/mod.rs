//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责一次测评的批量处理和流程调度，是整个系统的"指挥中心"。
//!
//! ### `batch_processor` - 批量评分处理器
//! - 输入校验
//! - 规则预检与分区
//! - 升级题目分批，控制并发数量（Semaphore）
//! - 合并结果、输出统计信息
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理整份测评)
//!     ↓
//! workflow::EscalationFlow (处理一批升级题目)
//!     ↓
//! services (能力层：rules / llm / context / merge)
//!     ↓
//! clients (提供商：openai / groq / gemini / anthropic)
//! ```
//!
//! ## 设计原则
//!
//! 1. **向下依赖**：编排层 → workflow → services → clients
//! 2. **无业务逻辑**：只做调度和统计，不做具体评分判断

pub mod batch_processor;

pub use batch_processor::Grader;
