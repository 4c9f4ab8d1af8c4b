/// 日志工具模块
///
/// 提供日志初始化和评分流程各阶段的输出辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::models::{EvaluationReport, RuleStats};
use crate::workflow::BatchCtx;

/// 初始化日志输出
///
/// 优先使用 `RUST_LOG`，未设置时 `verbose` 为 true 输出 debug 级别，否则输出 info 级别
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // 重复初始化（例如测试中）时忽略错误
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录评分开始信息
///
/// # 参数
/// - `assessment_id`: 测评标识
/// - `total_questions`: 题目总数
/// - `total_answers`: 答案总数
pub fn log_grading_start(assessment_id: &str, total_questions: usize, total_answers: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 开始评分: {}", assessment_id);
    info!("📋 题目: {} 道，答案: {} 份", total_questions, total_answers);
    info!("{}", "=".repeat(60));
}

/// 记录规则预检结果
pub fn log_rule_stats(stats: &RuleStats) {
    info!("📏 规则预检结果:");
    info!("  ✅ 正确: {}", stats.correct);
    info!("  ❌ 错误: {}", stats.wrong);
    info!("  ⏭ 跳过: {}", stats.skipped);
    info!("  ❓ 需要 LLM: {}", stats.ambiguous);
    info!(
        "  💡 避免 LLM 调用: {} ({}%)",
        stats.total - stats.ambiguous,
        stats.avoided_percent()
    );
}

/// 记录批次开始信息
///
/// # 参数
/// - `ctx`: 批次上下文
/// - `size`: 本批题目数量
pub fn log_batch_start(ctx: &BatchCtx, size: usize) {
    info!("📦 {} 开始评分，共 {} 道题", ctx, size);
}

/// 记录批次完成信息
///
/// # 参数
/// - `ctx`: 批次上下文
/// - `graded`: 模型成功评分的数量
/// - `total`: 本批题目数量
pub fn log_batch_complete(ctx: &BatchCtx, graded: usize, total: usize) {
    if graded == total {
        info!("✓ {} 完成: 成功 {}/{}", ctx, graded, total);
    } else {
        info!("⚠️ {} 完成: 成功 {}/{}，其余需人工复核", ctx, graded, total);
    }
}

/// 打印最终统计信息
///
/// # 参数
/// - `report`: 评分报告
/// - `output_path`: 报告保存路径（可选）
pub fn print_final_stats(report: &EvaluationReport, output_path: Option<&str>) {
    let summary = &report.summary;
    info!("{}", "=".repeat(60));
    info!("📊 评分完成统计");
    info!(
        "完成时间: {}",
        report.graded_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("🏆 得分: {}/{}", summary.score, summary.max_score);
    info!("✅ 正确: {}", summary.correct_count);
    info!("❌ 错误: {}", summary.wrong_count);
    info!("⏭ 跳过: {}", summary.skipped_count);
    info!(
        "📏 规则评分: {}，🤖 模型评分: {}，🛟 兜底: {}",
        report.stats.rule_graded, report.stats.model_graded, report.stats.degraded
    );
    info!(
        "📦 批次: {}，估算 token: {}（节省 {}，{}%）",
        report.stats.batches,
        report.stats.estimated_tokens,
        report.stats.tokens_saved,
        report.stats.savings_percent
    );
    info!("{}", "=".repeat(60));
    if let Some(path) = output_path {
        info!("报告已保存至: {}", path);
    }
}
