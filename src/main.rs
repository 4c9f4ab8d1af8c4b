use std::path::PathBuf;

use anyhow::{Context, Result};
use answer_grader::models::load_assessment;
use answer_grader::utils::logging::{self, log_grading_start, print_final_stats};
use answer_grader::{Config, Grader};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load().await.context("加载配置失败")?;

    // 初始化日志
    logging::init(config.verbose_logging);

    let assessment_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("assessment.toml"));

    let assessment = load_assessment(&assessment_path).await?;
    let assessment_id = assessment
        .assessment_id
        .clone()
        .unwrap_or_else(|| assessment_path.display().to_string());
    log_grading_start(
        &assessment_id,
        assessment.questions.len(),
        assessment.answers.len(),
    );

    let output_file = config.output_file.clone();
    let grader = Grader::from_config(config).await?;
    let report = grader
        .evaluate_assessment(&assessment.questions, &assessment.answers, &assessment.summary())
        .await?;

    report.save(&output_file).await?;

    print_final_stats(&report, Some(&output_file));

    Ok(())
}
