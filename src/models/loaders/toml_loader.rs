use crate::error::{AppError, AppResult, FileError};
use crate::models::profile::{compress_profile, UserProfile};
use crate::models::question::{Answer, Question};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

/// 测评文件：一次作答的全部输入
#[derive(Debug, Clone, Deserialize)]
pub struct AssessmentFile {
    #[serde(default)]
    pub assessment_id: Option<String>,
    /// 已压缩的画像摘要（优先使用）
    #[serde(default)]
    pub profile_summary: Option<String>,
    /// 原始画像，未提供摘要时压缩后使用
    #[serde(default)]
    pub profile: Option<UserProfile>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub answers: Vec<Answer>,
    #[serde(skip)]
    pub file_path: Option<String>,
}

impl AssessmentFile {
    /// 发送给 LLM 的画像摘要
    pub fn summary(&self) -> String {
        if let Some(summary) = &self.profile_summary {
            return summary.clone();
        }
        self.profile
            .as_ref()
            .map(|p| compress_profile(p).summary)
            .unwrap_or_default()
    }
}

/// 从 TOML 文件加载测评数据
pub async fn load_assessment(toml_file_path: &Path) -> AppResult<AssessmentFile> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .map_err(|e| AppError::file_read_failed(toml_file_path.display().to_string(), e))?;

    let mut assessment: AssessmentFile = toml::from_str(&content).map_err(|e| {
        AppError::File(FileError::TomlParseFailed {
            path: toml_file_path.display().to_string(),
            message: e.to_string(),
        })
    })?;

    // 设置文件路径
    assessment.file_path = Some(toml_file_path.to_string_lossy().to_string());

    tracing::info!(
        "成功加载测评 {}: {} 道题, {} 个答案",
        assessment.assessment_id.as_deref().unwrap_or("-"),
        assessment.questions.len(),
        assessment.answers.len()
    );

    Ok(assessment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{QuestionId, QuestionType};
    use std::io::Write;

    #[tokio::test]
    async fn test_load_assessment_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
assessment_id = "a-1"

[profile]
currentSkills = ["Python"]
experienceYears = 2

[[questions]]
id = 1
text = "What is 6 x 7?"
type = "numeric"
expectedAnswer = "42"

[[questions]]
id = "q2"
text = "Explain binary search"
keywords = ["log n", "sorted"]

[[answers]]
questionId = 1
text = "42"
"#
        )
        .unwrap();

        let assessment = load_assessment(file.path()).await.unwrap();
        assert_eq!(assessment.assessment_id.as_deref(), Some("a-1"));
        assert_eq!(assessment.questions.len(), 2);
        assert_eq!(assessment.questions[0].question_type, Some(QuestionType::Numeric));
        assert_eq!(assessment.questions[1].id, QuestionId::new("q2"));
        assert_eq!(assessment.answers[0].question_id, QuestionId::new("1"));
        assert_eq!(assessment.summary(), "Py (2y)");
        assert!(assessment.file_path.is_some());
    }

    #[tokio::test]
    async fn test_load_assessment_missing_file() {
        let result = load_assessment(Path::new("/definitely/not/here.toml")).await;
        assert!(matches!(result, Err(AppError::File(FileError::ReadFailed { .. }))));
    }
}
