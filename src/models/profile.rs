//! 用户画像压缩
//!
//! 调用方负责把画像压缩成不超过 100 个字符的一行摘要，
//! 评分流程在进入 LLM 前再用 [`clamp_summary`] 兜底截断。

use phf::phf_map;
use serde::{Deserialize, Serialize};

use crate::utils::text::{estimate_tokens, truncate_with_ellipsis};

/// 画像摘要的最大长度
pub const MAX_SUMMARY_CHARS: usize = 100;

/// 追加目标技能的长度上限
const GOAL_APPEND_LIMIT: usize = 80;

static SKILL_ABBREVIATIONS: phf::Map<&'static str, &'static str> = phf_map! {
    "JavaScript" => "JS",
    "TypeScript" => "TS",
    "Python" => "Py",
    "Machine Learning" => "ML",
    "Deep Learning" => "DL",
    "Natural Language Processing" => "NLP",
    "Computer Vision" => "CV",
    "Data Science" => "DS",
    "Database" => "DB",
    "PostgreSQL" => "PG",
    "MongoDB" => "Mongo",
    "React.js" => "React",
    "Node.js" => "Node",
    "TensorFlow" => "TF",
    "Scikit-learn" => "sklearn",
    "Artificial Intelligence" => "AI",
    "Application Programming Interface" => "API",
    "User Interface" => "UI",
    "User Experience" => "UX",
    "Continuous Integration" => "CI",
    "Continuous Deployment" => "CD",
    "Amazon Web Services" => "AWS",
    "Google Cloud Platform" => "GCP",
    "Kubernetes" => "K8s",
};

/// 用户画像
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserProfile {
    pub current_skills: Vec<String>,
    pub weak_skills: Vec<String>,
    pub experience_years: u32,
    pub experience_months: u32,
    pub target_skill: Option<String>,
}

/// 压缩后的画像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedProfile {
    pub summary: String,
    pub token_estimate: usize,
}

/// 把画像压缩成一行摘要，例如 `JS, Py, ML (3y). Weak: DL. Goal: NLP`
pub fn compress_profile(profile: &UserProfile) -> CompressedProfile {
    let total_months = profile.experience_years * 12 + profile.experience_months;
    let experience = if total_months >= 12 {
        format!("{}y", total_months / 12)
    } else {
        format!("{}mo", profile.experience_months)
    };

    let current = abbreviate_skills(profile.current_skills.iter().take(3));
    let weak = abbreviate_skills(profile.weak_skills.iter().take(2));

    let mut summary = format!("{} ({})", current, experience);
    if !weak.is_empty() {
        summary.push_str(&format!(". Weak: {}", weak));
    }
    if let Some(target) = &profile.target_skill {
        if summary.chars().count() < GOAL_APPEND_LIMIT {
            summary.push_str(&format!(". Goal: {}", abbreviate_skill(target)));
        }
    }

    let summary = clamp_summary(&summary);
    CompressedProfile {
        token_estimate: estimate_tokens(&summary),
        summary,
    }
}

/// 超过 100 个字符的摘要截断为 97 个字符加 `...`
pub fn clamp_summary(summary: &str) -> String {
    truncate_with_ellipsis(summary.trim(), MAX_SUMMARY_CHARS)
}

/// 常见技能名称缩写，未知名称原样返回
pub fn abbreviate_skill(skill: &str) -> &str {
    SKILL_ABBREVIATIONS.get(skill).copied().unwrap_or(skill)
}

fn abbreviate_skills<'a>(skills: impl Iterator<Item = &'a String>) -> String {
    skills
        .map(|s| abbreviate_skill(s))
        .collect::<Vec<_>>()
        .join(", ")
}
