use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult, ConfigError, FileError};

/// LLM 提供商
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI 官方接口
    OpenAi,
    /// Groq（兼容 OpenAI 的接口）
    Groq,
    /// Google Gemini
    Gemini,
    /// Anthropic Claude
    Anthropic,
}

impl LlmProvider {
    /// 提供商默认的模型列表（第一个为主模型，其余为备用）
    pub fn default_models(self) -> Vec<String> {
        let models: &[&str] = match self {
            LlmProvider::OpenAi => &["gpt-4o-mini"],
            LlmProvider::Groq => &["llama-3.1-8b-instant"],
            LlmProvider::Gemini => &["gemini-2.5-flash", "gemini-1.5-flash"],
            LlmProvider::Anthropic => &["claude-3-haiku-20240307"],
        };
        models.iter().map(|m| m.to_string()).collect()
    }

    /// 提供商默认的 API 地址
    pub fn default_base_url(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::Groq => "https://api.groq.com/openai/v1",
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            LlmProvider::Anthropic => "https://api.anthropic.com/v1",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Groq => "groq",
            LlmProvider::Gemini => "gemini",
            LlmProvider::Anthropic => "anthropic",
        };
        f.write_str(name)
    }
}

impl FromStr for LlmProvider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "groq" => Ok(LlmProvider::Groq),
            "gemini" | "google" => Ok(LlmProvider::Gemini),
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            other => Err(AppError::invalid_config(
                "provider",
                other,
                "可选值: openai | groq | gemini | anthropic",
            )),
        }
    }
}

/// 上下文检索后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrieverKind {
    /// 不检索上下文
    None,
    /// 内置示例语料
    Mock,
    /// 本地语料文件 + 内存向量索引
    Local,
    /// 远程相似度检索服务
    Hosted,
}

impl FromStr for RetrieverKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" => Ok(RetrieverKind::None),
            "mock" => Ok(RetrieverKind::Mock),
            "local" => Ok(RetrieverKind::Local),
            "hosted" | "supabase" => Ok(RetrieverKind::Hosted),
            other => Err(AppError::invalid_config(
                "retriever",
                other,
                "可选值: none | mock | local | hosted",
            )),
        }
    }
}

/// 程序配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- LLM 配置 ---
    pub provider: LlmProvider,
    pub api_key: String,
    /// 覆盖提供商默认地址（可选）
    pub api_base_url: Option<String>,
    /// 模型列表，第一个为主模型；为空时使用提供商默认列表
    pub models: Vec<String>,
    /// 每个模型的最大尝试次数
    pub max_retries: u32,
    /// 退避基础时长（毫秒），第 n 次重试前等待 base × 2^n
    pub retry_base_delay_ms: u64,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub request_timeout_secs: u64,
    // --- 批处理配置 ---
    /// 每批提交给 LLM 的题目数量
    pub batch_size: usize,
    /// 同时在途的批次数量
    pub max_concurrent_batches: usize,
    // --- 上下文检索配置 ---
    pub retriever: RetrieverKind,
    pub top_k: usize,
    pub context_max_chars: usize,
    pub retrieval_timeout_ms: u64,
    pub context_corpus_path: Option<String>,
    pub hosted_index_url: Option<String>,
    pub hosted_index_key: Option<String>,
    // --- 输出配置 ---
    pub output_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Gemini,
            api_key: String::new(),
            api_base_url: None,
            models: Vec::new(),
            max_retries: 3,
            retry_base_delay_ms: 2000,
            temperature: 0.1,
            max_output_tokens: 1024,
            request_timeout_secs: 60,
            batch_size: 5,
            max_concurrent_batches: 4,
            retriever: RetrieverKind::Mock,
            top_k: 3,
            context_max_chars: 300,
            retrieval_timeout_ms: 3000,
            context_corpus_path: None,
            hosted_index_url: None,
            hosted_index_key: None,
            output_file: "evaluation.json".to_string(),
            verbose_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 加载配置：若设置了 `GRADER_CONFIG` 则先读取该 TOML 文件，再应用环境变量覆盖
    pub async fn load() -> AppResult<Self> {
        let base = match std::env::var("GRADER_CONFIG") {
            Ok(path) => Self::from_toml_file(&path).await?,
            Err(_) => Self::default(),
        };
        let config = base.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件读取配置，缺省字段使用默认值
    pub async fn from_toml_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        toml::from_str(&content).map_err(|e| {
            AppError::File(FileError::TomlParseFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        })
    }

    fn with_env_overrides(self) -> Self {
        let default = self;
        Self {
            provider: env_parse("LLM_PROVIDER").unwrap_or(default.provider),
            api_key: std::env::var("LLM_API_KEY").unwrap_or(default.api_key),
            api_base_url: std::env::var("LLM_API_BASE_URL").ok().or(default.api_base_url),
            models: std::env::var("LLM_MODELS")
                .ok()
                .map(|v| split_list(&v))
                .unwrap_or(default.models),
            max_retries: env_parse("LLM_MAX_RETRIES").unwrap_or(default.max_retries),
            retry_base_delay_ms: env_parse("LLM_RETRY_BASE_DELAY_MS").unwrap_or(default.retry_base_delay_ms),
            temperature: env_parse("LLM_TEMPERATURE").unwrap_or(default.temperature),
            max_output_tokens: env_parse("LLM_MAX_OUTPUT_TOKENS").unwrap_or(default.max_output_tokens),
            request_timeout_secs: env_parse("LLM_REQUEST_TIMEOUT_SECS").unwrap_or(default.request_timeout_secs),
            batch_size: env_parse("GRADING_BATCH_SIZE").unwrap_or(default.batch_size),
            max_concurrent_batches: env_parse("GRADING_MAX_CONCURRENT_BATCHES").unwrap_or(default.max_concurrent_batches),
            retriever: env_parse("CONTEXT_RETRIEVER").unwrap_or(default.retriever),
            top_k: env_parse("CONTEXT_TOP_K").unwrap_or(default.top_k),
            context_max_chars: env_parse("CONTEXT_MAX_CHARS").unwrap_or(default.context_max_chars),
            retrieval_timeout_ms: env_parse("CONTEXT_TIMEOUT_MS").unwrap_or(default.retrieval_timeout_ms),
            context_corpus_path: std::env::var("CONTEXT_CORPUS_PATH").ok().or(default.context_corpus_path),
            hosted_index_url: std::env::var("CONTEXT_INDEX_URL").ok().or(default.hosted_index_url),
            hosted_index_key: std::env::var("CONTEXT_INDEX_KEY").ok().or(default.hosted_index_key),
            output_file: std::env::var("GRADING_OUTPUT_FILE").unwrap_or(default.output_file),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(default.verbose_logging),
        }
    }

    /// 实际使用的模型列表
    pub fn effective_models(&self) -> Vec<String> {
        if self.models.is_empty() {
            self.provider.default_models()
        } else {
            self.models.clone()
        }
    }

    /// 实际使用的 API 地址
    pub fn effective_base_url(&self) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// 校验配置取值
    pub fn validate(&self) -> AppResult<()> {
        if self.batch_size == 0 {
            return Err(AppError::invalid_config("batch_size", self.batch_size, "必须大于 0"));
        }
        if self.max_concurrent_batches == 0 {
            return Err(AppError::invalid_config(
                "max_concurrent_batches",
                self.max_concurrent_batches,
                "必须大于 0",
            ));
        }
        if self.max_retries == 0 {
            return Err(AppError::invalid_config("max_retries", self.max_retries, "必须大于 0"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AppError::invalid_config(
                "temperature",
                self.temperature,
                "取值范围为 [0, 2]",
            ));
        }
        Ok(())
    }

    /// 调用真实提供商前检查密钥
    pub fn require_api_key(&self) -> AppResult<&str> {
        if self.api_key.trim().is_empty() {
            return Err(AppError::Config(ConfigError::MissingApiKey {
                provider: self.provider.to_string(),
            }));
        }
        Ok(&self.api_key)
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.context_max_chars, 300);
        assert!((config.temperature - 0.1).abs() < f32::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_models_falls_back_to_provider_defaults() {
        let mut config = Config::default();
        assert_eq!(
            config.effective_models(),
            vec!["gemini-2.5-flash".to_string(), "gemini-1.5-flash".to_string()]
        );

        config.models = vec!["custom-model".to_string()];
        assert_eq!(config.effective_models(), vec!["custom-model".to_string()]);
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("OpenAI".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
        assert_eq!("claude".parse::<LlmProvider>().unwrap(), LlmProvider::Anthropic);
        assert!("cohere".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let config = Config {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_api_key() {
        let config = Config::default();
        assert!(config.require_api_key().is_err());

        let config = Config {
            api_key: "k".to_string(),
            ..Default::default()
        };
        assert_eq!(config.require_api_key().unwrap(), "k");
    }

    #[test]
    fn test_toml_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
provider = "groq"
batch_size = 3
retriever = "none"
"#,
        )
        .unwrap();
        assert_eq!(config.provider, LlmProvider::Groq);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.retriever, RetrieverKind::None);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.effective_base_url(), "https://api.groq.com/openai/v1");
    }

    #[tokio::test]
    async fn test_from_toml_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "provider = \"anthropic\"\nmax_concurrent_batches = 2").unwrap();

        let config = Config::from_toml_file(file.path()).await.unwrap();
        assert_eq!(config.provider, LlmProvider::Anthropic);
        assert_eq!(config.max_concurrent_batches, 2);
        assert_eq!(config.batch_size, 5);

        let err = Config::from_toml_file("/nonexistent/grader.toml").await.unwrap_err();
        assert!(matches!(err, AppError::File(FileError::ReadFailed { .. })));
    }
}
