use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 输入数据错误（直接返回给调用方，不进行评分）
    #[error("输入错误: {0}")]
    Input(#[from] InputError),
    /// LLM 服务错误
    #[error("LLM错误: {0}")]
    Llm(#[from] LlmError),
    /// LLM 响应解析错误
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),
    /// 上下文检索错误
    #[error("检索错误: {0}")]
    Retrieval(#[from] RetrievalError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 输入数据错误
#[derive(Debug, Error)]
pub enum InputError {
    /// 题目列表为空
    #[error("题目列表不能为空")]
    EmptyAssessment,
    /// 题目ID重复
    #[error("题目ID重复: {id}")]
    DuplicateQuestionId { id: String },
    /// 同一题目存在多个答案
    #[error("题目 {id} 存在多个答案")]
    DuplicateAnswer { id: String },
    /// 答案对应的题目不存在
    #[error("答案对应的题目不存在: {id}")]
    UnknownAnswerTarget { id: String },
}

/// LLM 服务错误
#[derive(Debug, Error)]
pub enum LlmError {
    /// 请求频率限制
    #[error("LLM请求频率限制 (模型: {model})")]
    RateLimited { model: String },
    /// 服务过载
    #[error("LLM服务过载 (模型: {model})")]
    Overloaded { model: String },
    /// 服务端错误（5xx）
    #[error("LLM服务端错误 (模型: {model}, 状态码: {status}): {message}")]
    ServerError {
        model: String,
        status: u16,
        message: String,
    },
    /// 非瞬时的错误响应（4xx 等）
    #[error("LLM返回错误响应 (模型: {model}, 状态码: {status}): {message}")]
    BadResponse {
        model: String,
        status: u16,
        message: String,
    },
    /// API 调用失败
    #[error("LLM API调用失败 (模型: {model}): {message}")]
    RequestFailed { model: String, message: String },
    /// 请求超时
    #[error("LLM请求超时 (模型: {model}, {secs}秒)")]
    Timeout { model: String, secs: u64 },
    /// 返回内容为空
    #[error("LLM返回内容为空 (模型: {model})")]
    EmptyContent { model: String },
    /// 所有模型均失败
    #[error("所有模型均失败 (尝试: {tried:?}), 最后错误: {last}")]
    AllModelsFailed { tried: Vec<String>, last: String },
}

/// 触发重试的响应信号
const TRANSIENT_SIGNALS: [&str; 5] = ["429", "503", "overloaded", "rate limit", "timeout"];

impl LlmError {
    /// 按响应信号判断是否可以重试：限流、过载、5xx、超时
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited { .. }
            | LlmError::Overloaded { .. }
            | LlmError::ServerError { .. }
            | LlmError::Timeout { .. } => true,
            LlmError::RequestFailed { message, .. } => {
                let lower = message.to_lowercase();
                TRANSIENT_SIGNALS.iter().any(|s| lower.contains(s))
            }
            _ => false,
        }
    }

    /// 根据 HTTP 状态码构造错误
    pub fn from_status(model: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        let model = model.into();
        let message = message.into();
        match status {
            429 => LlmError::RateLimited { model },
            503 | 529 => LlmError::Overloaded { model },
            500..=599 => LlmError::ServerError {
                model,
                status,
                message,
            },
            _ if message.to_lowercase().contains("overloaded") => LlmError::Overloaded { model },
            _ => LlmError::BadResponse {
                model,
                status,
                message,
            },
        }
    }
}

/// LLM 响应解析错误
#[derive(Debug, Error)]
pub enum ParseError {
    /// 所有解析策略都无法得到 JSON 数组
    #[error("响应中找不到有效的JSON数组 (响应片段: {preview})")]
    NoJsonArray { preview: String },
    /// JSON 数组中没有任何条目能对应到提交的题目
    #[error("响应中没有可对应到题目的评分结果 (共 {items} 条)")]
    NoMatchingVerdicts { items: usize },
}

/// 上下文检索错误
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// 网络请求失败
    #[error("检索请求失败 ({endpoint}): {message}")]
    RequestFailed { endpoint: String, message: String },
    /// 返回错误响应
    #[error("检索服务返回错误 ({endpoint}, 状态码: {status})")]
    BadResponse { endpoint: String, status: u16 },
    /// 检索超时
    #[error("检索超时 ({millis}毫秒)")]
    Timeout { millis: u64 },
    /// 语料加载失败
    #[error("语料加载失败 ({path}): {message}")]
    CorpusLoadFailed { path: String, message: String },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置值非法
    #[error("配置项 {name} 的值 '{value}' 非法: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
    /// 缺少 API 密钥
    #[error("提供商 {provider} 缺少 API 密钥")]
    MissingApiKey { provider: String },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {message}")]
    TomlParseFailed { path: String, message: String },
    /// JSON 序列化失败
    #[error("JSON序列化失败: {source}")]
    JsonFailed {
        #[source]
        source: serde_json::Error,
    },
}

// ========== 从常见错误类型转换 ==========

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::File(FileError::JsonFailed { source: err })
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::File(FileError::TomlParseFailed {
            path: String::new(), // TOML错误通常不包含路径信息
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: String::new(),
            source: err,
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件写入错误
    pub fn file_write_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建配置值非法错误
    pub fn invalid_config(
        name: impl Into<String>,
        value: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        AppError::Config(ConfigError::InvalidValue {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
