//! 上下文检索服务
//!
//! 为升级到 LLM 的题目检索少量相关片段，只把 top-K 片段（按字符预算截断）放进提示词。
//! 检索失败不会影响评分，由调用方记录日志后跳过。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::{Config, RetrieverKind};
use crate::error::{AppError, AppResult, RetrievalError};

/// 哈希词袋向量的维度
const EMBEDDING_DIMENSION: usize = 384;

/// 检索到的片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSnippet {
    pub id: String,
    pub text: String,
    /// 相似度，范围 [0, 1]
    pub score: f64,
}

impl ScoredSnippet {
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            score: if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 },
        }
    }
}

/// 上下文检索接口
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredSnippet>, RetrievalError>;
}

/// 把片段按分数从高到低拼接成一段上下文，只在片段边界截断
pub fn format_context(snippets: &[ScoredSnippet], max_chars: usize) -> String {
    let mut sorted: Vec<&ScoredSnippet> = snippets.iter().collect();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut result = String::new();
    let mut used = 0;
    for snippet in sorted {
        let line = format!("[{:.2}] {}", snippet.score, snippet.text.trim());
        // 换行只出现在两行之间
        let separator = usize::from(!result.is_empty());
        let len = line.chars().count() + separator;
        if used + len > max_chars {
            break;
        }
        if separator == 1 {
            result.push('\n');
        }
        result.push_str(&line);
        used += len;
    }
    result
}

// ========== 本地索引 ==========

#[derive(Debug, Clone, Deserialize)]
pub struct CorpusChunk {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct CorpusFile {
    #[serde(default)]
    chunks: Vec<CorpusChunk>,
}

/// 内存向量索引：哈希词袋向量 + 余弦相似度
pub struct LocalIndex {
    entries: Vec<(CorpusChunk, Vec<f64>)>,
}

impl LocalIndex {
    pub fn new(chunks: Vec<CorpusChunk>) -> Self {
        let entries = chunks
            .into_iter()
            .map(|chunk| {
                let vector = embed_text(&chunk.text);
                (chunk, vector)
            })
            .collect();
        Self { entries }
    }

    /// 从 TOML 语料文件加载（`[[chunks]]`，每项包含 `id` 和 `text`）
    pub async fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, RetrievalError> {
        let path = path.as_ref();
        let load_failed = |message: String| RetrievalError::CorpusLoadFailed {
            path: path.display().to_string(),
            message,
        };

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| load_failed(e.to_string()))?;
        let corpus: CorpusFile = toml::from_str(&content).map_err(|e| load_failed(e.to_string()))?;

        info!("📚 已加载上下文语料: {} ({} 条)", path.display(), corpus.chunks.len());
        Ok(Self::new(corpus.chunks))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 相似度为 0 的片段不返回
    pub fn search(&self, query: &str, top_k: usize) -> Vec<ScoredSnippet> {
        let query_vector = embed_text(query);
        let mut scored: Vec<ScoredSnippet> = self
            .entries
            .iter()
            .map(|(chunk, vector)| {
                ScoredSnippet::new(&chunk.id, &chunk.text, cosine_similarity(&query_vector, vector))
            })
            .filter(|s| s.score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        scored
    }
}

#[async_trait]
impl ContextRetriever for LocalIndex {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredSnippet>, RetrievalError> {
        Ok(self.search(query, top_k))
    }
}

/// 内置示例语料
const BUILTIN_CORPUS: [(&str, &str); 8] = [
    ("ctx1", "Python is a high-level programming language known for simplicity."),
    ("ctx2", "Machine learning algorithms learn patterns from data."),
    ("ctx3", "Neural networks consist of layers of interconnected nodes."),
    ("ctx4", "LangChain is a framework for building LLM applications."),
    ("ctx5", "Binary search has O(log n) time complexity by halving search space."),
    ("ctx6", "Queues follow FIFO (First In First Out) principle."),
    ("ctx7", "REST APIs use HTTP methods for CRUD operations."),
    ("ctx8", "SQL databases use structured tables with defined schemas."),
];

/// 使用内置语料的检索器，不需要任何外部资源
pub struct MockRetriever {
    index: LocalIndex,
}

impl MockRetriever {
    pub fn new() -> Self {
        let chunks = BUILTIN_CORPUS
            .iter()
            .map(|(id, text)| CorpusChunk {
                id: id.to_string(),
                text: text.to_string(),
            })
            .collect();
        Self {
            index: LocalIndex::new(chunks),
        }
    }
}

impl Default for MockRetriever {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextRetriever for MockRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredSnippet>, RetrievalError> {
        Ok(self.index.search(query, top_k))
    }
}

// ========== 远程检索 ==========

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct MatchRow {
    #[serde(default)]
    id: serde_json::Value,
    content: String,
    similarity: f64,
}

/// 远程相似度检索：`/functions/v1/embed` 生成向量，`/rest/v1/rpc/match_documents` 检索
pub struct HostedRetriever {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl HostedRetriever {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Other(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout,
        })
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, RetrievalError> {
        let endpoint = format!("{}{}", self.base_url, path);
        let failed = |message: String| RetrievalError::RequestFailed {
            endpoint: endpoint.clone(),
            message,
        };

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RetrievalError::Timeout {
                        millis: self.timeout.as_millis() as u64,
                    }
                } else {
                    failed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::BadResponse {
                endpoint: endpoint.clone(),
                status: status.as_u16(),
            });
        }
        response.json::<T>().await.map_err(|e| failed(e.to_string()))
    }
}

#[async_trait]
impl ContextRetriever for HostedRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredSnippet>, RetrievalError> {
        let embedded: EmbedResponse = self.post("/functions/v1/embed", json!({ "text": query })).await?;
        debug!("远程向量维度: {}", embedded.embedding.len());

        let rows: Vec<MatchRow> = self
            .post(
                "/rest/v1/rpc/match_documents",
                json!({ "query_embedding": embedded.embedding, "match_count": top_k }),
            )
            .await?;

        Ok(rows
            .into_iter()
            .take(top_k)
            .map(|row| {
                let id = match row.id {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                ScoredSnippet::new(id, row.content, row.similarity)
            })
            .collect())
    }
}

/// 根据配置创建检索器；`none` 返回 `None`
pub async fn build_retriever(config: &Config) -> AppResult<Option<Arc<dyn ContextRetriever>>> {
    let retriever: Arc<dyn ContextRetriever> = match config.retriever {
        RetrieverKind::None => return Ok(None),
        RetrieverKind::Mock => Arc::new(MockRetriever::new()),
        RetrieverKind::Local => {
            let path = config.context_corpus_path.as_deref().ok_or_else(|| {
                AppError::invalid_config("context_corpus_path", "", "local 检索需要语料文件路径")
            })?;
            Arc::new(LocalIndex::from_toml_file(path).await?)
        }
        RetrieverKind::Hosted => {
            let (Some(url), Some(key)) = (&config.hosted_index_url, &config.hosted_index_key) else {
                return Err(AppError::invalid_config(
                    "hosted_index_url",
                    config.hosted_index_url.as_deref().unwrap_or(""),
                    "hosted 检索需要同时配置地址和密钥",
                ));
            };
            Arc::new(HostedRetriever::new(
                url,
                key,
                Duration::from_millis(config.retrieval_timeout_ms),
            )?)
        }
    };
    Ok(Some(retriever))
}

// ========== 向量计算 ==========

/// 32 位滚动哈希（`h = h * 31 + c`，按 UTF-16 码元计算）
fn simple_hash(word: &str) -> u32 {
    let hash = word
        .encode_utf16()
        .fold(0i32, |h, c| h.wrapping_shl(5).wrapping_sub(h).wrapping_add(c as i32));
    hash.unsigned_abs()
}

/// 哈希词袋向量（只统计长度大于 2 的词），已归一化
fn embed_text(text: &str) -> Vec<f64> {
    let mut vector = vec![0.0; EMBEDDING_DIMENSION];
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() > 2)
        .for_each(|w| vector[simple_hash(w) as usize % EMBEDDING_DIMENSION] += 1.0);

    let magnitude = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if magnitude > 0.0 {
        vector.iter_mut().for_each(|v| *v /= magnitude);
    }
    vector
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|v| v * v).sum::<f64>().sqrt();
    let mag_b = b.iter().map(|v| v * v).sum::<f64>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_simple_hash_matches_rolling_hash() {
        assert_eq!(simple_hash("abc"), 96354);
        assert_eq!(simple_hash(""), 0);
    }

    #[test]
    fn test_embedding_is_normalized() {
        let v = embed_text("Binary search halves the search space");
        let magnitude: f64 = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-9);
        assert!(embed_text("a an").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_mock_retriever_ranks_relevant_snippet_first() {
        let retriever = MockRetriever::new();
        let snippets = retriever.retrieve("binary search complexity", 3).await.unwrap();
        assert!(!snippets.is_empty());
        assert!(snippets.len() <= 3);
        assert_eq!(snippets[0].id, "ctx5");
        assert!(snippets.iter().all(|s| (0.0..=1.0).contains(&s.score)));
    }

    #[tokio::test]
    async fn test_unrelated_query_returns_nothing() {
        let retriever = MockRetriever::new();
        assert!(retriever.retrieve("zzz qqq", 3).await.unwrap().is_empty());
    }

    #[test]
    fn test_format_context_orders_and_cuts_on_boundaries() {
        let snippets = vec![
            ScoredSnippet::new("a", "low score snippet", 0.2),
            ScoredSnippet::new("b", "high score snippet", 0.87),
            ScoredSnippet::new("c", "middle score snippet", 0.5),
        ];
        let all = format_context(&snippets, 500);
        assert_eq!(
            all,
            "[0.87] high score snippet\n[0.50] middle score snippet\n[0.20] low score snippet"
        );

        // 第二条放不下时只保留第一条，不截断片段
        let first_only = format_context(&snippets, 40);
        assert_eq!(first_only, "[0.87] high score snippet");

        assert_eq!(format_context(&snippets, 5), "");
    }

    #[test]
    fn test_format_context_keeps_snippets_that_fit_exactly() {
        let snippets = vec![
            ScoredSnippet::new("b", "high score snippet", 0.87),
            ScoredSnippet::new("c", "middle score snippet", 0.5),
        ];
        // "[0.87] high score snippet" 恰好 25 个字符
        assert_eq!(format_context(&snippets[..1], 25), "[0.87] high score snippet");
        assert_eq!(format_context(&snippets[..1], 24), "");

        // 25 + 换行 + 27
        assert_eq!(
            format_context(&snippets, 53),
            "[0.87] high score snippet\n[0.50] middle score snippet"
        );
        assert_eq!(format_context(&snippets, 52), "[0.87] high score snippet");
    }

    #[test]
    fn test_snippet_score_is_clamped() {
        assert_eq!(ScoredSnippet::new("x", "t", 1.7).score, 1.0);
        assert_eq!(ScoredSnippet::new("x", "t", -0.3).score, 0.0);
        assert_eq!(ScoredSnippet::new("x", "t", f64::NAN).score, 0.0);
    }

    #[tokio::test]
    async fn test_local_index_from_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[chunks]]
id = "rust1"
text = "Ownership rules govern memory management in Rust."

[[chunks]]
id = "go1"
text = "Goroutines are lightweight threads managed by the Go runtime."
"#
        )
        .unwrap();

        let index = LocalIndex::from_toml_file(file.path()).await.unwrap();
        assert_eq!(index.len(), 2);
        let hits = index.retrieve("rust ownership memory", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "rust1");
    }

    #[tokio::test]
    async fn test_local_index_missing_file() {
        let err = LocalIndex::from_toml_file("/nonexistent/corpus.toml").await.err().unwrap();
        assert!(matches!(err, RetrievalError::CorpusLoadFailed { .. }));
    }

    #[tokio::test]
    async fn test_build_retriever_variants() {
        let none = Config {
            retriever: RetrieverKind::None,
            ..Default::default()
        };
        assert!(build_retriever(&none).await.unwrap().is_none());

        let mock = Config::default();
        assert!(build_retriever(&mock).await.unwrap().is_some());

        let hosted_without_url = Config {
            retriever: RetrieverKind::Hosted,
            ..Default::default()
        };
        assert!(build_retriever(&hosted_without_url).await.is_err());
    }
}
