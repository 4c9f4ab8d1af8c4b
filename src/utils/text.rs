//! 文本处理工具
//!
//! 规则引擎、提示词构建和画像压缩共用的字符串辅助函数

/// 归一化文本：转为小写、去掉首尾空白、删除标点（保留字母、数字、下划线和空白）
pub fn normalize_text(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect()
}

/// 按字符截断，结果总长度不超过 `max_chars`，被截断时以 `...` 结尾
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= 3 {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - 3).collect();
    out.push_str("...");
    out
}

/// 粗略估算 token 数（约 4 个字符 1 个 token）
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// 空白分隔的词数
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Hello, World! "), "hello world");
        assert_eq!(normalize_text("O(log n)"), "olog n");
        assert_eq!(normalize_text("big-O"), "bigo");
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("short", 10), "short");
        assert_eq!(truncate_with_ellipsis("abcdefghij", 8), "abcde...");
        assert_eq!(truncate_with_ellipsis("abcdefghij", 8).chars().count(), 8);
        assert_eq!(truncate_with_ellipsis("你好世界你好世界", 5), "你好...");
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
