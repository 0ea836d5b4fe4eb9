//! Cell tokenizer - uses jieba-rs for word segmentation / 分词器
//!
//! Dataset cells mix free text, codes and numbers in several languages.
//! Supports / 支持：
//! - Chinese word segmentation (jieba) / 中文分词
//! - English word segmentation (space-separated + lowercase) / 英文分词
//! - Punctuation-only tokens are dropped / 丢弃纯标点

use jieba_rs::Jieba;
use once_cell::sync::Lazy;

/// Global jieba tokenizer instance / 全局 jieba 分词器实例
static JIEBA: Lazy<Jieba> = Lazy::new(Jieba::new);

/// Tokenize text / 对文本进行分词
pub fn tokenize(text: &str) -> Vec<String> {
    JIEBA
        .cut_for_search(text, true)
        .into_iter()
        .map(str::trim)
        .filter(|word| word.chars().any(char::is_alphanumeric))
        .map(str::to_lowercase)
        .collect()
}

/// Tokenize search query (consistent with index tokenization) / 查询分词
pub fn tokenize_query(query: &str) -> Vec<String> {
    tokenize(query)
}

/// Generate N-grams (for fuzzy matching) / 生成 N-gram
///
/// Example: "测试" -> ["测", "试", "测试"] / 例如
pub fn generate_ngrams(text: &str, min_n: usize, max_n: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut ngrams = Vec::new();

    for n in min_n.max(1)..=max_n {
        if n > chars.len() {
            break;
        }
        for window in chars.windows(n) {
            let ngram: String = window.iter().collect();
            if !ngram.trim().is_empty() {
                ngrams.push(ngram.to_lowercase());
            }
        }
    }

    ngrams
}

/// Check if text contains Chinese characters / 检测文本是否包含中文字符
pub fn contains_chinese(text: &str) -> bool {
    text.chars()
        .any(|c| matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}'))
}

/// Normalize text for LIKE matching / 标准化文本
/// - Convert to lowercase / 转小写
/// - Collapse whitespace / 合并空白
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
