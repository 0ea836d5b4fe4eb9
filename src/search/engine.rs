//! Search engine - in-memory full-text search implementation / 内存搜索引擎
//!
//! Architecture principle: only expose primitive operations, do not control flow / 架构原则
//! - index_table: replace a whole collection / 重建集合
//! - search: search / 搜索
//! - drop_collection: remove a collection / 删除集合
//! - clear: clear index / 清空索引
//!
//! One document per non-empty cell. All maps live behind a single lock so a
//! collection rebuild is observed either completely or not at all.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::schema::{SearchHit, SearchOptions};
use super::tokenizer::{contains_chinese, generate_ngrams, tokenize, tokenize_query};
use super::{IndexingError, SearchBackend};
use crate::table::TableView;

/// Indexed cell / 单元格文档
#[derive(Debug, Clone)]
struct CellDocument {
    collection: String,
    row: usize,
    column_idx: usize,
    column: String,
    value: String,
}

/// Inverted index entry / 倒排索引条目
#[derive(Debug, Clone)]
struct PostingEntry {
    doc_id: String,
    position: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub collection_count: usize,
    pub document_count: usize,
    pub last_updated: Option<i64>,
}

#[derive(Default)]
struct EngineState {
    /// Document storage: doc_id -> CellDocument / 文档存储
    documents: HashMap<String, CellDocument>,
    /// Collection name -> doc ids / 集合到文档
    collections: HashMap<String, Vec<String>>,
    /// Inverted index: token -> [PostingEntry] / 倒排索引
    inverted_index: HashMap<String, Vec<PostingEntry>>,
    /// N-gram index (for fuzzy matching) / N-gram 索引
    ngram_index: HashMap<String, Vec<String>>,
    last_updated: Option<i64>,
}

impl EngineState {
    fn remove_collection(&mut self, collection: &str) -> bool {
        let Some(doc_ids) = self.collections.remove(collection) else {
            return false;
        };

        for doc_id in &doc_ids {
            let Some(doc) = self.documents.remove(doc_id) else { continue };

            for token in tokenize(&doc.value) {
                if let Some(postings) = self.inverted_index.get_mut(&token) {
                    postings.retain(|p| &p.doc_id != doc_id);
                    if postings.is_empty() {
                        self.inverted_index.remove(&token);
                    }
                }
            }
            for ngram in generate_ngrams(&doc.value, 1, 3) {
                if let Some(ids) = self.ngram_index.get_mut(&ngram) {
                    ids.retain(|id| id != doc_id);
                    if ids.is_empty() {
                        self.ngram_index.remove(&ngram);
                    }
                }
            }
        }
        true
    }

    fn insert(&mut self, doc: CellDocument) {
        let doc_id = format!("{}:{}:{}", doc.collection, doc.row, doc.column_idx);

        for (position, token) in tokenize(&doc.value).into_iter().enumerate() {
            self.inverted_index.entry(token).or_default().push(PostingEntry {
                doc_id: doc_id.clone(),
                position,
            });
        }
        for ngram in generate_ngrams(&doc.value, 1, 3) {
            self.ngram_index.entry(ngram).or_default().push(doc_id.clone());
        }

        self.collections
            .entry(doc.collection.clone())
            .or_default()
            .push(doc_id.clone());
        self.documents.insert(doc_id, doc);
    }
}

/// Search engine / 搜索引擎
///
/// Implements full-text search using inverted index, supports: / 使用倒排索引实现全文搜索
/// - Chinese word segmentation (jieba) / 中文分词
/// - Fuzzy search (N-gram + edit distance) / 模糊搜索
/// - Prefix matching / 前缀匹配
#[derive(Default)]
pub struct MemorySearchEngine {
    state: RwLock<EngineState>,
}

impl MemorySearchEngine {
    /// Create new search engine instance / 创建新的搜索引擎实例
    pub fn new() -> Self {
        Self::default()
    }

    /// Get index statistics / 获取索引统计信息
    pub fn stats(&self) -> EngineStats {
        let state = self.state.read();
        EngineStats {
            collection_count: state.collections.len(),
            document_count: state.documents.len(),
            last_updated: state.last_updated,
        }
    }

    /// Replace a collection with the cells of `table` (primitive operation) / 重建集合
    pub fn replace_collection(&self, collection: &str, table: &TableView) {
        let docs: Vec<CellDocument> = table
            .cells()
            .map(|(row, column_idx, column, value)| CellDocument {
                collection: collection.to_string(),
                row,
                column_idx,
                column: column.to_string(),
                value: value.to_string(),
            })
            .collect();

        let mut state = self.state.write();
        state.remove_collection(collection);
        // 空表也要登记集合
        state.collections.insert(collection.to_string(), Vec::new());
        for doc in docs {
            state.insert(doc);
        }
        state.last_updated = Some(chrono::Utc::now().timestamp());
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        self.state.read().collections.contains_key(collection)
    }

    /// 删除集合（原语操作）
    pub fn drop_collection(&self, collection: &str) -> bool {
        let mut state = self.state.write();
        let removed = state.remove_collection(collection);
        if removed {
            state.last_updated = Some(chrono::Utc::now().timestamp());
        }
        removed
    }

    /// 清空所有索引（原语操作）
    pub fn clear(&self) {
        *self.state.write() = EngineState::default();
    }

    /// 搜索（原语操作）
    pub fn search(&self, options: &SearchOptions) -> Vec<SearchHit> {
        if options.query.trim().is_empty() {
            return Vec::new();
        }

        let query_tokens = tokenize_query(&options.query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let state = self.state.read();
        let mut scores: HashMap<&str, f32> = HashMap::new();

        // 精确匹配 + 前缀匹配
        for token in &query_tokens {
            if let Some(postings) = state.inverted_index.get(token) {
                for posting in postings {
                    // Earlier tokens in a cell weigh slightly more / 靠前的词权重略高
                    *scores.entry(posting.doc_id.as_str()).or_default() +=
                        1.0 + 1.0 / (1.0 + posting.position as f32);
                }
            }

            for (idx_token, postings) in state.inverted_index.iter() {
                if idx_token.starts_with(token.as_str()) && idx_token != token {
                    for posting in postings {
                        *scores.entry(posting.doc_id.as_str()).or_default() += 0.5;
                    }
                }
            }
        }

        // 模糊匹配（如果启用）
        if options.fuzzy && scores.len() < options.limit {
            if contains_chinese(&options.query) {
                // 对中文使用 N-gram 模糊匹配
                for ngram in generate_ngrams(&options.query, 1, 2) {
                    if let Some(doc_ids) = state.ngram_index.get(&ngram) {
                        for doc_id in doc_ids {
                            *scores.entry(doc_id.as_str()).or_default() += 0.3;
                        }
                    }
                }
            } else {
                // 对英文使用编辑距离模糊匹配
                for token in &query_tokens {
                    for (idx_token, postings) in state.inverted_index.iter() {
                        if idx_token != token
                            && fuzzy_match(token, idx_token, options.fuzzy_distance as usize)
                        {
                            for posting in postings {
                                *scores.entry(posting.doc_id.as_str()).or_default() += 0.3;
                            }
                        }
                    }
                }
            }
        }

        let mut results: Vec<SearchHit> = scores
            .into_iter()
            .filter_map(|(doc_id, score)| {
                let doc = state.documents.get(doc_id)?;
                if let Some(ref collection) = options.collection {
                    if &doc.collection != collection {
                        return None;
                    }
                }
                Some(SearchHit {
                    collection: doc.collection.clone(),
                    row: doc.row,
                    column: doc.column.clone(),
                    value: doc.value.clone(),
                    score,
                })
            })
            .collect();

        // 按分数排序
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.collection.cmp(&b.collection))
                .then_with(|| a.row.cmp(&b.row))
        });

        // 应用分页
        results
            .into_iter()
            .skip(options.offset)
            .take(options.limit)
            .collect()
    }
}

#[async_trait]
impl SearchBackend for MemorySearchEngine {
    async fn index_table(&self, collection: &str, table: &TableView) -> Result<(), IndexingError> {
        if collection.is_empty() {
            return Err(IndexingError::Rejected {
                collection: collection.to_string(),
                reason: "empty collection name".to_string(),
            });
        }
        self.replace_collection(collection, table);
        Ok(())
    }

    async fn collection_exists(&self, identifier: &str) -> Result<bool, IndexingError> {
        Ok(self.has_collection(identifier))
    }
}

/// 简单的编辑距离模糊匹配
fn fuzzy_match(s1: &str, s2: &str, max_distance: usize) -> bool {
    if s1 == s2 {
        return true;
    }

    let len1 = s1.chars().count();
    let len2 = s2.chars().count();

    // 长度差太大直接返回
    if len1.abs_diff(len2) > max_distance {
        return false;
    }

    levenshtein_distance(s1, s2) <= max_distance
}

/// 计算 Levenshtein 编辑距离
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();

    if s1_chars.is_empty() {
        return s2_chars.len();
    }
    if s2_chars.is_empty() {
        return s1_chars.len();
    }

    let mut prev: Vec<usize> = (0..=s2_chars.len()).collect();
    let mut curr = vec![0usize; s2_chars.len() + 1];

    for (i, c1) in s1_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, c2) in s2_chars.iter().enumerate() {
            let cost = usize::from(c1 != c2);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[s2_chars.len()]
}
