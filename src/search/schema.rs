//! Search result and query types / 搜索结果与查询选项

use serde::{Deserialize, Serialize};

/// Search hit - one matching cell / 搜索命中（单元格）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Collection name / 集合名
    pub collection: String,
    /// Row index within the collection / 行号
    pub row: usize,
    /// Column name / 列名
    pub column: String,
    /// Cell value / 单元格值
    pub value: String,
    /// Relevance score / 相关性分数
    pub score: f32,
}

/// Search query options / 搜索查询选项
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Search keywords / 搜索关键词
    pub query: String,
    /// Limit search to one collection (None means search all) / 限制搜索的集合
    pub collection: Option<String>,
    /// Enable fuzzy search / 启用模糊搜索
    pub fuzzy: bool,
    /// Edit distance for fuzzy search (1-2) / 模糊搜索的编辑距离
    pub fuzzy_distance: u8,
    /// Maximum number of results to return / 最大返回结果数
    pub limit: usize,
    /// Offset (for pagination) / 偏移量
    pub offset: usize,
}

impl SearchOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            collection: None,
            fuzzy: true,
            fuzzy_distance: 1,
            limit: 50,
            offset: 0,
        }
    }

    pub fn in_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn fuzzy(mut self, enabled: bool) -> Self {
        self.fuzzy = enabled;
        self
    }
}
