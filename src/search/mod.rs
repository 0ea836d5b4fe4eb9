//! Search module - only provides search capabilities (primitives), does not control flow / 搜索模块
//!
//! Architecture principles / 架构原则：
//! - Backends only expose primitive operations: index_table, collection_exists, search
//! - The indexer controls jobs, concurrency and error recovery
//! - Call direction: Indexer → Search (unidirectional) / 调用方向
//!
//! Every dataset produces two collections: one named after the dataset
//! identifier and one named `protocolTree-<dataset id>` for its protocol tree.

pub mod db_index;
pub mod engine;
pub mod schema;
pub mod tokenizer;

use async_trait::async_trait;

use crate::table::TableView;

pub use db_index::{CollectionInfo, IndexStats, SqliteSearchBackend};
pub use engine::MemorySearchEngine;
pub use schema::{SearchHit, SearchOptions};

/// Prefix of the protocol tree collection name / 协议树集合名前缀
pub const PROTOCOL_TREE_PREFIX: &str = "protocolTree-";

/// Name of a dataset's protocol tree collection, e.g. `protocolTree-42` / 协议树集合名
pub fn protocol_collection_name(dataset_id: i64) -> String {
    format!("{}{}", PROTOCOL_TREE_PREFIX, dataset_id)
}

#[derive(Debug, thiserror::Error)]
pub enum IndexingError {
    #[error("search database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to encode collection metadata: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("search database directory error: {0}")]
    Io(#[from] std::io::Error),
    #[error("collection [{collection}] rejected: {reason}")]
    Rejected { collection: String, reason: String },
}

/// Search backend seam / 搜索后端接口
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// (Re)build `collection` from `table` / 重建集合
    async fn index_table(&self, collection: &str, table: &TableView) -> Result<(), IndexingError>;

    /// Whether a collection named `identifier` exists / 集合是否存在
    async fn collection_exists(&self, identifier: &str) -> Result<bool, IndexingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_collection_name() {
        assert_eq!(protocol_collection_name(42), "protocolTree-42");
        assert_eq!(protocol_collection_name(7), "protocolTree-7");
    }
}
