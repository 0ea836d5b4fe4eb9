//! 数据库搜索索引 - SQLite search backend
//!
//! 存储方案：
//! - search_collections: one row per collection (column list, row count, update time)
//! - search_documents: one row per non-empty cell, with a lowercase shadow column
//! - 重建集合在单个事务中完成，读者看不到半成品
//!
//! 特性：
//! - WAL模式（并发安全）+ busy_timeout
//! - 批量写入 + 重试机制

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};

use super::schema::SearchHit;
use super::tokenizer::normalize;
use super::{IndexingError, SearchBackend};
use crate::table::TableView;

const MAX_RETRIES: u32 = 3;

/// 集合信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub row_count: i64,
    pub updated_at: i64,
}

/// 索引统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub collection_count: u64,
    pub document_count: u64,
    pub last_updated: Option<i64>,
}

/// 数据库搜索索引
pub struct SqliteSearchBackend {
    db: Pool<Sqlite>,
}

impl SqliteSearchBackend {
    /// 打开（或创建）搜索数据库并初始化表结构
    pub async fn open(db_path: &Path) -> Result<Self, IndexingError> {
        // 确保目录存在
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                tracing::error!("Failed to create search database directory {:?}: {}", parent, e);
                e
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let db = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        tracing::info!("Search database opened: {:?} (WAL mode)", db_path);

        let backend = Self { db };
        backend.init().await?;
        Ok(backend)
    }

    /// 关闭数据库连接池 / Close database connection pool
    pub async fn close(&self) {
        self.db.close().await;
    }

    /// 初始化表结构，只在表不存在时创建
    pub async fn init(&self) -> Result<(), IndexingError> {
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS search_collections (
                name TEXT PRIMARY KEY,
                columns TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
        "#)
        .execute(&self.db)
        .await?;

        // 旧版按列名作主键，同名列会互相覆盖：重建文档表并清空集合，等待重新索引
        let doc_columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info('search_documents')")
            .fetch_all(&self.db)
            .await?;
        if !doc_columns.is_empty() && !doc_columns.iter().any(|c| c == "column_idx") {
            tracing::warn!("Migrating search_documents to column index keys, all collections will be re-indexed");
            let mut tx = self.db.begin().await?;
            sqlx::query("DROP TABLE search_documents").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM search_collections").execute(&mut *tx).await?;
            tx.commit().await?;
        }

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS search_documents (
                collection TEXT NOT NULL,
                row_idx INTEGER NOT NULL,
                column_idx INTEGER NOT NULL,
                column_name TEXT NOT NULL,
                value TEXT NOT NULL,
                value_lower TEXT NOT NULL,
                PRIMARY KEY(collection, row_idx, column_idx)
            ) WITHOUT ROWID
        "#)
        .execute(&self.db)
        .await?;

        // 索引：value_lower用于LIKE搜索
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_value ON search_documents(value_lower)")
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// 实际执行集合重建
    async fn do_index_table(&self, collection: &str, table: &TableView) -> Result<(), IndexingError> {
        let columns: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
        let columns_json = serde_json::to_string(&columns)?;

        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM search_documents WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;

        for (row_idx, column_idx, column, value) in table.cells() {
            sqlx::query(
                "INSERT INTO search_documents (collection, row_idx, column_idx, column_name, value, value_lower) VALUES (?, ?, ?, ?, ?, ?)"
            )
            .bind(collection)
            .bind(row_idx as i64)
            .bind(column_idx as i64)
            .bind(column)
            .bind(value)
            .bind(normalize(value))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT OR REPLACE INTO search_collections (name, columns, row_count, updated_at) VALUES (?, ?, ?, ?)"
        )
        .bind(collection)
        .bind(&columns_json)
        .bind(table.row_count() as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// 搜索（LIKE查询）
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, IndexingError> {
        let query_lower = normalize(query);
        if query_lower.is_empty() {
            return Ok(Vec::new());
        }
        let escaped = escape_like(&query_lower);

        // 查询结果，按匹配度排序
        let rows = sqlx::query(
            r#"
            SELECT collection, row_idx, column_name, value,
                CASE
                    WHEN value_lower = ? THEN 100
                    WHEN value_lower LIKE ? ESCAPE '\' THEN 80
                    ELSE 60
                END as score
            FROM search_documents
            WHERE value_lower LIKE ? ESCAPE '\'
            ORDER BY score DESC, length(value) ASC
            LIMIT ?
            "#
        )
        .bind(&query_lower)
        .bind(format!("{}%", escaped))
        .bind(format!("%{}%", escaped))
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SearchHit {
                collection: row.get("collection"),
                row: row.get::<i64, _>("row_idx") as usize,
                column: row.get("column_name"),
                value: row.get("value"),
                score: row.get::<i32, _>("score") as f32,
            })
            .collect())
    }

    /// 列出所有集合
    pub async fn list_collections(&self) -> Result<Vec<CollectionInfo>, IndexingError> {
        let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT name, columns, row_count, updated_at FROM search_collections ORDER BY name"
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|(name, columns, row_count, updated_at)| -> Result<CollectionInfo, IndexingError> {
                Ok(CollectionInfo {
                    name,
                    columns: serde_json::from_str(&columns)?,
                    row_count,
                    updated_at,
                })
            })
            .collect()
    }

    /// 删除集合
    pub async fn drop_collection(&self, collection: &str) -> Result<bool, IndexingError> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM search_documents WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM search_collections WHERE name = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }

    /// 获取统计信息
    pub async fn stats(&self) -> Result<IndexStats, IndexingError> {
        let row = sqlx::query(
            "SELECT COUNT(*) as collections, MAX(updated_at) as last_updated FROM search_collections"
        )
        .fetch_one(&self.db)
        .await?;
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_documents")
            .fetch_one(&self.db)
            .await?;

        Ok(IndexStats {
            collection_count: row.get::<i64, _>("collections") as u64,
            document_count: documents as u64,
            last_updated: row.try_get::<Option<i64>, _>("last_updated").ok().flatten(),
        })
    }
}

/// LIKE通配符转义，配合 `ESCAPE '\'`
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn is_locked(err: &IndexingError) -> bool {
    match err {
        IndexingError::Database(e) => {
            let msg = e.to_string();
            msg.contains("database is locked") || msg.contains("SQLITE_BUSY")
        }
        _ => false,
    }
}

#[async_trait]
impl SearchBackend for SqliteSearchBackend {
    /// 重建集合 - 带重试机制
    async fn index_table(&self, collection: &str, table: &TableView) -> Result<(), IndexingError> {
        if collection.is_empty() {
            return Err(IndexingError::Rejected {
                collection: collection.to_string(),
                reason: "empty collection name".to_string(),
            });
        }

        let mut attempt = 0;
        loop {
            match self.do_index_table(collection, table).await {
                Ok(()) => {
                    tracing::debug!(
                        "Collection {} rebuilt: {} rows, {} columns",
                        collection,
                        table.row_count(),
                        table.column_count()
                    );
                    return Ok(());
                }
                Err(e) if is_locked(&e) && attempt + 1 < MAX_RETRIES => {
                    attempt += 1;
                    // 数据库锁定，等待后重试
                    let delay = 100 * attempt as u64;
                    tracing::debug!(
                        "Search database locked, retrying in {}ms (attempt {}/{})",
                        delay,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn collection_exists(&self, identifier: &str) -> Result<bool, IndexingError> {
        let found: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM search_collections WHERE name = ?")
                .bind(identifier)
                .fetch_optional(&self.db)
                .await?;
        Ok(found.is_some())
    }
}
