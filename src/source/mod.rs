//! Dataset source - relational side of indexing / 数据集来源
//!
//! A source hands out sessions; each session owns its own connection and is
//! never shared between concurrent jobs. Sessions are closed explicitly, and
//! dropping one releases the connection as well.

pub mod sqlite;

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Dataset;
use crate::table::TableView;

pub use sqlite::SqliteDatasetSource;

#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Open a scoped session / 打开会话
    async fn open(&self) -> Result<Box<dyn DatasetSession>>;
}

#[async_trait]
pub trait DatasetSession: Send {
    /// All datasets in enumeration order / 所有数据集
    async fn enumerate_all(&mut self) -> Result<Vec<Dataset>>;

    /// Datasets whose id is in `ids`, in enumeration order / 按ID查询数据集
    async fn find_by_ids(&mut self, ids: &BTreeSet<i64>) -> Result<Vec<Dataset>>;

    /// The dataset's own data / 数据集表格视图
    async fn dataset_table(&mut self, dataset: &Dataset) -> Result<TableView>;

    /// The dataset's protocol hierarchy / 协议树表格视图
    async fn protocol_table(&mut self, dataset: &Dataset) -> Result<TableView>;

    /// Release the session / 释放会话
    async fn close(self: Box<Self>);
}
