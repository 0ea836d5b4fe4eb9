//! SQLite dataset source / SQLite 数据集来源

use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{DatasetSession, DatasetSource};
use crate::convert::{convert_cell, CharacteristicCache, DataType};
use crate::models::{Dataset, ObservableFeature, Protocol};
use crate::table::{Column, TableView};

const DATASET_COLUMNS: &str = "SELECT id, identifier, name, description, protocol_id FROM datasets";

/// Dataset source backed by a SQLite pool / 基于 SQLite 连接池的数据集来源
#[derive(Clone)]
pub struct SqliteDatasetSource {
    pool: SqlitePool,
}

impl SqliteDatasetSource {
    /// 使用现有数据库连接池
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a database url (WAL mode, busy timeout) / 连接数据库
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url {}", database_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("failed to connect to dataset database")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DatasetSource for SqliteDatasetSource {
    async fn open(&self) -> Result<Box<dyn DatasetSession>> {
        let conn = self
            .pool
            .acquire()
            .await
            .context("failed to acquire dataset database connection")?;

        Ok(Box::new(SqliteSession {
            conn,
            characteristics: CharacteristicCache::new(),
        }))
    }
}

/// One pooled connection plus its xref cache / 单个连接及其引用缓存
struct SqliteSession {
    conn: PoolConnection<Sqlite>,
    characteristics: CharacteristicCache,
}

#[derive(sqlx::FromRow)]
struct ProtocolRow {
    id: i64,
    identifier: String,
    name: String,
    description: Option<String>,
}

impl SqliteSession {
    /// Load the protocol tree rooted at `protocol_id` / 加载协议树
    async fn load_tree(&mut self, protocol_id: i64) -> Result<Protocol> {
        let mut visited = HashSet::new();
        self.load_protocol(protocol_id, &mut visited)
            .await?
            .ok_or_else(|| anyhow!("protocol {} is its own ancestor", protocol_id))
    }

    fn load_protocol<'a>(
        &'a mut self,
        protocol_id: i64,
        visited: &'a mut HashSet<i64>,
    ) -> BoxFuture<'a, Result<Option<Protocol>>> {
        Box::pin(async move {
            if !visited.insert(protocol_id) {
                tracing::warn!("Protocol {} already visited, cutting cycle", protocol_id);
                return Ok(None);
            }

            let row: ProtocolRow = sqlx::query_as(
                "SELECT id, identifier, name, description FROM protocols WHERE id = ?"
            )
            .bind(protocol_id)
            .fetch_optional(&mut *self.conn)
            .await?
            .ok_or_else(|| anyhow!("protocol {} not found", protocol_id))?;

            let features: Vec<ObservableFeature> = sqlx::query_as(
                r#"
                SELECT f.id, f.identifier, f.name, f.data_type, f.description
                FROM observable_features f
                JOIN protocol_features pf ON pf.feature_id = f.id
                WHERE pf.protocol_id = ?
                ORDER BY pf.sort_order, f.id
                "#
            )
            .bind(protocol_id)
            .fetch_all(&mut *self.conn)
            .await?;

            let children: Vec<(i64,)> = sqlx::query_as(
                "SELECT subprotocol_id FROM protocol_subprotocols WHERE protocol_id = ? ORDER BY sort_order, subprotocol_id"
            )
            .bind(protocol_id)
            .fetch_all(&mut *self.conn)
            .await?;

            let mut subprotocols = Vec::with_capacity(children.len());
            for (child_id,) in children {
                if let Some(child) = self.load_protocol(child_id, visited).await? {
                    subprotocols.push(child);
                }
            }

            Ok(Some(Protocol {
                id: row.id,
                identifier: row.identifier,
                name: row.name,
                description: row.description,
                features,
                subprotocols,
            }))
        })
    }
}

#[async_trait]
impl DatasetSession for SqliteSession {
    async fn enumerate_all(&mut self) -> Result<Vec<Dataset>> {
        let datasets: Vec<Dataset> = sqlx::query_as(&format!("{} ORDER BY id", DATASET_COLUMNS))
            .fetch_all(&mut *self.conn)
            .await
            .context("failed to enumerate datasets")?;
        Ok(datasets)
    }

    async fn find_by_ids(&mut self, ids: &BTreeSet<i64>) -> Result<Vec<Dataset>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(DATASET_COLUMNS);
        query.push(" WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id");

        let datasets = query
            .build_query_as::<Dataset>()
            .fetch_all(&mut *self.conn)
            .await
            .context("failed to query datasets by id")?;
        Ok(datasets)
    }

    async fn dataset_table(&mut self, dataset: &Dataset) -> Result<TableView> {
        let protocol = self.load_tree(dataset.protocol_id).await?;
        let features: Vec<ObservableFeature> =
            protocol.flatten_features().into_iter().cloned().collect();

        let columns = features
            .iter()
            .map(|f| Column::new(f.name.clone(), f.data_type.clone()))
            .collect();
        let mut table = TableView::new(columns);

        let sets: Vec<(i64,)> =
            sqlx::query_as("SELECT id FROM observation_sets WHERE dataset_id = ? ORDER BY id")
                .bind(dataset.id)
                .fetch_all(&mut *self.conn)
                .await?;

        let values: Vec<(i64, i64, Option<String>)> = sqlx::query_as(
            r#"
            SELECT ov.observation_set_id, ov.feature_id, ov.value
            FROM observed_values ov
            JOIN observation_sets os ON os.id = ov.observation_set_id
            WHERE os.dataset_id = ?
            "#
        )
        .bind(dataset.id)
        .fetch_all(&mut *self.conn)
        .await?;

        let mut by_cell: HashMap<(i64, i64), Option<String>> = HashMap::with_capacity(values.len());
        for (set_id, feature_id, value) in values {
            by_cell.insert((set_id, feature_id), value);
        }

        for (set_id,) in sets {
            let mut row = Vec::with_capacity(features.len());
            for feature in &features {
                let raw = by_cell.get(&(set_id, feature.id)).and_then(|v| v.as_deref());
                let cell = convert_cell(
                    &mut self.characteristics,
                    &mut self.conn,
                    DataType::from(feature.data_type.as_str()),
                    raw,
                )
                .await
                .with_context(|| {
                    format!(
                        "dataset [{}] observation set {} feature [{}]",
                        dataset.identifier, set_id, feature.identifier
                    )
                })?;
                row.push(cell);
            }
            table.push_row(row)?;
        }

        Ok(table)
    }

    async fn protocol_table(&mut self, dataset: &Dataset) -> Result<TableView> {
        let protocol = self.load_tree(dataset.protocol_id).await?;
        protocol_tree_table(&protocol)
    }

    async fn close(self: Box<Self>) {
        tracing::debug!(
            "Closing dataset session ({} cached characteristics)",
            self.characteristics.len()
        );
        // Dropping the pooled connection hands it back to the pool
        drop(self);
    }
}

/// Flatten a protocol tree into rows / 将协议树展开为表格
///
/// Columns: id, identifier, name, type, description, path. `path` is the chain
/// of protocol ids from the root, e.g. `/1/4`; a feature carries the path of
/// the protocol it belongs to.
pub fn protocol_tree_table(protocol: &Protocol) -> Result<TableView> {
    let mut table = TableView::new(vec![
        Column::new("id", "int"),
        Column::new("identifier", "string"),
        Column::new("name", "string"),
        Column::new("type", "string"),
        Column::new("description", "text"),
        Column::new("path", "string"),
    ]);
    push_protocol_rows(&mut table, protocol, "")?;
    Ok(table)
}

fn push_protocol_rows(table: &mut TableView, protocol: &Protocol, parent_path: &str) -> Result<()> {
    let path = format!("{}/{}", parent_path, protocol.id);

    table.push_row(vec![
        Some(protocol.id.to_string()),
        Some(protocol.identifier.clone()),
        Some(protocol.name.clone()),
        Some("protocol".to_string()),
        protocol.description.clone(),
        Some(path.clone()),
    ])?;

    for feature in &protocol.features {
        table.push_row(vec![
            Some(feature.id.to_string()),
            Some(feature.identifier.clone()),
            Some(feature.name.clone()),
            Some("feature".to_string()),
            feature.description.clone(),
            Some(path.clone()),
        ])?;
    }

    for sub in &protocol.subprotocols {
        push_protocol_rows(table, sub, &path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_tree_table_paths() {
        let tree = Protocol {
            id: 1,
            identifier: "root".into(),
            name: "Root".into(),
            description: None,
            features: vec![ObservableFeature {
                id: 7,
                identifier: "age".into(),
                name: "Age".into(),
                data_type: "int".into(),
                description: Some("age in years".into()),
            }],
            subprotocols: vec![Protocol {
                id: 4,
                identifier: "child".into(),
                name: "Child".into(),
                description: Some("nested".into()),
                features: vec![],
                subprotocols: vec![],
            }],
        };

        let table = protocol_tree_table(&tree).unwrap();
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.cell(0, "type"), Some("protocol"));
        assert_eq!(table.cell(0, "path"), Some("/1"));
        assert_eq!(table.cell(1, "name"), Some("Age"));
        assert_eq!(table.cell(1, "path"), Some("/1"));
        assert_eq!(table.cell(2, "identifier"), Some("child"));
        assert_eq!(table.cell(2, "path"), Some("/1/4"));
    }
}
