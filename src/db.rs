use anyhow::Result;
use sqlx::SqlitePool;

/// Run database migrations / 运行数据库迁移
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS protocols (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS protocol_subprotocols (
            protocol_id INTEGER NOT NULL,
            subprotocol_id INTEGER NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (protocol_id, subprotocol_id),
            FOREIGN KEY (protocol_id) REFERENCES protocols(id) ON DELETE CASCADE,
            FOREIGN KEY (subprotocol_id) REFERENCES protocols(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS observable_features (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS protocol_features (
            protocol_id INTEGER NOT NULL,
            feature_id INTEGER NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (protocol_id, feature_id),
            FOREIGN KEY (protocol_id) REFERENCES protocols(id) ON DELETE CASCADE,
            FOREIGN KEY (feature_id) REFERENCES observable_features(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS characteristics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS datasets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT,
            protocol_id INTEGER NOT NULL,
            FOREIGN KEY (protocol_id) REFERENCES protocols(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS observation_sets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_id INTEGER NOT NULL,
            identifier TEXT NOT NULL UNIQUE,
            FOREIGN KEY (dataset_id) REFERENCES datasets(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS observed_values (
            observation_set_id INTEGER NOT NULL,
            feature_id INTEGER NOT NULL,
            value TEXT,
            PRIMARY KEY (observation_set_id, feature_id),
            FOREIGN KEY (observation_set_id) REFERENCES observation_sets(id) ON DELETE CASCADE,
            FOREIGN KEY (feature_id) REFERENCES observable_features(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_observation_sets_dataset ON observation_sets(dataset_id)"
    )
    .execute(pool)
    .await?;

    // 数据库迁移：添加 data_type 字段（如果不存在）
    let columns: Vec<(i32, String, String, i32, Option<String>, i32)> =
        sqlx::query_as("PRAGMA table_info(observable_features)")
            .fetch_all(pool)
            .await?;

    let has_data_type = columns.iter().any(|(_, name, _, _, _, _)| name == "data_type");
    if !has_data_type {
        sqlx::query("ALTER TABLE observable_features ADD COLUMN data_type TEXT NOT NULL DEFAULT 'string'")
            .execute(pool)
            .await?;
        tracing::info!("Migration: Added data_type column");
    }

    Ok(())
}
