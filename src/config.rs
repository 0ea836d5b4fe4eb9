//! Application configuration module / 应用配置模块
//!
//! Manages configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Relational dataset store / 数据集数据库配置
    pub database: DatabaseConfig,
    /// Search backend configuration / 搜索配置
    pub search: SearchConfig,
    /// Indexing coordinator configuration / 索引调度配置
    pub indexer: IndexerConfig,
}

/// Database configuration / 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Data directory path / 数据目录路径
    pub data_dir: String,
    /// Dataset database file (relative to data_dir) / 数据集数据库文件
    pub db_file: String,
}

/// Which search backend to build / 搜索后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchBackendKind {
    Sqlite,
    Memory,
}

/// Search configuration / 搜索配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub backend: SearchBackendKind,
    /// Search database directory (relative to data_dir) / 搜索数据库目录
    pub db_dir: String,
    /// Search database file name / 搜索数据库文件名
    pub db_file: String,
}

/// How a job reacts to a failing dataset / 数据集失败处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicyKind {
    StopOnFirstError,
    SkipFailed,
}

/// Indexer configuration / 索引调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Interval between slot checks while another job runs / 等待轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    pub failure_policy: FailurePolicyKind,
    /// Run an incremental pass when `serve` starts / 启动时索引新数据集
    pub index_new_on_startup: bool,
    /// Periodic incremental pass, 0 disables / 定期增量索引间隔（秒），0 表示关闭
    pub reindex_interval_secs: u64,
    /// Capacity of the job event channel / 任务事件通道容量
    pub event_capacity: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            db_file: "datasets.db".to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: SearchBackendKind::Sqlite,
            db_dir: "search".to_string(),
            db_file: "search.db".to_string(),
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            failure_policy: FailurePolicyKind::StopOnFirstError,
            index_new_on_startup: true,
            reindex_interval_secs: 0,
            event_capacity: 256,
        }
    }
}

impl IndexerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// None when periodic reindexing is disabled / 未启用时返回 None
    pub fn reindex_interval(&self) -> Option<Duration> {
        (self.reindex_interval_secs > 0).then(|| Duration::from_secs(self.reindex_interval_secs))
    }
}

impl AppConfig {
    /// Get the full database URL / 获取完整的数据库URL
    pub fn get_database_url(&self) -> String {
        let db_path = Path::new(&self.database.data_dir).join(&self.database.db_file);
        format!("sqlite:{}?mode=rwc", db_path.to_string_lossy())
    }

    /// Get the full data directory path / 获取完整的数据目录路径
    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(&self.database.data_dir)
    }

    /// Get search database directory / 获取搜索数据库目录
    pub fn get_search_db_dir(&self) -> PathBuf {
        let data_dir = self.get_data_dir();
        if self.search.db_dir.is_empty() {
            data_dir
        } else {
            data_dir.join(&self.search.db_dir)
        }
    }

    /// Get the full search database path / 获取完整的搜索数据库路径
    pub fn get_search_db_path(&self) -> PathBuf {
        self.get_search_db_dir().join(&self.search.db_file)
    }
}

/// Default config file path (./config.json) / 默认配置文件路径
pub fn default_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file {:?}", config_path))?;

        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", config_path))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        let config = AppConfig::default();
        save_config(config_path, &config)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config_path: &Path, config: &AppConfig) -> Result<()> {
    let content = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

    std::fs::write(config_path, content)
        .with_context(|| format!("Failed to write config file {:?}", config_path))?;

    Ok(())
}
