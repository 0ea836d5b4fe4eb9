//! Indexer - job scheduling and single-flight execution / 索引调度
//!
//! Architecture / 架构：
//! - `state`: running slot (atomic CAS) and progress snapshot
//! - `runner`: one pass over the target datasets
//! - `coordinator`: public entry points, spawns jobs on the runtime
//! - `policy`: what to do when a dataset fails

pub mod coordinator;
pub mod job;
pub mod policy;
mod runner;
pub mod state;

use std::time::Duration;

use crate::config::IndexerConfig;

pub use coordinator::{IndexingCoordinator, IndexingCoordinatorBuilder};
pub use job::{IndexMode, JobEvent, JobHandle, JobOutcome, JobReport};
pub use policy::{FailureAction, FailurePolicy, SkipFailedDatasets, StopOnFirstError};
pub use state::IndexProgress;

/// Coordinator could not be built / 协调器配置错误
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("no dataset source configured")]
    MissingSource,
    #[error("no search backend configured")]
    MissingBackend,
    #[error("no tokio runtime available to run index jobs")]
    NoRuntime,
    #[error("invalid indexer setting: {0}")]
    InvalidSetting(String),
}

#[derive(Debug, Clone)]
pub struct IndexerSettings {
    /// Upper bound between slot acquisition attempts while waiting
    pub poll_interval: Duration,
    /// Buffered job events per subscriber
    pub event_capacity: usize,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

impl IndexerSettings {
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.poll_interval.is_zero() {
            return Err(IndexerError::InvalidSetting(
                "poll_interval must be greater than zero".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(IndexerError::InvalidSetting(
                "event_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl From<&IndexerConfig> for IndexerSettings {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            event_capacity: config.event_capacity,
        }
    }
}
