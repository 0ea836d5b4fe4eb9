use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// 索引模式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "ids", rename_all = "snake_case")]
pub enum IndexMode {
    Full,
    NewOnly,
    ByIds(BTreeSet<i64>),
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexMode::Full => write!(f, "full"),
            IndexMode::NewOnly => write!(f, "new"),
            IndexMode::ByIds(ids) => write!(f, "ids({})", ids.len()),
        }
    }
}

/// 任务结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Every target was visited; `skipped` lists datasets a lenient policy passed over
    Completed { indexed: usize, skipped: Vec<i64> },
    /// Aborted on an error; datasets indexed before it are kept
    Failed { indexed: usize, error: String },
    /// Stopped by shutdown, either while waiting for the slot or between datasets
    Cancelled { indexed: usize },
    /// Incremental selection found nothing to index
    NothingToIndex,
}

impl JobOutcome {
    pub fn indexed(&self) -> usize {
        match self {
            JobOutcome::Completed { indexed, .. }
            | JobOutcome::Failed { indexed, .. }
            | JobOutcome::Cancelled { indexed } => *indexed,
            JobOutcome::NothingToIndex => 0,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub mode: IndexMode,
    pub outcome: JobOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// 任务事件（广播）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Queued { job_id: Uuid, mode: IndexMode },
    Started { job_id: Uuid, mode: IndexMode },
    DatasetIndexed { job_id: Uuid, dataset_id: i64, identifier: String },
    DatasetSkipped { job_id: Uuid, dataset_id: i64, error: String },
    Finished { report: JobReport },
}

/// Handle to a scheduled job. Dropping it does not cancel the job / 任务句柄
pub struct JobHandle {
    job_id: Uuid,
    mode: IndexMode,
    handle: JoinHandle<JobReport>,
}

impl JobHandle {
    pub(crate) fn new(job_id: Uuid, mode: IndexMode, handle: JoinHandle<JobReport>) -> Self {
        Self { job_id, mode, handle }
    }

    pub fn id(&self) -> Uuid {
        self.job_id
    }

    pub fn mode(&self) -> &IndexMode {
        &self.mode
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the job's report / 等待任务完成
    pub async fn wait(self) -> JobReport {
        let started_at = Utc::now();
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Index job {} task ended abnormally: {}", self.job_id, e);
                let outcome = if e.is_cancelled() {
                    JobOutcome::Cancelled { indexed: 0 }
                } else {
                    JobOutcome::Failed {
                        indexed: 0,
                        error: format!("job task panicked: {}", e),
                    }
                };
                JobReport {
                    job_id: self.job_id,
                    mode: self.mode,
                    outcome,
                    started_at,
                    finished_at: Utc::now(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_display() {
        assert_eq!(IndexMode::Full.to_string(), "full");
        assert_eq!(IndexMode::ByIds([1, 2, 3].into_iter().collect()).to_string(), "ids(3)");
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(JobOutcome::Failed {
            indexed: 1,
            error: "boom".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["indexed"], 1);
    }

    #[tokio::test]
    async fn test_wait_reports_panicked_task_as_failed() {
        let job_id = Uuid::new_v4();
        let handle: JoinHandle<JobReport> = tokio::spawn(async { panic!("boom") });
        let report = JobHandle::new(job_id, IndexMode::Full, handle).wait().await;
        assert_eq!(report.job_id, job_id);
        assert!(matches!(report.outcome, JobOutcome::Failed { indexed: 0, .. }));
    }
}
