//! Index job runner / 索引任务执行器
//!
//! Runs one job while it holds the slot: opens a session, resolves the
//! target datasets and pushes two collections per dataset to the backend.

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Context;
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::job::{JobEvent, JobOutcome};
use super::policy::{FailureAction, FailurePolicy};
use super::state::{IndexState, SlotGuard};
use crate::models::Dataset;
use crate::search::{protocol_collection_name, SearchBackend};
use crate::source::{DatasetSession, DatasetSource};

/// Status error of a job stopped by shutdown / 取消时的状态信息
pub(crate) const CANCELLED_MESSAGE: &str = "Index building cancelled";

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Which datasets a job visits
#[derive(Debug, Clone)]
pub(crate) enum Targets {
    All,
    Ids(BTreeSet<i64>),
}

pub(crate) struct IndexJobRunner {
    pub source: Arc<dyn DatasetSource>,
    pub backend: Arc<dyn SearchBackend>,
    pub policy: Arc<dyn FailurePolicy>,
    pub state: Arc<IndexState>,
    pub events: broadcast::Sender<JobEvent>,
}

impl IndexJobRunner {
    /// Run the job while the caller holds `_slot`. The session is closed
    /// before this returns.
    pub async fn run(
        &self,
        job_id: Uuid,
        targets: Targets,
        _slot: &SlotGuard,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        self.state.start();
        let outcome = match AssertUnwindSafe(self.run_scoped(job_id, targets, cancel))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let error = format!("job panicked: {}", panic_message(panic.as_ref()));
                tracing::error!("Index job {} {}", job_id, error);
                JobOutcome::Failed {
                    indexed: self.state.get_progress().dataset_count as usize,
                    error,
                }
            }
        };
        let error = match &outcome {
            JobOutcome::Cancelled { .. } => Some(CANCELLED_MESSAGE.to_string()),
            other => other.error().map(str::to_string),
        };
        self.state.finish(error);
        outcome
    }

    async fn run_scoped(
        &self,
        job_id: Uuid,
        targets: Targets,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        if let Targets::Ids(ids) = &targets {
            if ids.is_empty() {
                tracing::debug!("Index job {} has no target ids", job_id);
                return JobOutcome::Completed {
                    indexed: 0,
                    skipped: Vec::new(),
                };
            }
        }

        let mut session = match self.source.open().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Index job {} failed to open a session: {:#}", job_id, e);
                return JobOutcome::Failed {
                    indexed: 0,
                    error: format!("{:#}", e),
                };
            }
        };

        let outcome = self.run_in_session(job_id, targets, session.as_mut(), cancel).await;
        session.close().await;
        outcome
    }

    async fn run_in_session(
        &self,
        job_id: Uuid,
        targets: Targets,
        session: &mut dyn DatasetSession,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let datasets = match targets {
            Targets::All => session.enumerate_all().await,
            Targets::Ids(ids) => session.find_by_ids(&ids).await,
        };
        let datasets = match datasets.context("failed to resolve target datasets") {
            Ok(datasets) => datasets,
            Err(e) => {
                tracing::error!("Index job {}: {:#}", job_id, e);
                return JobOutcome::Failed {
                    indexed: 0,
                    error: format!("{:#}", e),
                };
            }
        };

        tracing::info!("Index job {} visiting {} datasets", job_id, datasets.len());

        let mut indexed = 0usize;
        let mut skipped = Vec::new();

        for dataset in &datasets {
            if cancel.is_cancelled() {
                tracing::info!("Index job {} cancelled after {} datasets", job_id, indexed);
                return JobOutcome::Cancelled { indexed };
            }

            match self.index_dataset(session, dataset).await {
                Ok(()) => {
                    indexed += 1;
                    self.state.increment();
                    tracing::debug!("Indexed dataset {} [{}]", dataset.id, dataset.identifier);
                    let _ = self.events.send(JobEvent::DatasetIndexed {
                        job_id,
                        dataset_id: dataset.id,
                        identifier: dataset.identifier.clone(),
                    });
                }
                Err(e) => match self.policy.on_dataset_error(dataset, &e) {
                    FailureAction::Abort => {
                        tracing::error!(
                            "Index job {} stopped at dataset {} [{}]: {:#}",
                            job_id,
                            dataset.id,
                            dataset.identifier,
                            e
                        );
                        return JobOutcome::Failed {
                            indexed,
                            error: format!("{:#}", e),
                        };
                    }
                    FailureAction::Skip => {
                        tracing::warn!(
                            "Index job {} skipped dataset {} [{}]: {:#}",
                            job_id,
                            dataset.id,
                            dataset.identifier,
                            e
                        );
                        skipped.push(dataset.id);
                        let _ = self.events.send(JobEvent::DatasetSkipped {
                            job_id,
                            dataset_id: dataset.id,
                            error: format!("{:#}", e),
                        });
                    }
                },
            }
        }

        JobOutcome::Completed { indexed, skipped }
    }

    /// Both views are built before either collection is written
    async fn index_dataset(
        &self,
        session: &mut dyn DatasetSession,
        dataset: &Dataset,
    ) -> anyhow::Result<()> {
        let data = session
            .dataset_table(dataset)
            .await
            .with_context(|| format!("failed to read dataset [{}]", dataset.identifier))?;
        let tree = session
            .protocol_table(dataset)
            .await
            .with_context(|| format!("failed to read protocol tree of dataset [{}]", dataset.identifier))?;

        self.backend
            .index_table(&dataset.identifier, &data)
            .await
            .with_context(|| format!("failed to index dataset [{}]", dataset.identifier))?;

        let tree_collection = protocol_collection_name(dataset.id);
        self.backend
            .index_table(&tree_collection, &tree)
            .await
            .with_context(|| format!("failed to index collection [{}]", tree_collection))?;

        Ok(())
    }
}
